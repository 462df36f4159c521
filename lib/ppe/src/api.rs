// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The control-plane facing types, re-exported so that consumers of
//! the engine need only depend on this crate.

pub use ppe_api::*;
