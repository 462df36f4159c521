// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The flow-offload engine.
pub mod ether;
pub mod flow_table;
pub mod foe;
pub mod hash;
pub mod mirror;
pub mod npu;
pub mod offload;
pub mod ppe;
pub mod prepare;
pub mod regs;
#[cfg(any(feature = "test-help", test))]
pub mod sim;
pub mod stat;

pub use crate::api::Direction;
