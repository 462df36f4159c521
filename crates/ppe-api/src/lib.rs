// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod cfg;
pub mod cmd;
pub mod mac;
pub mod rule;

pub use cfg::*;
pub use cmd::*;
pub use mac::*;
pub use rule::*;

/// The overall version of the API. Anytime an API is added, removed,
/// or modified, this number should increment. Currently we attach no
/// semantic meaning to the number other than as a means to verify
/// that the control plane and the engine are compiled for the same
/// API.
pub const API_VERSION: u64 = 3;

/// The number of entries in the hardware flow table, SRAM and DRAM
/// halves combined.
pub const PPE_NUM_ENTRIES: u32 = 16 * 1024 * 2;

/// Mask applied to a flow hash to select a table slot.
pub const PPE_HASH_MASK: u32 = PPE_NUM_ENTRIES - 1;

/// Which side of a NAT translation a tuple describes.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Direction {
    /// The tuple as seen on the wire before translation.
    Ingress,
    /// The tuple after translation.
    Egress,
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dirstr = match self {
            Direction::Ingress => "IN",
            Direction::Egress => "OUT",
        };

        write!(f, "{dirstr}")
    }
}
