// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The hardware's slot hash.
//!
//! This must match the hash the engine computes in silicon bit for
//! bit: it decides which bucket a pending entry waits in, and the
//! hardware reports samples using its own copy of the same function.

use super::foe::FoeData;
use super::foe::FoeEntry;
use crate::api::PPE_HASH_MASK;
use core::fmt;
use core::fmt::Display;

/// The packet type has no hash the software side can reproduce.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct UnsupportedHash(pub u8);

impl Display for UnsupportedHash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "no hash for packet type {}", self.0)
    }
}

/// Compute the table slot for `entry`.
pub fn foe_hash(entry: &FoeEntry) -> Result<u32, UnsupportedHash> {
    use super::foe::PacketType::*;

    let ptype = entry.ib1.packet_type_raw();
    let (hv1, hv2, hv3) = match (entry.packet_type(), &entry.data) {
        (Some(Ipv4Route | Ipv4Hnapt), FoeData::Ipv4(v4)) => {
            let t = &v4.orig_tuple;
            (t.ports(), t.dest_ip, t.src_ip)
        }

        (Some(Ipv6Route3T | Ipv6Route5T), FoeData::Ipv6(v6)) => {
            let (s, d) = (&v6.src_ip, &v6.dest_ip);
            (s[3] ^ d[3] ^ v6.ports(), s[2] ^ d[2] ^ d[0], s[1] ^ d[1] ^ s[0])
        }

        (Some(Bridge), FoeData::Bridge(br)) => {
            let l2 = &br.l2;
            (
                (l2.src_mac_hi & 0xffff) << 16 | l2.src_mac_lo as u32,
                (l2.dest_mac_lo as u32) << 16 | l2.src_mac_hi >> 16,
                l2.dest_mac_hi,
            )
        }

        _ => return Err(UnsupportedHash(ptype)),
    };

    let mut hash = (hv1 & hv2) | (!hv1 & hv3);
    hash = hash.rotate_right(24);
    hash ^= hv1 ^ hv2 ^ hv3;
    hash ^= hash >> 16;
    Ok(hash & PPE_HASH_MASK)
}
