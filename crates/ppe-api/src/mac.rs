// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use alloc::str::FromStr;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

/// A MAC address.
#[derive(
    Clone,
    Copy,
    Default,
    Deserialize,
    Eq,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Hash,
)]
pub struct MacAddr {
    inner: [u8; 6],
}

impl MacAddr {
    pub const BROADCAST: Self = Self { inner: [0xFF; 6] };
    pub const ZERO: Self = Self { inner: [0x00; 6] };

    /// Return the bytes of the MAC address.
    #[inline]
    pub fn bytes(&self) -> [u8; 6] {
        self.inner
    }

    pub const fn from_const(bytes: [u8; 6]) -> Self {
        Self { inner: bytes }
    }

    /// The group bit of the first octet is set.
    pub fn is_multicast(&self) -> bool {
        self.inner[0] & 0x01 != 0
    }

    pub fn is_zero(&self) -> bool {
        self.inner == [0; 6]
    }

    /// A non-zero unicast address, the only kind the flow table will
    /// accept as either end of an Ethernet match.
    pub fn is_valid(&self) -> bool {
        !self.is_multicast() && !self.is_zero()
    }

    /// The upper four octets as a big-endian word, the way the
    /// hardware stores the "hi" half of an address.
    pub fn hi(&self) -> u32 {
        u32::from_be_bytes([
            self.inner[0],
            self.inner[1],
            self.inner[2],
            self.inner[3],
        ])
    }

    /// The lower two octets as a big-endian half-word.
    pub fn lo(&self) -> u16 {
        u16::from_be_bytes([self.inner[4], self.inner[5]])
    }

    pub fn from_hi_lo(hi: u32, lo: u16) -> Self {
        let h = hi.to_be_bytes();
        let l = lo.to_be_bytes();
        Self { inner: [h[0], h[1], h[2], h[3], l[0], l[1]] }
    }
}

impl From<MacAddr> for smoltcp::wire::EthernetAddress {
    fn from(addr: MacAddr) -> Self {
        Self(addr.bytes())
    }
}

impl From<smoltcp::wire::EthernetAddress> for MacAddr {
    fn from(addr: smoltcp::wire::EthernetAddress) -> Self {
        Self { inner: addr.0 }
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self { inner: bytes }
    }
}

impl AsRef<[u8]> for MacAddr {
    fn as_ref(&self) -> &[u8] {
        &self.inner
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<u8> = s
            .split(':')
            .map(|s| {
                u8::from_str_radix(s, 16).map_err(|_| format!("bad octet: {s}"))
            })
            .collect::<Result<Vec<u8>, _>>()?;

        let bytes: [u8; 6] = octets.as_slice().try_into().map_err(|_| {
            format!("incorrect number of bytes: {}", octets.len())
        })?;

        Ok(MacAddr { inner: bytes })
    }
}

impl Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let b = &self.inner;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MacAddr({self})")
    }
}
