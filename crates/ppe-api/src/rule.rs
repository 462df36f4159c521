// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The classifier-offload rule handed down by the control plane.
//!
//! A rule is a set of optional match keys plus an ordered action list.
//! Which keys are present matters as much as their values: the engine
//! rejects rules missing the keys it needs, and a key it cannot
//! express in hardware makes the whole rule unsupported.

use super::mac::MacAddr;
use alloc::string::String;
use alloc::vec::Vec;
use core::net::Ipv4Addr;
use core::net::Ipv6Addr;
use serde::Deserialize;
use serde::Serialize;

pub const ETH_P_8021Q: u16 = 0x8100;
pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_IPV6: u16 = 0x86DD;
pub const ETH_P_PPP_SES: u16 = 0x8864;

pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

/// The network-layer family a rule matches on.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum AddrType {
    /// No L3 addresses; a bridged flow keyed on MAC addresses.
    #[default]
    None,
    Ipv4,
    Ipv6,
    Other(u16),
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ControlMatch {
    pub addr_type: AddrType,
    /// Fragment and similar control flags the rule asks to match on.
    /// The hardware has no way to express any of them.
    pub flags: u32,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct BasicMatch {
    pub n_proto: u16,
    pub ip_proto: u8,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EthAddrsMatch {
    pub dst: MacAddr,
    pub src: MacAddr,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Ipv4AddrsMatch {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Ipv6AddrsMatch {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PortsMatch {
    pub src: u16,
    pub dst: u16,
}

/// The header a mangle action edits.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum MangleHdr {
    Eth,
    Ip4,
    Ip6,
    Tcp,
    Udp,
}

/// A 32-bit header rewrite.
///
/// `val` and `mask` are kept in network byte order as they appear in
/// the header; bits set in `mask` are preserved, the rest come from
/// `val`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Mangle {
    pub htype: MangleHdr,
    pub offset: u32,
    pub mask: [u8; 4],
    pub val: [u8; 4],
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum FlowAction {
    Mangle(Mangle),
    /// Forward out the device with this interface index.
    Redirect { ifindex: u32 },
    Csum,
    VlanPush { vid: u16, proto: u16 },
    VlanPop,
    PppoePush { sid: u16 },
    Drop,
    /// Anything else the classifier may hand us.
    Other(String),
}

/// A flower-style offload rule.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FlowRule {
    pub meta: bool,
    pub control: Option<ControlMatch>,
    pub basic: Option<BasicMatch>,
    pub eth_addrs: Option<EthAddrsMatch>,
    pub ipv4_addrs: Option<Ipv4AddrsMatch>,
    pub ipv6_addrs: Option<Ipv6AddrsMatch>,
    pub ports: Option<PortsMatch>,
    pub actions: Vec<FlowAction>,
}
