// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The hardware flow-table record (a FOE entry).
//!
//! A record is 80 bytes on the wire: the `ib1` info block followed by
//! nineteen words whose meaning depends on the packet type carried in
//! `ib1`. In memory we work with [`FoeEntry`], whose [`FoeData`] arm
//! is chosen by that packet type, and convert to and from the raw
//! [`FoeEntryRaw`] words only when talking to the hardware.

use super::regs::bit;
use super::regs::field_get;
use super::regs::field_prep;
use super::regs::genmask;
use crate::api::MacAddr;
use bitflags::bitflags;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

pub const PPE_ENTRY_SIZE: usize = 80;
pub const FOE_ENTRY_WORDS: usize = PPE_ENTRY_SIZE / 4;

pub const PPE_SRAM_NUM_ENTRIES: u32 = 16 * 1024;
pub const PPE1_SRAM_NUM_ENTRIES: u32 = 8 * 1024;
pub const PPE_DRAM_NUM_ENTRIES: u32 = 16 * 1024;

// ib1 fields.
const IB1_STATE: u32 = genmask(29, 28);
const IB1_PACKET_TYPE: u32 = genmask(27, 25);
const IB1_VPM: u32 = genmask(21, 20);
const IB1_VLAN_LAYER: u32 = genmask(19, 16);
pub const IB1_BIND_TIMESTAMP: u32 = genmask(14, 0);
pub const IB1_UNBIND_TIMESTAMP: u32 = genmask(7, 0);

// ib2 fields.
const IB2_PORT_AG: u32 = genmask(23, 13);
const IB2_PSE_PORT: u32 = genmask(8, 5);
const IB2_NBQ: u32 = genmask(4, 0);

// qdata fields.
pub const QDATA_ACTDP: u32 = genmask(31, 24);
pub const QDATA_SHAPER_ID: u32 = genmask(23, 16);
pub const QDATA_CHANNEL: u32 = genmask(15, 11);
pub const QDATA_QID: u32 = genmask(10, 8);

// src_mac_hi of the IPv6 layout.
pub const MAC_SMAC_ID: u32 = genmask(20, 16);
pub const MAC_PPPOE_ID: u32 = genmask(15, 0);

/// `smac_id` telling the hardware to leave the source MAC alone.
pub const SMAC_ID_KEEP: u8 = 0xf;

pub const METER_TUNNEL_MTU: u32 = genmask(31, 16);

/// Ports word of a route entry, which carries no L4 ports.
pub const ROUTE_PORTS_PAD: u32 = 0xa5a5_a500;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BindState {
    Invalid = 0,
    Unbind = 1,
    Bind = 2,
    Fin = 3,
}

impl BindState {
    fn from_bits(val: u32) -> Self {
        match val & 0x3 {
            0 => Self::Invalid,
            1 => Self::Unbind,
            2 => Self::Bind,
            _ => Self::Fin,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum PacketType {
    Ipv4Hnapt = 0,
    Ipv4Route = 1,
    Bridge = 2,
    Ipv4Dslite = 3,
    Ipv6Route3T = 4,
    Ipv6Route5T = 5,
    Ipv6_6rd = 7,
}

impl TryFrom<u8> for PacketType {
    type Error = u8;

    fn try_from(val: u8) -> Result<Self, Self::Error> {
        match val {
            0 => Ok(Self::Ipv4Hnapt),
            1 => Ok(Self::Ipv4Route),
            2 => Ok(Self::Bridge),
            3 => Ok(Self::Ipv4Dslite),
            4 => Ok(Self::Ipv6Route3T),
            5 => Ok(Self::Ipv6Route5T),
            7 => Ok(Self::Ipv6_6rd),
            _ => Err(val),
        }
    }
}

impl PacketType {
    pub fn is_ipv6(&self) -> bool {
        *self > Self::Ipv4Dslite
    }
}

impl Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Ipv4Hnapt => "IPv4 5T",
            Self::Ipv4Route => "IPv4 3T",
            Self::Bridge => "L2B",
            Self::Ipv4Dslite => "DS-LITE",
            Self::Ipv6Route3T => "IPv6 3T",
            Self::Ipv6Route5T => "IPv6 5T",
            Self::Ipv6_6rd => "6RD",
        };
        write!(f, "{s}")
    }
}

bitflags! {
    /// Single-bit flags of `ib1` in the bound state.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Ib1Flags: u32 {
        const STATIC = bit(31);
        const UDP = bit(30);
        const TTL = bit(24);
        const TUNNEL_DECAP = bit(23);
        const PPPOE = bit(22);
        const KEEPALIVE = bit(15);
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Ib2Flags: u32 {
        const PCP = bit(12);
        const MULTICAST = bit(11);
        const FAST_PATH = bit(10);
        const PSE_QOS = bit(9);
    }
}

/// The first info block: bind state, packet type and timestamps.
#[derive(Clone, Copy, Default, Eq, PartialEq)]
pub struct Ib1(u32);

impl Ib1 {
    /// The bits taken from the hardware record, rather than from the
    /// aggregate, when a subflow is materialized under an L2 flow.
    pub const SUBFLOW_KEEP: u32 = IB1_PACKET_TYPE | Ib1Flags::UDP.bits();

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub fn state(&self) -> BindState {
        BindState::from_bits(field_get(IB1_STATE, self.0))
    }

    pub fn set_state(&mut self, state: BindState) {
        self.0 = (self.0 & !IB1_STATE) | field_prep(IB1_STATE, state as u32);
    }

    pub fn packet_type_raw(&self) -> u8 {
        field_get(IB1_PACKET_TYPE, self.0) as u8
    }

    pub fn packet_type(&self) -> Option<PacketType> {
        PacketType::try_from(self.packet_type_raw()).ok()
    }

    pub fn set_packet_type(&mut self, ptype: PacketType) {
        self.0 = (self.0 & !IB1_PACKET_TYPE)
            | field_prep(IB1_PACKET_TYPE, ptype as u32);
    }

    pub fn flags(&self) -> Ib1Flags {
        Ib1Flags::from_bits_truncate(self.0)
    }

    pub fn insert(&mut self, flags: Ib1Flags) {
        self.0 |= flags.bits();
    }

    pub fn contains(&self, flags: Ib1Flags) -> bool {
        self.flags().contains(flags)
    }

    pub fn vlan_layer(&self) -> u8 {
        field_get(IB1_VLAN_LAYER, self.0) as u8
    }

    pub fn set_vlan_layer(&mut self, n: u8) {
        self.0 = (self.0 & !(IB1_VLAN_LAYER | IB1_VPM))
            | field_prep(IB1_VLAN_LAYER, n as u32)
            | field_prep(IB1_VPM, n as u32);
    }

    pub fn bind_timestamp(&self) -> u32 {
        field_get(IB1_BIND_TIMESTAMP, self.0)
    }

    pub fn set_bind_timestamp(&mut self, ts: u32) {
        self.0 = (self.0 & !IB1_BIND_TIMESTAMP)
            | field_prep(IB1_BIND_TIMESTAMP, ts);
    }

    pub fn unbind_timestamp(&self) -> u32 {
        field_get(IB1_UNBIND_TIMESTAMP, self.0)
    }

    /// Keep the bits in `keep` from `self` and take the rest from
    /// `other`.
    pub fn merge(&self, other: Ib1, keep: u32) -> Self {
        Self((self.0 & keep) | (other.0 & !keep))
    }
}

impl Debug for Ib1 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Ib1({:#010x} {:?} type={} ts={})",
            self.0,
            self.state(),
            self.packet_type_raw(),
            self.bind_timestamp()
        )
    }
}

/// The second info block: forwarding port and queue.
#[derive(Clone, Copy, Default, Eq, PartialEq)]
pub struct Ib2(u32);

impl Ib2 {
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub fn flags(&self) -> Ib2Flags {
        Ib2Flags::from_bits_truncate(self.0)
    }

    pub fn insert(&mut self, flags: Ib2Flags) {
        self.0 |= flags.bits();
    }

    pub fn remove(&mut self, flags: Ib2Flags) {
        self.0 &= !flags.bits();
    }

    pub fn pse_port(&self) -> u8 {
        field_get(IB2_PSE_PORT, self.0) as u8
    }

    pub fn set_pse_port(&mut self, port: u8) {
        self.0 =
            (self.0 & !IB2_PSE_PORT) | field_prep(IB2_PSE_PORT, port as u32);
    }

    pub fn nbq(&self) -> u8 {
        field_get(IB2_NBQ, self.0) as u8
    }

    pub fn set_nbq(&mut self, nbq: u8) {
        self.0 = (self.0 & !IB2_NBQ) | field_prep(IB2_NBQ, nbq as u32);
    }

    pub fn set_port_ag(&mut self, ag: u16) {
        self.0 = (self.0 & !IB2_PORT_AG) | field_prep(IB2_PORT_AG, ag as u32);
    }

    /// The bits the co-processor needs to forward the flow itself when
    /// flow accounting redirects it: queue, port and QoS/fast-path.
    pub fn forwarding_bits(&self) -> u32 {
        self.0
            & (IB2_NBQ
                | IB2_PSE_PORT
                | Ib2Flags::PSE_QOS.bits()
                | Ib2Flags::FAST_PATH.bits())
    }
}

impl Debug for Ib2 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Ib2({:#010x} port={} nbq={})",
            self.0,
            self.pse_port(),
            self.nbq()
        )
    }
}

/// The L2 rewrite information attached to every entry.
///
/// `pppoe_id` and `src_mac_lo` exist only in the IPv4 and bridge
/// layouts; the IPv6 layout packs `smac_id` and the PPPoE session
/// into `src_mac_hi` instead.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MacInfo {
    pub vlan1: u16,
    pub etype: u16,
    pub dest_mac_hi: u32,
    pub vlan2: u16,
    pub dest_mac_lo: u16,
    pub src_mac_hi: u32,
    pub pppoe_id: u16,
    pub src_mac_lo: u16,
    pub meter: u32,
}

impl MacInfo {
    pub fn smac_id(&self) -> u8 {
        field_get(MAC_SMAC_ID, self.src_mac_hi) as u8
    }

    pub fn set_smac_id(&mut self, id: u8) {
        self.src_mac_hi =
            (self.src_mac_hi & !MAC_SMAC_ID) | field_prep(MAC_SMAC_ID, id as u32);
    }

    fn encode_common(&self, w: &mut [u32]) {
        w[0] = lohi(self.vlan1, self.etype);
        w[1] = self.dest_mac_hi;
        w[2] = lohi(self.vlan2, self.dest_mac_lo);
        w[3] = self.src_mac_hi;
    }

    fn decode_common(w: &[u32]) -> Self {
        let (vlan1, etype) = split(w[0]);
        let (vlan2, dest_mac_lo) = split(w[2]);
        Self {
            vlan1,
            etype,
            dest_mac_hi: w[1],
            vlan2,
            dest_mac_lo,
            src_mac_hi: w[3],
            ..Default::default()
        }
    }

    fn encode(&self, w: &mut [u32]) {
        self.encode_common(w);
        w[4] = lohi(self.pppoe_id, self.src_mac_lo);
        w[5] = self.meter;
    }

    fn decode(w: &[u32]) -> Self {
        let (pppoe_id, src_mac_lo) = split(w[4]);
        Self { pppoe_id, src_mac_lo, meter: w[5], ..Self::decode_common(w) }
    }
}

/// An IPv4 address/port tuple.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Ipv4Tuple {
    pub src_ip: u32,
    pub dest_ip: u32,
    pub dest_port: u16,
    pub src_port: u16,
}

impl Ipv4Tuple {
    /// The ports as the single word the hardware hashes over.
    pub fn ports(&self) -> u32 {
        lohi(self.dest_port, self.src_port)
    }

    pub fn set_ports(&mut self, ports: u32) {
        (self.dest_port, self.src_port) = split(ports);
    }

    fn encode(&self, w: &mut [u32]) {
        w[0] = self.src_ip;
        w[1] = self.dest_ip;
        w[2] = self.ports();
    }

    fn decode(w: &[u32]) -> Self {
        let mut t = Self { src_ip: w[0], dest_ip: w[1], ..Default::default() };
        t.set_ports(w[2]);
        t
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FoeIpv4 {
    pub orig_tuple: Ipv4Tuple,
    pub new_tuple: Ipv4Tuple,
    pub ib2: Ib2,
    pub data: u32,
    pub l2: MacInfo,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FoeIpv6 {
    pub src_ip: [u32; 4],
    pub dest_ip: [u32; 4],
    pub dest_port: u16,
    pub src_port: u16,
    pub data: u32,
    pub ib2: Ib2,
    pub l2: MacInfo,
}

impl FoeIpv6 {
    pub fn ports(&self) -> u32 {
        lohi(self.dest_port, self.src_port)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FoeBridge {
    pub dest_mac_hi: u32,
    pub src_mac_hi: u16,
    pub dest_mac_lo: u16,
    pub src_mac_lo: u32,
    pub ib2: Ib2,
    pub data: u32,
    pub l2: MacInfo,
}

impl FoeBridge {
    pub fn set_addrs(&mut self, dest: MacAddr, src: MacAddr) {
        let d = dest.bytes();
        let s = src.bytes();
        self.dest_mac_hi = u32::from_be_bytes([d[0], d[1], d[2], d[3]]);
        self.dest_mac_lo = u16::from_be_bytes([d[4], d[5]]);
        self.src_mac_hi = u16::from_be_bytes([s[0], s[1]]);
        self.src_mac_lo = u32::from_be_bytes([s[2], s[3], s[4], s[5]]);
    }

    pub fn key(&self) -> BridgeKey {
        let dh = self.dest_mac_hi.to_be_bytes();
        let dl = self.dest_mac_lo.to_be_bytes();
        let sh = self.src_mac_hi.to_be_bytes();
        let sl = self.src_mac_lo.to_be_bytes();
        BridgeKey {
            dest: MacAddr::from([dh[0], dh[1], dh[2], dh[3], dl[0], dl[1]]),
            src: MacAddr::from([sh[0], sh[1], sl[0], sl[1], sl[2], sl[3]]),
        }
    }
}

/// The lookup key of an L2 flow: the MAC address pair it bridges.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BridgeKey {
    pub dest: MacAddr,
    pub src: MacAddr,
}

/// The type-dependent part of a record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FoeData {
    Bridge(FoeBridge),
    Ipv4(FoeIpv4),
    Ipv6(FoeIpv6),
}

impl FoeData {
    /// The empty arm used for records of packet type `ptype`.
    pub fn for_type(ptype: u8) -> Self {
        if ptype == PacketType::Bridge as u8 {
            Self::Bridge(FoeBridge::default())
        } else if ptype <= PacketType::Ipv4Dslite as u8 {
            Self::Ipv4(FoeIpv4::default())
        } else {
            Self::Ipv6(FoeIpv6::default())
        }
    }
}

/// A flow-table record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FoeEntry {
    pub ib1: Ib1,
    pub data: FoeData,
}

/// The wire form of a record.
#[derive(
    Clone, Copy, Debug, Eq, FromBytes, Immutable, IntoBytes, KnownLayout,
    PartialEq,
)]
#[repr(C)]
pub struct FoeEntryRaw {
    pub ib1: u32,
    pub d: [u32; FOE_ENTRY_WORDS - 1],
}

impl Default for FoeEntryRaw {
    fn default() -> Self {
        Self { ib1: 0, d: [0; FOE_ENTRY_WORDS - 1] }
    }
}

impl FoeEntryRaw {
    /// The record as the 20 words streamed through the SRAM window,
    /// `ib1` first.
    pub fn words(&self) -> [u32; FOE_ENTRY_WORDS] {
        let mut w = [0; FOE_ENTRY_WORDS];
        w[0] = self.ib1;
        w[1..].copy_from_slice(&self.d);
        w
    }

    pub fn from_words(w: &[u32; FOE_ENTRY_WORDS]) -> Self {
        let mut raw = Self { ib1: w[0], ..Default::default() };
        raw.d.copy_from_slice(&w[1..]);
        raw
    }
}

impl FoeEntry {
    pub fn new(ib1: Ib1) -> Self {
        Self { ib1, data: FoeData::for_type(ib1.packet_type_raw()) }
    }

    pub fn packet_type(&self) -> Option<PacketType> {
        self.ib1.packet_type()
    }

    pub fn is_bridge(&self) -> bool {
        matches!(self.data, FoeData::Bridge(_))
    }

    pub fn ib2(&self) -> Ib2 {
        match &self.data {
            FoeData::Bridge(br) => br.ib2,
            FoeData::Ipv4(v4) => v4.ib2,
            FoeData::Ipv6(v6) => v6.ib2,
        }
    }

    pub fn ib2_mut(&mut self) -> &mut Ib2 {
        match &mut self.data {
            FoeData::Bridge(br) => &mut br.ib2,
            FoeData::Ipv4(v4) => &mut v4.ib2,
            FoeData::Ipv6(v6) => &mut v6.ib2,
        }
    }

    pub fn qdata(&self) -> u32 {
        match &self.data {
            FoeData::Bridge(br) => br.data,
            FoeData::Ipv4(v4) => v4.data,
            FoeData::Ipv6(v6) => v6.data,
        }
    }

    pub fn qdata_mut(&mut self) -> &mut u32 {
        match &mut self.data {
            FoeData::Bridge(br) => &mut br.data,
            FoeData::Ipv4(v4) => &mut v4.data,
            FoeData::Ipv6(v6) => &mut v6.data,
        }
    }

    pub fn l2(&self) -> &MacInfo {
        match &self.data {
            FoeData::Bridge(br) => &br.l2,
            FoeData::Ipv4(v4) => &v4.l2,
            FoeData::Ipv6(v6) => &v6.l2,
        }
    }

    pub fn l2_mut(&mut self) -> &mut MacInfo {
        match &mut self.data {
            FoeData::Bridge(br) => &mut br.l2,
            FoeData::Ipv4(v4) => &mut v4.l2,
            FoeData::Ipv6(v6) => &mut v6.l2,
        }
    }

    /// The source-MAC rewrite index, which only the IPv6 layout has.
    pub fn smac_id(&self) -> Option<u8> {
        match &self.data {
            FoeData::Ipv6(v6) => Some(v6.l2.smac_id()),
            _ => None,
        }
    }

    pub fn bridge_key(&self) -> Option<BridgeKey> {
        match &self.data {
            FoeData::Bridge(br) => Some(br.key()),
            _ => None,
        }
    }

    /// Does the hardware record `hw` describe the same flow as this
    /// one? Only the fields identifying the flow take part: the UDP
    /// bit, the packet type, and the addressing of the matching arm.
    pub fn same_flow(&self, hw: &FoeEntry) -> bool {
        if self.ib1.contains(Ib1Flags::UDP) != hw.ib1.contains(Ib1Flags::UDP)
        {
            return false;
        }

        if self.ib1.packet_type_raw() != hw.ib1.packet_type_raw() {
            return false;
        }

        match (&self.data, &hw.data) {
            (FoeData::Ipv4(a), FoeData::Ipv4(b)) => {
                a.orig_tuple == b.orig_tuple && a.new_tuple == b.new_tuple
            }
            (FoeData::Ipv6(a), FoeData::Ipv6(b)) => {
                a.src_ip == b.src_ip
                    && a.dest_ip == b.dest_ip
                    && a.ports() == b.ports()
            }
            (FoeData::Bridge(a), FoeData::Bridge(b)) => a.key() == b.key(),
            _ => false,
        }
    }

    pub fn to_raw(&self) -> FoeEntryRaw {
        let mut raw = FoeEntryRaw { ib1: self.ib1.bits(), ..Default::default() };
        let d = &mut raw.d;

        match &self.data {
            FoeData::Bridge(br) => {
                d[0] = br.dest_mac_hi;
                d[1] = lohi(br.src_mac_hi, br.dest_mac_lo);
                d[2] = br.src_mac_lo;
                d[3] = br.ib2.bits();
                d[9] = br.data;
                br.l2.encode(&mut d[10..16]);
            }

            FoeData::Ipv4(v4) => {
                v4.orig_tuple.encode(&mut d[0..3]);
                v4.new_tuple.encode(&mut d[3..6]);
                d[6] = v4.ib2.bits();
                d[7] = v4.data;
                v4.l2.encode(&mut d[8..14]);
            }

            FoeData::Ipv6(v6) => {
                d[0..4].copy_from_slice(&v6.src_ip);
                d[4..8].copy_from_slice(&v6.dest_ip);
                d[8] = v6.ports();
                d[9] = v6.data;
                d[10] = v6.ib2.bits();
                v6.l2.encode_common(&mut d[11..15]);
                d[15] = v6.l2.meter;
            }
        }

        raw
    }

    pub fn from_raw(raw: &FoeEntryRaw) -> Self {
        let ib1 = Ib1(raw.ib1);
        let d = &raw.d;

        let data = match FoeData::for_type(ib1.packet_type_raw()) {
            FoeData::Bridge(_) => {
                let (src_mac_hi, dest_mac_lo) = split(d[1]);
                FoeData::Bridge(FoeBridge {
                    dest_mac_hi: d[0],
                    src_mac_hi,
                    dest_mac_lo,
                    src_mac_lo: d[2],
                    ib2: Ib2(d[3]),
                    data: d[9],
                    l2: MacInfo::decode(&d[10..16]),
                })
            }

            FoeData::Ipv4(_) => FoeData::Ipv4(FoeIpv4 {
                orig_tuple: Ipv4Tuple::decode(&d[0..3]),
                new_tuple: Ipv4Tuple::decode(&d[3..6]),
                ib2: Ib2(d[6]),
                data: d[7],
                l2: MacInfo::decode(&d[8..14]),
            }),

            FoeData::Ipv6(_) => {
                let (dest_port, src_port) = split(d[8]);
                let mut l2 = MacInfo::decode_common(&d[11..15]);
                l2.meter = d[15];
                FoeData::Ipv6(FoeIpv6 {
                    src_ip: [d[0], d[1], d[2], d[3]],
                    dest_ip: [d[4], d[5], d[6], d[7]],
                    dest_port,
                    src_port,
                    data: d[9],
                    ib2: Ib2(d[10]),
                    l2,
                })
            }
        };

        Self { ib1, data }
    }
}

/// Pack two half-words the way a little-endian `{ u16 lo; u16 hi; }`
/// pair sits in a word.
pub const fn lohi(lo: u16, hi: u16) -> u32 {
    lo as u32 | (hi as u32) << 16
}

pub const fn split(w: u32) -> (u16, u16) {
    (w as u16, (w >> 16) as u16)
}

#[cfg(test)]
mod test {
    use super::*;

    fn hnapt() -> FoeEntry {
        let mut ib1 = Ib1::default();
        ib1.set_state(BindState::Bind);
        ib1.set_packet_type(PacketType::Ipv4Hnapt);
        ib1.insert(Ib1Flags::UDP);
        let mut e = FoeEntry::new(ib1);
        let FoeData::Ipv4(v4) = &mut e.data else { panic!() };
        v4.orig_tuple = Ipv4Tuple {
            src_ip: 0x0a00_0001,
            dest_ip: 0x0a00_0002,
            dest_port: 80,
            src_port: 1234,
        };
        v4.new_tuple = v4.orig_tuple;
        v4.data = 0x7f << 16;
        v4.l2.dest_mac_hi = 0xaabb_ccdd;
        e
    }

    #[test]
    fn ib1_fields() {
        let mut ib1 = Ib1::default();
        ib1.set_state(BindState::Unbind);
        ib1.set_packet_type(PacketType::Ipv6Route5T);
        ib1.set_bind_timestamp(0x7fff);
        ib1.set_vlan_layer(2);
        assert_eq!(ib1.state(), BindState::Unbind);
        assert_eq!(ib1.packet_type(), Some(PacketType::Ipv6Route5T));
        assert_eq!(ib1.bind_timestamp(), 0x7fff);
        assert_eq!(ib1.unbind_timestamp(), 0xff);
        assert_eq!(ib1.vlan_layer(), 2);

        ib1.set_bind_timestamp(0x1_0001);
        assert_eq!(ib1.bind_timestamp(), 1);
        assert_eq!(ib1.state(), BindState::Unbind);
    }

    #[test]
    fn raw_layout_is_fixed() {
        assert_eq!(core::mem::size_of::<FoeEntryRaw>(), PPE_ENTRY_SIZE);
        let raw = hnapt().to_raw();
        assert_eq!(raw.d[0], 0x0a00_0001);
        assert_eq!(raw.d[2], lohi(80, 1234));
        assert_eq!(raw.d[7], 0x7f << 16);
        assert_eq!(raw.d[9], 0xaabb_ccdd);
        assert_eq!(raw.as_bytes().len(), PPE_ENTRY_SIZE);
    }

    #[test]
    fn decode_picks_arm_from_type() {
        let e = hnapt();
        assert_eq!(FoeEntry::from_raw(&e.to_raw()), e);

        let mut raw = e.to_raw();
        let mut ib1 = Ib1::from_bits(raw.ib1);
        ib1.set_packet_type(PacketType::Ipv6Route3T);
        raw.ib1 = ib1.bits();
        let v6 = FoeEntry::from_raw(&raw);
        let FoeData::Ipv6(v6) = v6.data else { panic!("wrong arm") };
        assert_eq!(v6.src_ip[0], 0x0a00_0001);

        // The undefined type 6 is laid out as IPv6.
        raw.ib1 = field_prep(genmask(27, 25), 6);
        assert!(matches!(FoeEntry::from_raw(&raw).data, FoeData::Ipv6(_)));
    }

    #[test]
    fn same_flow_ignores_state_and_timestamps() {
        let a = hnapt();
        let mut b = a;
        b.ib1.set_state(BindState::Unbind);
        b.ib1.set_bind_timestamp(99);
        *b.ib2_mut() = Ib2::from_bits(0xffff_ffff);
        assert!(a.same_flow(&b));

        let mut c = a;
        c.ib1 = Ib1::from_bits(c.ib1.bits() & !Ib1Flags::UDP.bits());
        assert!(!a.same_flow(&c));

        let mut d = a;
        if let FoeData::Ipv4(v4) = &mut d.data {
            v4.new_tuple.src_port = 1;
        }
        assert!(!a.same_flow(&d));
    }

    #[test]
    fn bridge_key_roundtrip() {
        let dest: MacAddr = "AA:AA:AA:AA:AA:AA".parse().unwrap();
        let src: MacAddr = "02:01:02:03:04:05".parse().unwrap();
        let mut br = FoeBridge::default();
        br.set_addrs(dest, src);
        assert_eq!(br.src_mac_hi, 0x0201);
        assert_eq!(br.src_mac_lo, 0x0203_0405);
        assert_eq!(br.key(), BridgeKey { dest, src });
    }

    #[test]
    fn subflow_ib1_merge() {
        let mut hw = Ib1::default();
        hw.set_packet_type(PacketType::Ipv6Route5T);
        hw.insert(Ib1Flags::UDP);
        hw.set_state(BindState::Unbind);

        let mut agg = Ib1::default();
        agg.set_packet_type(PacketType::Bridge);
        agg.set_state(BindState::Bind);
        agg.insert(Ib1Flags::TTL);

        let merged = hw.merge(agg, Ib1::SUBFLOW_KEEP);
        assert_eq!(merged.packet_type(), Some(PacketType::Ipv6Route5T));
        assert!(merged.contains(Ib1Flags::UDP | Ib1Flags::TTL));
        assert_eq!(merged.state(), BindState::Bind);
    }
}
