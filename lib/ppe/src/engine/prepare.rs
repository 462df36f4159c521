// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Building flow-table records from a classified flow.
//!
//! [`prepare_entry()`] turns the L2 half of a flow (addresses, VLAN
//! and PPPoE pushes, egress port) into a bound record of the requested
//! packet type; [`set_ipv4_tuple()`] and [`set_ipv6_tuple()`] then
//! fill in the L3/L4 addressing.

use super::foe::BindState;
use super::foe::FoeData;
use super::foe::FoeEntry;
use super::foe::Ib1;
use super::foe::Ib1Flags;
use super::foe::Ib2Flags;
use super::foe::PacketType;
use super::foe::QDATA_SHAPER_ID;
use super::foe::ROUTE_PORTS_PAD;
use super::foe::SMAC_ID_KEEP;
use super::regs::field_prep;
use crate::api::Direction;
use crate::api::ETH_P_IP;
use crate::api::ETH_P_IPV6;
use crate::api::ETH_P_PPP_SES;
use crate::api::IPPROTO_UDP;
use crate::api::MacAddr;
use crate::api::PpeError;
use core::net::Ipv4Addr;
use core::net::Ipv6Addr;
use heapless::Vec;

/// The LAN-facing frame-engine port.
pub const GDM1: u8 = 1;
pub const GDM2: u8 = 2;
pub const GDM4: u8 = 4;
pub const MAX_NUM_GDM_PORTS: u8 = 4;

/// Packet-switch port numbers used in `ib2`.
const PSE_PORT_GDM2: u8 = 2;
const PSE_PORT_GDM4: u8 = 9;

pub const MAX_VLANS: usize = 2;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EthAddrs {
    pub dest: MacAddr,
    pub source: MacAddr,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct VlanHdr {
    pub id: u16,
    pub proto: u16,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum FlowAddrs {
    #[default]
    None,
    V4 {
        src: Ipv4Addr,
        dst: Ipv4Addr,
    },
    V6 {
        src: Ipv6Addr,
        dst: Ipv6Addr,
    },
}

/// Everything gathered about a flow from its match keys and actions.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FlowData {
    pub eth: EthAddrs,
    pub vlan: Vec<VlanHdr, MAX_VLANS>,
    /// The pushed PPPoE session, if any.
    pub pppoe: Option<u16>,
    pub addrs: FlowAddrs,
    pub src_port: u16,
    pub dst_port: u16,
}

/// Where an offloaded flow leaves the frame engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Egress {
    /// Straight out of frame-engine port `id`.
    Gdm { id: u8 },
    /// Out of switch port `port`, reached through frame-engine port
    /// `conduit`.
    Dsa { port: u8, conduit: u8 },
}

impl Egress {
    pub fn gdm_id(&self) -> u8 {
        match self {
            Self::Gdm { id } => *id,
            Self::Dsa { conduit, .. } => *conduit,
        }
    }

    fn dsa_port(&self) -> Option<u8> {
        match self {
            Self::Gdm { .. } => None,
            Self::Dsa { port, .. } => Some(*port),
        }
    }
}

/// Build a bound record of type `ptype` for `data`.
///
/// The record carries no L3/L4 addressing yet, except for the ports
/// padding of route types, which has no other source.
pub fn prepare_entry(
    egress: Option<Egress>,
    ptype: PacketType,
    data: &FlowData,
    l4proto: u8,
) -> Result<FoeEntry, PpeError> {
    let dsa_port = egress.and_then(|e| e.dsa_port());
    let nvlan = data.vlan.len() as u8;

    let mut ib1 = Ib1::default();
    ib1.set_state(BindState::Bind);
    ib1.set_packet_type(ptype);
    ib1.set_vlan_layer(nvlan);
    ib1.insert(Ib1Flags::TTL);
    if l4proto == IPPROTO_UDP {
        ib1.insert(Ib1Flags::UDP);
    }
    if data.pppoe.is_some() {
        ib1.insert(Ib1Flags::PPPOE);
    }

    let mut entry = FoeEntry::new(ib1);
    let ib2 = entry.ib2_mut();
    ib2.set_port_ag(0x1f);
    ib2.insert(Ib2Flags::PSE_QOS);
    if let Some(port) = dsa_port {
        ib2.set_nbq(port);
    }

    let mut smac_id = SMAC_ID_KEEP;
    if let Some(egress) = egress {
        let id = egress.gdm_id();
        if id == 0 || id > MAX_NUM_GDM_PORTS {
            return Err(PpeError::NoDevice(format!("GDM port {id}")));
        }

        let pse_port = match egress {
            Egress::Dsa { conduit: GDM4, .. } => PSE_PORT_GDM4,
            Egress::Dsa { conduit, .. } => conduit,
            // Uplink relies on GDM2 loopback.
            Egress::Gdm { .. } => PSE_PORT_GDM2,
        };
        ib2.set_pse_port(pse_port);

        // Downlink traffic uses SRAM for its forwarding descriptors.
        if id == GDM1 {
            ib2.insert(Ib2Flags::FAST_PATH);
        }

        smac_id = id;
    }

    if data.eth.dest.is_multicast() {
        ib2.insert(Ib2Flags::MULTICAST);
    }

    let ports_pad = ROUTE_PORTS_PAD | l4proto as u32;
    *entry.qdata_mut() = field_prep(QDATA_SHAPER_ID, 0x7f);

    match &mut entry.data {
        FoeData::Bridge(br) => {
            br.set_addrs(data.eth.dest, data.eth.source);
        }
        FoeData::Ipv4(v4) => {
            if ptype == PacketType::Ipv4Route {
                v4.orig_tuple.set_ports(ports_pad);
            }
            v4.l2.etype = ETH_P_IP;
        }
        FoeData::Ipv6(v6) => {
            if ptype == PacketType::Ipv6Route3T {
                (v6.dest_port, v6.src_port) = super::foe::split(ports_pad);
            }
            v6.l2.etype = ETH_P_IPV6;
        }
    }

    let is_ipv6 = matches!(entry.data, FoeData::Ipv6(_));
    let l2 = entry.l2_mut();
    l2.dest_mac_hi = data.eth.dest.hi();
    l2.dest_mac_lo = data.eth.dest.lo();
    if is_ipv6 {
        l2.src_mac_hi = 0;
        l2.set_smac_id(smac_id);
        l2.src_mac_hi |= data.pppoe.unwrap_or(0) as u32;
    } else {
        l2.src_mac_hi = data.eth.source.hi();
        l2.src_mac_lo = data.eth.source.lo();
        l2.pppoe_id = data.pppoe.unwrap_or(0);
    }

    if let Some(v) = data.vlan.first() {
        l2.vlan1 = v.id;
    }
    if let Some(v) = data.vlan.get(1) {
        l2.vlan2 = v.id;
    }

    if let Some(port) = dsa_port {
        l2.etype = 1 << port;
        if data.vlan.is_empty() {
            l2.etype |= 1 << 15;
        }
    } else if data.pppoe.is_some() {
        l2.etype = ETH_P_PPP_SES;
    }

    Ok(entry)
}

/// Write the IPv4 addresses and ports of `data` into the tuple of
/// `entry` selected by its type and `dir`: the translated tuple for
/// the egress side of a NAPT flow, the original tuple otherwise.
pub fn set_ipv4_tuple(
    entry: &mut FoeEntry,
    data: &FlowData,
    dir: Direction,
) -> Result<(), PpeError> {
    let ptype = entry.packet_type();
    let FlowAddrs::V4 { src, dst } = data.addrs else {
        return Err(PpeError::BadRule("missing IPv4 addresses".into()));
    };

    let v4 = match (&mut entry.data, ptype) {
        (
            FoeData::Ipv4(v4),
            Some(
                PacketType::Ipv4Hnapt
                | PacketType::Ipv4Dslite
                | PacketType::Ipv4Route,
            ),
        ) => v4,
        _ => {
            return Err(PpeError::BadRule(format!(
                "no IPv4 tuple in packet type {}",
                entry.ib1.packet_type_raw()
            )));
        }
    };

    let t = if ptype == Some(PacketType::Ipv4Hnapt) && dir == Direction::Egress
    {
        &mut v4.new_tuple
    } else {
        &mut v4.orig_tuple
    };

    t.src_ip = u32::from(src);
    t.dest_ip = u32::from(dst);

    if ptype != Some(PacketType::Ipv4Route) {
        t.src_port = data.src_port;
        t.dest_port = data.dst_port;
    }

    Ok(())
}

/// Write the IPv6 addresses, and the ports for the 5-tuple types.
pub fn set_ipv6_tuple(
    entry: &mut FoeEntry,
    data: &FlowData,
) -> Result<(), PpeError> {
    let ptype = entry.packet_type();
    let FlowAddrs::V6 { src, dst } = data.addrs else {
        return Err(PpeError::BadRule("missing IPv6 addresses".into()));
    };

    let FoeData::Ipv6(v6) = &mut entry.data else {
        return Err(PpeError::BadRule(format!(
            "no IPv6 tuple in packet type {}",
            entry.ib1.packet_type_raw()
        )));
    };

    match ptype {
        Some(PacketType::Ipv6Route5T | PacketType::Ipv6_6rd) => {
            v6.src_port = data.src_port;
            v6.dest_port = data.dst_port;
        }
        Some(PacketType::Ipv6Route3T) => {}
        _ => {
            return Err(PpeError::BadRule(format!(
                "no IPv6 tuple in packet type {}",
                entry.ib1.packet_type_raw()
            )));
        }
    }

    v6.src_ip = ipv6_words(src);
    v6.dest_ip = ipv6_words(dst);
    Ok(())
}

/// An IPv6 address as four host-order words, most significant first.
fn ipv6_words(addr: Ipv6Addr) -> [u32; 4] {
    let o = addr.octets();
    core::array::from_fn(|i| {
        u32::from_be_bytes([o[4 * i], o[4 * i + 1], o[4 * i + 2], o[4 * i + 3]])
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::foe::MAC_SMAC_ID;
    use crate::engine::regs::field_get;

    fn flow() -> FlowData {
        FlowData {
            eth: EthAddrs {
                dest: "02:AA:AA:AA:AA:01".parse().unwrap(),
                source: "02:BB:BB:BB:BB:02".parse().unwrap(),
            },
            addrs: FlowAddrs::V4 {
                src: "10.0.0.1".parse().unwrap(),
                dst: "10.0.0.2".parse().unwrap(),
            },
            src_port: 1234,
            dst_port: 80,
            ..Default::default()
        }
    }

    #[test]
    fn prepare_is_deterministic() {
        let data = flow();
        let egress = Some(Egress::Gdm { id: GDM1 });
        let a = prepare_entry(egress, PacketType::Ipv4Hnapt, &data, 6).unwrap();
        let b = prepare_entry(egress, PacketType::Ipv4Hnapt, &data, 6).unwrap();
        assert_eq!(a.to_raw(), b.to_raw());
    }

    #[test]
    fn ipv4_hnapt_fields() {
        let data = flow();
        let egress = Some(Egress::Gdm { id: GDM1 });
        let mut e =
            prepare_entry(egress, PacketType::Ipv4Hnapt, &data, IPPROTO_UDP)
                .unwrap();

        assert_eq!(e.ib1.state(), BindState::Bind);
        assert!(e.ib1.contains(Ib1Flags::UDP | Ib1Flags::TTL));
        assert!(!e.ib1.contains(Ib1Flags::PPPOE));
        assert_eq!(e.ib2().pse_port(), PSE_PORT_GDM2);
        assert!(e.ib2().flags().contains(Ib2Flags::FAST_PATH | Ib2Flags::PSE_QOS));
        assert_eq!(e.l2().etype, ETH_P_IP);
        assert_eq!(e.l2().src_mac_lo, 0xbb02);
        assert_eq!(e.qdata(), 0x7f << 16);

        set_ipv4_tuple(&mut e, &data, Direction::Ingress).unwrap();
        set_ipv4_tuple(&mut e, &data, Direction::Egress).unwrap();
        let FoeData::Ipv4(v4) = e.data else { panic!() };
        assert_eq!(v4.orig_tuple.src_ip, 0x0a00_0001);
        assert_eq!(v4.orig_tuple.dest_port, 80);
        assert_eq!(v4.new_tuple, v4.orig_tuple);
    }

    #[test]
    fn route_pads_ports() {
        let data = flow();
        let mut e = prepare_entry(None, PacketType::Ipv4Route, &data, 6).unwrap();
        set_ipv4_tuple(&mut e, &data, Direction::Ingress).unwrap();
        let FoeData::Ipv4(v4) = e.data else { panic!() };
        assert_eq!(v4.orig_tuple.ports(), 0xa5a5_a506);
    }

    #[test]
    fn ipv6_smac_and_pppoe() {
        let mut data = flow();
        data.pppoe = Some(0x42);
        data.addrs = FlowAddrs::V6 {
            src: "fd00::1".parse().unwrap(),
            dst: "fd00::2".parse().unwrap(),
        };
        let mut e = prepare_entry(
            Some(Egress::Gdm { id: 2 }),
            PacketType::Ipv6Route5T,
            &data,
            6,
        )
        .unwrap();
        assert_eq!(e.smac_id(), Some(2));
        assert_eq!(e.l2().src_mac_hi & 0xffff, 0x42);
        assert_eq!(e.l2().etype, ETH_P_PPP_SES);
        assert!(e.ib1.contains(Ib1Flags::PPPOE));

        set_ipv6_tuple(&mut e, &data).unwrap();
        let FoeData::Ipv6(v6) = e.data else { panic!() };
        assert_eq!(v6.src_ip, [0xfd00_0000, 0, 0, 1]);
        assert_eq!(v6.src_port, 1234);

        // Without an egress port the source MAC is left alone.
        let e = prepare_entry(None, PacketType::Ipv6Route5T, &data, 6).unwrap();
        assert_eq!(field_get(MAC_SMAC_ID, e.l2().src_mac_hi), 0xf);
    }

    #[test]
    fn dsa_egress() {
        let mut data = flow();
        data.vlan.push(VlanHdr { id: 100, proto: 0x8100 }).unwrap();
        let e = prepare_entry(
            Some(Egress::Dsa { port: 3, conduit: GDM4 }),
            PacketType::Ipv4Hnapt,
            &data,
            6,
        )
        .unwrap();
        assert_eq!(e.ib2().nbq(), 3);
        assert_eq!(e.ib2().pse_port(), PSE_PORT_GDM4);
        assert_eq!(e.l2().etype, 1 << 3);
        assert_eq!(e.l2().vlan1, 100);
        assert_eq!(e.ib1.vlan_layer(), 1);
    }

    #[test]
    fn bad_egress_port() {
        let err = prepare_entry(
            Some(Egress::Gdm { id: 7 }),
            PacketType::Ipv4Hnapt,
            &flow(),
            6,
        )
        .unwrap_err();
        assert!(matches!(err, PpeError::NoDevice(_)));
    }

    #[test]
    fn multicast_dest() {
        let mut data = flow();
        data.eth.dest = "01:00:5E:00:00:01".parse().unwrap();
        let e = prepare_entry(None, PacketType::Bridge, &data, 0).unwrap();
        assert!(e.ib2().flags().contains(Ib2Flags::MULTICAST));
        assert_eq!(e.bridge_key().unwrap().dest, data.eth.dest);
    }

    #[test]
    fn tuple_type_mismatch() {
        let data = flow();
        let mut e = prepare_entry(None, PacketType::Bridge, &data, 0).unwrap();
        assert!(set_ipv4_tuple(&mut e, &data, Direction::Ingress).is_err());
        assert!(set_ipv6_tuple(&mut e, &data).is_err());
    }
}
