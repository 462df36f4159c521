// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The classifier-offload entry point.
//!
//! Each request names a flow by its cookie. `Replace` turns the rule
//! into a flow-table record and registers it, `Destroy` retracts it
//! and `Stats` reports activity since the previous `Stats`.

use super::foe::FoeEntry;
use super::foe::PacketType;
use super::ppe::Ppe;
use super::prepare::Egress;
use super::prepare::FlowAddrs;
use super::prepare::FlowData;
use super::prepare::MAX_VLANS;
use super::prepare::VlanHdr;
use super::prepare::prepare_entry;
use super::prepare::set_ipv4_tuple;
use super::prepare::set_ipv6_tuple;
use crate::api::AddrType;
use crate::api::Direction;
use crate::api::ETH_P_8021Q;
use crate::api::FlowAction;
use crate::api::FlowClsOffload;
use crate::api::FlowCmd;
use crate::api::FlowRule;
use crate::api::FlowStats;
use crate::api::MacAddr;
use crate::api::Mangle;
use crate::api::MangleHdr;
use crate::api::PpeError;
use crate::ddi::time::MILLIS;
use crate::ddi::time::Moment;
use core::net::Ipv4Addr;

type Result<T> = core::result::Result<T, PpeError>;

/// Offset of the source address in an IPv4 header.
const IPV4_SADDR_OFF: u32 = 12;
/// Offset of the destination address in an IPv4 header.
const IPV4_DADDR_OFF: u32 = 16;

/// Resolution of the devices named by redirect actions.
pub trait NetDevs: Send + Sync {
    /// Where traffic sent to interface `ifindex` leaves the frame
    /// engine, or `None` if the interface is not one of ours.
    fn egress(&self, ifindex: u32) -> Option<Egress>;
}

fn unsupported(what: &str) -> PpeError {
    PpeError::Unsupported(what.into())
}

/// Apply an Ethernet header rewrite to the address pair.
///
/// Rewrites past the addresses are ignored. A mask of `ffff0000`
/// writes the low half of the value two bytes in; any other non-zero
/// mask writes the high half, and a zero mask the whole word.
fn mangle_eth(m: &Mangle, data: &mut FlowData) {
    if m.offset > 8 {
        return;
    }

    let mut hdr = [0u8; 12];
    hdr[..6].copy_from_slice(&data.eth.dest.bytes());
    hdr[6..].copy_from_slice(&data.eth.source.bytes());

    let mut off = m.offset as usize;
    let mut src = &m.val[..];
    if m.mask == [0xff, 0xff, 0, 0] {
        src = &m.val[2..];
        off += 2;
    }
    let len = if m.mask != [0; 4] { 2 } else { 4 };
    hdr[off..off + len].copy_from_slice(&src[..len]);

    let mut dest = [0u8; 6];
    let mut source = [0u8; 6];
    dest.copy_from_slice(&hdr[..6]);
    source.copy_from_slice(&hdr[6..]);
    data.eth.dest = MacAddr::from(dest);
    data.eth.source = MacAddr::from(source);
}

fn mangle_ports(m: &Mangle, data: &mut FlowData) -> Result<()> {
    let val = u32::from_be_bytes(m.val);

    match m.offset {
        0 if m.mask == [0xff, 0xff, 0, 0] => data.dst_port = val as u16,
        0 => data.src_port = (val >> 16) as u16,
        2 => data.dst_port = val as u16,
        off => {
            return Err(PpeError::BadRule(format!("port mangle at {off}")));
        }
    }

    Ok(())
}

fn mangle_ipv4(m: &Mangle, data: &mut FlowData) -> Result<()> {
    let FlowAddrs::V4 { src, dst } = &mut data.addrs else {
        return Err(PpeError::BadRule("IPv4 mangle without IPv4".into()));
    };

    let addr = Ipv4Addr::from(m.val);
    match m.offset {
        IPV4_SADDR_OFF => *src = addr,
        IPV4_DADDR_OFF => *dst = addr,
        off => {
            return Err(PpeError::BadRule(format!("IPv4 mangle at {off}")));
        }
    }

    Ok(())
}

/// Turn a classifier rule into a flow-table record.
///
/// # Errors
///
/// * [`PpeError::Unsupported`] for match keys or actions the engine
///   cannot offload.
/// * [`PpeError::BadRule`] for invalid MACs or mangle targets.
/// * [`PpeError::NoDevice`] if the redirect target is not ours.
pub fn parse_rule(netdevs: &dyn NetDevs, rule: &FlowRule) -> Result<FoeEntry> {
    if !rule.meta {
        return Err(unsupported("rule without meta key"));
    }

    let Some(control) = rule.control else {
        return Err(unsupported("rule without control key"));
    };
    if control.flags != 0 {
        return Err(unsupported("control flags"));
    }

    let Some(basic) = rule.basic else {
        return Err(unsupported("rule without basic key"));
    };
    let l4proto = basic.ip_proto;

    let mut data = FlowData::default();
    let ptype = match control.addr_type {
        AddrType::None => {
            let Some(eth) = rule.eth_addrs else {
                return Err(unsupported("bridge rule without addresses"));
            };
            data.eth.dest = eth.dst;
            data.eth.source = eth.src;
            PacketType::Bridge
        }
        AddrType::Ipv4 => PacketType::Ipv4Hnapt,
        AddrType::Ipv6 => PacketType::Ipv6Route5T,
        AddrType::Other(t) => {
            return Err(PpeError::Unsupported(format!("address type {t}")));
        }
    };
    let bridge = ptype == PacketType::Bridge;

    let mut egress = None;
    for act in &rule.actions {
        match act {
            FlowAction::Mangle(m) => {
                if bridge {
                    return Err(unsupported("mangle on bridge flow"));
                }
                if m.htype == MangleHdr::Eth {
                    mangle_eth(m, &mut data);
                }
            }

            FlowAction::Redirect { ifindex } => {
                let dev = netdevs.egress(*ifindex).ok_or_else(|| {
                    PpeError::NoDevice(format!("ifindex {ifindex}"))
                })?;
                egress = Some(dev);
            }

            FlowAction::Csum | FlowAction::VlanPop => {}

            FlowAction::VlanPush { vid, proto } => {
                if data.vlan.len() == MAX_VLANS || *proto != ETH_P_8021Q {
                    return Err(unsupported("VLAN push"));
                }
                data.vlan
                    .push(VlanHdr { id: *vid, proto: *proto })
                    .map_err(|_| unsupported("VLAN push"))?;
            }

            FlowAction::PppoePush { sid } => {
                if data.pppoe.is_some() || data.vlan.len() == MAX_VLANS {
                    return Err(unsupported("PPPoE push"));
                }
                data.pppoe = Some(*sid);
            }

            FlowAction::Drop => return Err(unsupported("drop")),
            FlowAction::Other(name) => {
                return Err(PpeError::Unsupported(format!("action {name}")));
            }
        }
    }

    if !data.eth.source.is_valid() || !data.eth.dest.is_valid() {
        return Err(PpeError::BadRule(format!(
            "invalid MAC pair {} -> {}",
            data.eth.source, data.eth.dest
        )));
    }

    let mut entry = prepare_entry(egress, ptype, &data, l4proto)?;

    match (rule.ports, bridge) {
        (Some(_), true) => return Err(unsupported("ports on bridge flow")),
        (Some(ports), false) => {
            data.src_port = ports.src;
            data.dst_port = ports.dst;
        }
        (None, false) => return Err(unsupported("rule without ports")),
        (None, true) => {}
    }

    match control.addr_type {
        AddrType::Ipv4 => {
            let addrs = rule
                .ipv4_addrs
                .ok_or_else(|| unsupported("rule without IPv4 addresses"))?;
            data.addrs = FlowAddrs::V4 { src: addrs.src, dst: addrs.dst };
            set_ipv4_tuple(&mut entry, &data, Direction::Ingress)?;
        }
        AddrType::Ipv6 => {
            let addrs = rule
                .ipv6_addrs
                .ok_or_else(|| unsupported("rule without IPv6 addresses"))?;
            data.addrs = FlowAddrs::V6 { src: addrs.src, dst: addrs.dst };
            set_ipv6_tuple(&mut entry, &data)?;
        }
        _ => {}
    }

    for act in &rule.actions {
        let FlowAction::Mangle(m) = act else {
            continue;
        };

        match m.htype {
            MangleHdr::Tcp | MangleHdr::Udp => mangle_ports(m, &mut data)?,
            MangleHdr::Ip4 => mangle_ipv4(m, &mut data)?,
            MangleHdr::Eth => {}
            MangleHdr::Ip6 => return Err(unsupported("IPv6 mangle")),
        }
    }

    if control.addr_type == AddrType::Ipv4 {
        set_ipv4_tuple(&mut entry, &data, Direction::Egress)?;
    }

    Ok(entry)
}

impl Ppe {
    /// Run one classifier-offload request, attaching the co-processor
    /// first if this is the first request since it was detached.
    pub fn setup_tc_block_cb(&self, f: &mut FlowClsOffload) -> Result<()> {
        let _token = self.offload_lock.lock();

        if !self.is_attached() {
            self.offload_setup()?;
        }

        match f.command {
            FlowCmd::Replace => self.flow_offload_replace(f.cookie, &f.rule),
            FlowCmd::Destroy => self.remove_entry(f.cookie),
            FlowCmd::Stats => self.flow_offload_stats(f.cookie, &mut f.stats),
            cmd => Err(PpeError::Unsupported(format!("{cmd:?}"))),
        }
    }

    fn flow_offload_replace(&self, cookie: u64, rule: &FlowRule) -> Result<()> {
        if self.lock_state().flows.lookup_cookie(cookie).is_some() {
            return Err(PpeError::FlowExists(cookie));
        }

        let entry = parse_rule(&*self.netdevs, rule)?;
        self.add_flow(cookie, entry)?;
        Ok(())
    }

    /// Report the flow's last activity and, when it holds a slot, the
    /// packets and bytes since the previous report, added to
    /// `stats`.
    fn flow_offload_stats(
        &self,
        cookie: u64,
        stats: &mut FlowStats,
    ) -> Result<()> {
        let mut st = self.lock_state();
        let id = st
            .flows
            .lookup_cookie(cookie)
            .ok_or(PpeError::FlowNotFound(cookie))?;

        let idle = self.idle_time(&mut st, id) as u64;
        stats.lastused =
            Moment::now().raw_millis().saturating_sub(idle * MILLIS);

        let Some((Some(slot), prev)) =
            st.flows.get(id).map(|e| (e.hash, e.stats))
        else {
            return Ok(());
        };

        if let Some(cur) = self.get_stats(&mut st, slot) {
            stats.pkts += cur.packets.saturating_sub(prev.packets);
            stats.bytes += cur.bytes.saturating_sub(prev.bytes);
            if let Some(e) = st.flows.get_mut(id) {
                e.stats = cur;
            }
        }

        Ok(())
    }
}
