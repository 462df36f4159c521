// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

// Let's make our lives easier and pub use a bunch of stuff.
pub use ppe::api::*;
pub use ppe::ddi::time::Moment;
pub use ppe::engine::flow_table::FlowKind;
pub use ppe::engine::foe::BindState;
pub use ppe::engine::foe::FoeData;
pub use ppe::engine::foe::FoeEntry;
pub use ppe::engine::foe::Ib1Flags;
pub use ppe::engine::foe::PPE_SRAM_NUM_ENTRIES;
pub use ppe::engine::foe::PacketType;
pub use ppe::engine::npu::FoeStats;
pub use ppe::engine::ppe::Ppe;
pub use ppe::engine::prepare::EthAddrs;
pub use ppe::engine::prepare::FlowAddrs;
pub use ppe::engine::prepare::FlowData;
pub use ppe::engine::prepare::Egress;
pub use ppe::engine::prepare::prepare_entry;
pub use ppe::engine::prepare::set_ipv6_tuple;
pub use ppe::engine::sim::SimHw;
pub use ppe::engine::sim::SimNetDevs;
pub use ppe::engine::sim::SimNpuLoad;
pub use ppe::engine::sim::SimNpuProvider;
pub use ppe::provider::CaptureLog;
pub use ppe::provider::LogLevel;
pub use ppe::provider::Providers;
pub use smoltcp::wire::EthernetProtocol;
pub use std::net::Ipv4Addr;
pub use std::net::Ipv6Addr;
pub use std::sync::Arc;

use smoltcp::wire::EthernetFrame;
use smoltcp::wire::EthernetRepr;

/// Uplink device, straight out of frame-engine port 2.
pub const WAN_IFINDEX: u32 = 2;
/// LAN device, switch port 1 behind frame-engine port 1.
pub const LAN_IFINDEX: u32 = 3;

pub const GW_MAC: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 0x01]);
pub const HOST_MAC: MacAddr = MacAddr::from_const([0x02, 0, 0, 0, 0, 0x02]);

/// An engine over simulated hardware, with handles on everything a
/// test may want to poke at.
pub struct TestPpe {
    pub ppe: Ppe,
    pub hw: Arc<SimHw>,
    pub npu: Arc<SimNpuProvider>,
    pub log: Arc<CaptureLog>,
}

impl Default for TestPpe {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPpe {
    pub fn new() -> Self {
        Self::with(PpeCfg::default(), SimNpuLoad::Loaded)
    }

    pub fn with(cfg: PpeCfg, load: SimNpuLoad) -> Self {
        let hw = Arc::new(SimHw::new());
        let npu = Arc::new(SimNpuProvider::new(hw.clone(), load));
        let log = Arc::new(CaptureLog::default());
        let netdevs = SimNetDevs::default()
            .with(WAN_IFINDEX, Egress::Gdm { id: 2 })
            .with(LAN_IFINDEX, Egress::Dsa { port: 1, conduit: 1 });

        let ppe = Ppe::new(
            cfg,
            Providers { log: Box::new(log.clone()) },
            hw.clone(),
            Box::new(npu.clone()),
            Box::new(netdevs),
        );

        Self { ppe, hw, npu, log }
    }

    /// Run a classifier-offload request, returning its stats output.
    pub fn offload(
        &self,
        mut f: FlowClsOffload,
    ) -> Result<FlowStats, PpeError> {
        self.ppe.setup_tc_block_cb(&mut f)?;
        Ok(f.stats)
    }

    pub fn replace(&self, cookie: u64, rule: FlowRule) -> Result<(), PpeError> {
        self.offload(FlowClsOffload::replace(cookie, rule)).map(|_| ())
    }

    pub fn destroy(&self, cookie: u64) -> Result<(), PpeError> {
        self.offload(FlowClsOffload::destroy(cookie)).map(|_| ())
    }

    pub fn stats(&self, cookie: u64) -> Result<FlowStats, PpeError> {
        self.offload(FlowClsOffload::stats(cookie))
    }

    /// Play the hardware learning the pending flow `cookie`: put its
    /// record, unbound, at its own hash and sample that slot.
    ///
    /// Returns the slot.
    pub fn learn(&self, cookie: u64) -> u32 {
        let e = self.ppe.flow_entry(cookie).expect("no such flow");
        let slot = self.ppe.hash_of(&e.data);
        self.present(slot, &unbound(&e.data), &any_frame());
        slot
    }

    /// Put `hwe` at `slot` and sample it with `frame`.
    pub fn present(&self, slot: u32, hwe: &FoeEntry, frame: &[u8]) {
        self.ppe.set_hw_entry(slot, hwe).expect("failed to set hw entry");
        self.ppe.on_sample(frame, slot);
    }

    /// Was a message containing `needle` logged at `level`?
    pub fn logged(&self, level: LogLevel, needle: &str) -> bool {
        self.log.take().iter().any(|(l, m)| *l == level && m.contains(needle))
    }
}

/// The default configuration, but looking at every sample however
/// close together.
pub fn unthrottled() -> PpeCfg {
    PpeCfg { sample_interval_ms: 0, ..Default::default() }
}

/// A copy of `e` in the unbound state, as the hardware holds a flow it
/// has seen but not yet been told how to forward.
pub fn unbound(e: &FoeEntry) -> FoeEntry {
    let mut hwe = *e;
    hwe.ib1.set_state(BindState::Unbind);
    hwe
}

/// A minimum-size Ethernet frame.
pub fn eth_frame(
    dst: MacAddr,
    src: MacAddr,
    ethertype: EthernetProtocol,
) -> Vec<u8> {
    let repr = EthernetRepr {
        src_addr: src.into(),
        dst_addr: dst.into(),
        ethertype,
    };
    let mut buf = vec![0u8; 60];
    let mut frame = EthernetFrame::new_unchecked(&mut buf);
    repr.emit(&mut frame);
    buf
}

/// A frame whose MAC pair belongs to no L2 flow.
pub fn any_frame() -> Vec<u8> {
    eth_frame(HOST_MAC, GW_MAC, EthernetProtocol::Ipv4)
}

/// The mangles rewriting both MAC addresses, as the classifier
/// expresses them: 32-bit words over the 12 bytes of address.
pub fn eth_mangles(dst: MacAddr, src: MacAddr) -> Vec<FlowAction> {
    let d = dst.bytes();
    let s = src.bytes();
    let mangle = |offset, mask, val| {
        FlowAction::Mangle(Mangle { htype: MangleHdr::Eth, offset, mask, val })
    };

    vec![
        mangle(0, [0; 4], [d[0], d[1], d[2], d[3]]),
        mangle(4, [0, 0, 0xff, 0xff], [d[4], d[5], 0, 0]),
        mangle(4, [0xff, 0xff, 0, 0], [0, 0, s[0], s[1]]),
        mangle(8, [0; 4], [s[2], s[3], s[4], s[5]]),
    ]
}

/// An IPv4 rule forwarded to the uplink with the source address and
/// port left as they are.
pub fn ipv4_rule(
    proto: u8,
    src: Ipv4Addr,
    sport: u16,
    dst: Ipv4Addr,
    dport: u16,
) -> FlowRule {
    let mut actions = eth_mangles(GW_MAC, HOST_MAC);
    actions.push(FlowAction::Redirect { ifindex: WAN_IFINDEX });

    FlowRule {
        meta: true,
        control: Some(ControlMatch { addr_type: AddrType::Ipv4, flags: 0 }),
        basic: Some(BasicMatch { n_proto: ETH_P_IP, ip_proto: proto }),
        ipv4_addrs: Some(Ipv4AddrsMatch { src, dst }),
        ports: Some(PortsMatch { src: sport, dst: dport }),
        actions,
        ..Default::default()
    }
}

/// Add a source NAT to `rule`.
pub fn snat(mut rule: FlowRule, addr: Ipv4Addr, port: u16) -> FlowRule {
    rule.actions.push(FlowAction::Mangle(Mangle {
        htype: MangleHdr::Ip4,
        offset: 12,
        mask: [0; 4],
        val: addr.octets(),
    }));
    let p = port.to_be_bytes();
    rule.actions.push(FlowAction::Mangle(Mangle {
        htype: MangleHdr::Tcp,
        offset: 0,
        mask: [0, 0, 0xff, 0xff],
        val: [p[0], p[1], 0, 0],
    }));
    rule
}

pub fn ipv6_rule(
    proto: u8,
    src: Ipv6Addr,
    sport: u16,
    dst: Ipv6Addr,
    dport: u16,
) -> FlowRule {
    let mut actions = eth_mangles(GW_MAC, HOST_MAC);
    actions.push(FlowAction::Redirect { ifindex: LAN_IFINDEX });

    FlowRule {
        meta: true,
        control: Some(ControlMatch { addr_type: AddrType::Ipv6, flags: 0 }),
        basic: Some(BasicMatch { n_proto: ETH_P_IPV6, ip_proto: proto }),
        ipv6_addrs: Some(Ipv6AddrsMatch { src, dst }),
        ports: Some(PortsMatch { src: sport, dst: dport }),
        actions,
        ..Default::default()
    }
}

pub fn bridge_rule(dst: MacAddr, src: MacAddr) -> FlowRule {
    FlowRule {
        meta: true,
        control: Some(ControlMatch { addr_type: AddrType::None, flags: 0 }),
        basic: Some(BasicMatch::default()),
        eth_addrs: Some(EthAddrsMatch { dst, src }),
        actions: vec![FlowAction::Redirect { ifindex: LAN_IFINDEX }],
        ..Default::default()
    }
}

/// A bridge record for a MAC pair, built without the rule checks.
pub fn bridge_entry(dst: MacAddr, src: MacAddr) -> FoeEntry {
    let data = FlowData {
        eth: EthAddrs { dest: dst, source: src },
        ..Default::default()
    };
    prepare_entry(None, PacketType::Bridge, &data, 0)
        .expect("failed to prepare bridge entry")
}

/// The IPv6 5-tuple record the hardware keeps for a flow it has seen.
pub fn ipv6_record(
    src: Ipv6Addr,
    sport: u16,
    dst: Ipv6Addr,
    dport: u16,
) -> FoeEntry {
    let data = FlowData {
        addrs: FlowAddrs::V6 { src, dst },
        src_port: sport,
        dst_port: dport,
        ..Default::default()
    };
    let mut e = prepare_entry(None, PacketType::Ipv6Route5T, &data, IPPROTO_TCP)
        .expect("failed to prepare IPv6 record");
    set_ipv6_tuple(&mut e, &data).expect("failed to set IPv6 tuple");
    unbound(&e)
}
