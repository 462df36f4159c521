// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Integration tests.
//!
//! These drive the engine the way the control plane and the receive
//! path do, over the simulated frame engine and co-processor, and
//! check both the software flow table and what ended up in hardware.

use common::*;
use ppe::print::print_flows_into;
use ppe_test_utils as common;

// If we are running `cargo test`, then make sure to
// register the USDT probes before running any tests.
#[cfg(test)]
#[ctor::ctor]
fn register_usdt() {
    usdt::register_probes().unwrap();
}

const SRC4: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
const DST4: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

/// The slot hash of an IPv4 5-tuple, worked from the original tuple
/// the same way the hardware does.
fn ipv4_hash(src: Ipv4Addr, sport: u16, dst: Ipv4Addr, dport: u16) -> u32 {
    let hv1 = (sport as u32) << 16 | dport as u32;
    let hv2 = u32::from(dst);
    let hv3 = u32::from(src);

    let mut hash = (hv1 & hv2) | (!hv1 & hv3);
    hash = (hash >> 24) | ((hash & 0xff_ffff) << 8);
    hash ^= hv1 ^ hv2 ^ hv3;
    hash ^= hash >> 16;
    hash & PPE_HASH_MASK
}

/// A source port for `SRC4 -> DST4:80` whose slot is below `limit`.
fn sport_below(limit: u32) -> (u16, u32) {
    (1024..u16::MAX)
        .map(|p| (p, ipv4_hash(SRC4, p, DST4, 80)))
        .find(|(_, h)| *h < limit)
        .unwrap()
}

fn tcp4(sport: u16) -> FlowRule {
    ipv4_rule(IPPROTO_TCP, SRC4, sport, DST4, 80)
}

/// A port pair other than `sport -> 80` whose tuple lands in the same
/// bucket.
fn bucket_mate(sport: u16) -> (u16, u16) {
    let hash = ipv4_hash(SRC4, sport, DST4, 80);
    (1024..u16::MAX)
        .flat_map(|p| (1..1024u16).map(move |d| (p, d)))
        .find(|&(p, d)| {
            (p, d) != (sport, 80) && ipv4_hash(SRC4, p, DST4, d) == hash
        })
        .unwrap()
}

/// An unbound record of a flow nothing registers.
fn stranger() -> FoeEntry {
    ipv6_record(v6(0x99), 1, v6(0x98), 2)
}

fn bound_state(t: &TestPpe, slot: u32) -> BindState {
    t.ppe.hw_entry(slot).unwrap().ib1.state()
}

#[test]
fn hnapt_insertion() {
    let t = TestPpe::new();
    t.replace(42, tcp4(1234)).unwrap();

    let expected = ipv4_hash(SRC4, 1234, DST4, 80);
    let e = t.ppe.flow_entry(42).unwrap();
    assert_eq!(e.hash, None);
    assert_eq!(e.data.packet_type(), Some(PacketType::Ipv4Hnapt));
    assert_eq!(t.ppe.hash_of(&e.data), expected);

    t.present(expected, &unbound(&e.data), &any_frame());

    let e = t.ppe.flow_entry(42).unwrap();
    assert_eq!(e.hash, Some(expected));
    assert_eq!(e.data.ib1.state(), BindState::Bind);
    assert_eq!(bound_state(&t, expected), BindState::Bind);
    assert_eq!(t.ppe.dump_stats().commits, 1);
}

#[test]
fn snat_rewrites_new_tuple_only() {
    let t = TestPpe::new();
    let rule = snat(tcp4(1234), Ipv4Addr::new(192, 0, 2, 1), 40000);
    t.replace(1, rule).unwrap();

    let e = t.ppe.flow_entry(1).unwrap();
    let FoeData::Ipv4(v4) = e.data.data else {
        panic!("not an IPv4 record: {:?}", e.data);
    };
    assert_eq!(v4.orig_tuple.src_ip, u32::from(SRC4));
    assert_eq!(v4.orig_tuple.src_port, 1234);
    assert_eq!(v4.new_tuple.src_ip, u32::from(Ipv4Addr::new(192, 0, 2, 1)));
    assert_eq!(v4.new_tuple.src_port, 40000);
    assert_eq!(v4.new_tuple.dest_ip, u32::from(DST4));

    // The hash only covers the original tuple.
    assert_eq!(t.ppe.hash_of(&e.data), ipv4_hash(SRC4, 1234, DST4, 80));
}

#[test]
fn udp_flow_sets_udp_bit() {
    let t = TestPpe::new();
    t.replace(1, ipv4_rule(IPPROTO_UDP, SRC4, 53, DST4, 53)).unwrap();
    let e = t.ppe.flow_entry(1).unwrap();
    assert!(e.data.ib1.contains(Ib1Flags::UDP));
}

#[test]
fn duplicate_replace_is_rejected() {
    let t = TestPpe::new();
    t.replace(42, tcp4(1234)).unwrap();
    let slot = t.learn(42);
    let before = t.ppe.flow_entry(42).unwrap();

    assert_eq!(t.replace(42, tcp4(999)), Err(PpeError::FlowExists(42)));

    let after = t.ppe.flow_entry(42).unwrap();
    assert_eq!(after.data, before.data);
    assert_eq!(after.hash, Some(slot));
    assert_eq!(t.ppe.dump_flows().flows.len(), 1);
}

#[test]
fn missing_cookie() {
    let t = TestPpe::new();
    assert_eq!(t.destroy(7), Err(PpeError::FlowNotFound(7)));
    assert_eq!(t.stats(7), Err(PpeError::FlowNotFound(7)));
}

#[test]
fn unsupported_command() {
    let t = TestPpe::new();
    let mut f = FlowClsOffload::destroy(1);
    f.command = FlowCmd::TmpltCreate;
    assert!(matches!(t.offload(f), Err(PpeError::Unsupported(_))));
}

#[test]
fn bad_rules_leave_no_trace() {
    let t = TestPpe::new();

    let mut rule = tcp4(1);
    rule.actions.push(FlowAction::Redirect { ifindex: 77 });
    assert!(matches!(t.replace(1, rule), Err(PpeError::NoDevice(_))));

    let mut rule = tcp4(1);
    rule.control = Some(ControlMatch { addr_type: AddrType::Ipv4, flags: 1 });
    assert!(matches!(t.replace(1, rule), Err(PpeError::Unsupported(_))));

    let mut rule = bridge_rule(HOST_MAC, GW_MAC);
    rule.actions.extend(eth_mangles(HOST_MAC, GW_MAC));
    assert!(matches!(t.replace(1, rule), Err(PpeError::Unsupported(_))));

    assert!(t.ppe.dump_flows().flows.is_empty());
}

#[test]
fn destroy_invalidates_slot() {
    let t = TestPpe::new();
    t.replace(42, tcp4(1234)).unwrap();
    let slot = t.learn(42);
    assert_eq!(bound_state(&t, slot), BindState::Bind);

    t.destroy(42).unwrap();
    assert_eq!(bound_state(&t, slot), BindState::Invalid);
    assert!(t.ppe.flow_entry(42).is_none());

    let (ids, buckets) = t.ppe.table_ids();
    assert!(ids.is_empty());
    assert!(buckets.is_empty());
}

#[test]
fn first_match_wins() {
    let t = TestPpe::new();
    t.replace(1, tcp4(1234)).unwrap();
    t.replace(2, tcp4(1234)).unwrap();

    let slot = t.learn(1);
    assert_eq!(t.ppe.flow_entry(1).unwrap().hash, Some(slot));
    assert_eq!(t.ppe.flow_entry(2).unwrap().hash, None);
    assert_eq!(t.ppe.dump_stats().commits, 1);
}

#[test]
fn bound_flow_is_not_committed_twice() {
    let t = TestPpe::with(unthrottled(), SimNpuLoad::Loaded);
    let (sport, slot) = sport_below(PPE_SRAM_NUM_ENTRIES - 1);
    t.replace(42, tcp4(sport)).unwrap();
    assert_eq!(t.learn(42), slot);

    // The hardware learns the same flow again in the next slot.
    let e = t.ppe.flow_entry(42).unwrap().data;
    t.present(slot + 1, &unbound(&e), &any_frame());
    assert_eq!(t.ppe.flow_entry(42).unwrap().hash, Some(slot));
    assert_eq!(bound_state(&t, slot + 1), BindState::Unbind);
    assert_eq!(t.ppe.dump_stats().commits, 1);

    t.destroy(42).unwrap();
    assert_eq!(bound_state(&t, slot), BindState::Invalid);
}

#[test]
fn bound_bucket_mate_keeps_its_slot() {
    let t = TestPpe::with(unthrottled(), SimNpuLoad::Loaded);
    let (sport, slot) = sport_below(PPE_SRAM_NUM_ENTRIES);
    t.replace(1, tcp4(sport)).unwrap();
    t.learn(1);

    let (p, d) = bucket_mate(sport);
    t.replace(2, ipv4_rule(IPPROTO_TCP, SRC4, p, DST4, d)).unwrap();
    let e = t.ppe.flow_entry(2).unwrap().data;
    assert_eq!(t.ppe.hash_of(&e), slot);

    // The second flow lands in the other slot of the pair.
    let other = slot ^ 1;
    t.present(other, &unbound(&e), &any_frame());
    assert_eq!(t.ppe.flow_entry(2).unwrap().hash, Some(other));
    assert_eq!(t.ppe.flow_entry(1).unwrap().hash, Some(slot));
    assert_eq!(bound_state(&t, slot), BindState::Bind);
}

#[test]
fn stats_delta() {
    let t = TestPpe::new();
    let (sport, slot) = sport_below(PPE1_STATS_NUM_ENTRIES);
    t.replace(9, tcp4(sport)).unwrap();
    assert_eq!(t.learn(9), slot);

    t.hw.set_stats(slot, FoeStats { packets: 10, bytes: 1000 });
    let s = t.stats(9).unwrap();
    assert_eq!((s.pkts, s.bytes), (10, 1000));

    t.hw.set_stats(slot, FoeStats { packets: 15, bytes: 1500 });
    let s = t.stats(9).unwrap();
    assert_eq!((s.pkts, s.bytes), (5, 500));

    // Nothing new since.
    let s = t.stats(9).unwrap();
    assert_eq!((s.pkts, s.bytes), (0, 0));
}

#[test]
fn stats_survive_counter_wrap() {
    let t = TestPpe::new();
    let (sport, slot) = sport_below(PPE1_STATS_NUM_ENTRIES);
    t.replace(9, tcp4(sport)).unwrap();
    t.learn(9);

    t.hw.set_stats(slot, FoeStats { packets: u32::MAX - 1, bytes: 0 });
    t.stats(9).unwrap();

    t.hw.set_stats(slot, FoeStats { packets: 3, bytes: 0 });
    let s = t.stats(9).unwrap();
    assert_eq!(s.pkts, 5);
}

#[test]
fn stats_of_pending_flow() {
    let t = TestPpe::new();
    t.replace(9, tcp4(1234)).unwrap();
    let s = t.stats(9).unwrap();
    assert_eq!((s.pkts, s.bytes), (0, 0));
    assert!(s.lastused <= Moment::now().raw_millis());
}

#[test]
fn commit_routes_through_accounting() {
    let t = TestPpe::new();
    let (sport, slot) = sport_below(PPE1_STATS_NUM_ENTRIES);
    t.replace(9, tcp4(sport)).unwrap();
    t.learn(9);

    // The hardware copy is redirected to the co-processor for
    // accounting; the software copy is what the control plane asked
    // for.
    let hwe = FoeEntry::from_raw(&t.hw.sram_entry(slot));
    assert_eq!(hwe.ib2().pse_port(), 6);
    let e = t.ppe.flow_entry(9).unwrap();
    assert_ne!(e.data.ib2().pse_port(), 6);
    assert!(t.hw.commits().contains(&(slot, false)));
}

#[test]
fn no_accounting_without_flow_stats() {
    let cfg = PpeCfg { flow_stats: false, ..Default::default() };
    let t = TestPpe::with(cfg, SimNpuLoad::Loaded);
    let (sport, slot) = sport_below(PPE1_STATS_NUM_ENTRIES);
    t.replace(9, tcp4(sport)).unwrap();
    t.learn(9);

    let hwe = FoeEntry::from_raw(&t.hw.sram_entry(slot));
    assert_eq!(hwe, t.ppe.flow_entry(9).unwrap().data);

    t.hw.set_stats(slot, FoeStats { packets: 10, bytes: 1000 });
    let s = t.stats(9).unwrap();
    assert_eq!((s.pkts, s.bytes), (0, 0));
}

#[test]
fn eviction_is_noticed() {
    let t = TestPpe::new();
    t.replace(5, tcp4(1234)).unwrap();
    let slot = t.learn(5);

    let mut gone = t.ppe.hw_entry(slot).unwrap();
    gone.ib1.set_state(BindState::Invalid);
    t.ppe.set_hw_entry(slot, &gone).unwrap();

    t.stats(5).unwrap();
    assert_eq!(t.ppe.flow_entry(5).unwrap().hash, None);
    assert_eq!(t.ppe.dump_stats().entries_unbound, 1);
}

#[test]
fn slot_reused_by_other_flow() {
    let t = TestPpe::new();
    t.replace(5, tcp4(1234)).unwrap();
    let slot = t.learn(5);

    // Another flow took the slot, and is bound there.
    t.replace(6, tcp4(4321)).unwrap();
    let other = t.ppe.flow_entry(6).unwrap().data;
    t.ppe.set_hw_entry(slot, &other).unwrap();

    assert!(t.ppe.idle_of(5).is_some());
    assert_eq!(t.ppe.flow_entry(5).unwrap().hash, None);
}

#[test]
fn idle_time_follows_hardware() {
    let t = TestPpe::new();
    t.hw.set_timestamp(100);
    t.replace(5, tcp4(1234)).unwrap();
    t.learn(5);

    t.hw.set_timestamp(130);
    assert_eq!(t.ppe.idle_of(5), Some(30));

    // Bound timestamps wrap at 15 bits.
    let slot = t.ppe.flow_entry(5).unwrap().hash.unwrap();
    let mut hwe = t.ppe.hw_entry(slot).unwrap();
    hwe.ib1.set_bind_timestamp(0x7ffe);
    t.ppe.set_hw_entry(slot, &hwe).unwrap();
    t.hw.set_timestamp(3);
    assert_eq!(t.ppe.idle_of(5), Some(5));
}

#[test]
fn throttled_samples_are_ignored() {
    let cfg = PpeCfg { sample_interval_ms: 60_000, ..Default::default() };
    let t = TestPpe::with(cfg, SimNpuLoad::Loaded);
    t.replace(1, tcp4(1234)).unwrap();
    let e = t.ppe.flow_entry(1).unwrap().data;
    let slot = t.ppe.hash_of(&e);

    // A flow the table knows nothing about in that slot.
    t.present(slot, &stranger(), &any_frame());
    assert_eq!(t.ppe.flow_entry(1).unwrap().hash, None);

    // Too soon to look again.
    t.present(slot, &unbound(&e), &any_frame());
    assert_eq!(t.ppe.flow_entry(1).unwrap().hash, None);

    let stats = t.ppe.dump_stats();
    assert_eq!(stats.samples, 2);
    assert_eq!(stats.samples_throttled, 1);
}

#[test]
fn unthrottled_samples_retry() {
    let t = TestPpe::with(unthrottled(), SimNpuLoad::Loaded);
    t.replace(1, tcp4(1234)).unwrap();
    let e = t.ppe.flow_entry(1).unwrap().data;
    let slot = t.ppe.hash_of(&e);

    t.present(slot, &stranger(), &any_frame());
    t.present(slot, &unbound(&e), &any_frame());
    assert_eq!(t.ppe.flow_entry(1).unwrap().hash, Some(slot));
}

#[test]
fn concurrent_samples_look_once() {
    let cfg = PpeCfg { sample_interval_ms: 60_000, ..Default::default() };
    let t = TestPpe::with(cfg, SimNpuLoad::Loaded);
    let slot = t.ppe.hash_of(&stranger());
    t.ppe.set_hw_entry(slot, &stranger()).unwrap();

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                for _ in 0..50 {
                    t.ppe.on_sample(&any_frame(), slot);
                }
            });
        }
    });

    let stats = t.ppe.dump_stats();
    assert_eq!(stats.samples, 400);
    assert_eq!(stats.samples_throttled, 399);
}

#[test]
fn sram_timeout_leaves_flow_pending() {
    let t = TestPpe::with(unthrottled(), SimNpuLoad::Loaded);
    let (sport, slot) = sport_below(PPE_SRAM_NUM_ENTRIES);
    t.replace(1, tcp4(sport)).unwrap();
    let e = t.ppe.flow_entry(1).unwrap().data;
    t.ppe.set_hw_entry(slot, &unbound(&e)).unwrap();
    t.log.take();

    t.hw.set_sram_ack(false);
    t.ppe.on_sample(&any_frame(), slot);
    assert_eq!(t.ppe.flow_entry(1).unwrap().hash, None);
    assert!(t.logged(LogLevel::Warn, "timed out"));

    t.hw.set_sram_ack(true);
    t.ppe.on_sample(&any_frame(), slot);
    assert_eq!(t.ppe.flow_entry(1).unwrap().hash, Some(slot));
}

#[test]
fn failed_commit_keeps_flow_pending() {
    let t = TestPpe::with(unthrottled(), SimNpuLoad::Loaded);
    let (sport, slot) = sport_below(PPE1_STATS_NUM_ENTRIES);
    t.replace(1, tcp4(sport)).unwrap();
    let counted = FoeStats { packets: 7, bytes: 700 };
    t.hw.set_stats(slot, counted);

    t.hw.fail_commit(Some(libc::EIO));
    t.learn(1);
    assert_eq!(t.ppe.flow_entry(1).unwrap().hash, None);
    assert_eq!(t.ppe.dump_stats().commit_errors, 1);
    assert!(t.logged(LogLevel::Error, &format!("slot {slot}")));

    // Nothing is left forwarding behind our back, and the counter of
    // the slot is untouched.
    assert_eq!(bound_state(&t, slot), BindState::Invalid);
    assert_eq!(t.hw.stats(slot), counted);

    t.hw.fail_commit(None);
    t.learn(1);
    assert_eq!(t.ppe.flow_entry(1).unwrap().hash, Some(slot));
    assert_eq!(bound_state(&t, slot), BindState::Bind);
    assert_eq!(t.hw.stats(slot), FoeStats::default());
}

// ================================================================
// L2 flows and their subflows
// ================================================================

const AA: MacAddr = MacAddr::from_const([0xaa; 6]);
const BB: MacAddr = MacAddr::from_const([0xbb; 6]);

fn v6(last: u16) -> Ipv6Addr {
    Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, last)
}

/// Register an L2 flow for `src -> dst`, attach the co-processor and
/// return a frame of that flow.
fn l2_flow(t: &TestPpe, cookie: u64, dst: MacAddr, src: MacAddr) -> Vec<u8> {
    t.ppe.add_flow(cookie, bridge_entry(dst, src)).unwrap();
    t.ppe.attach().unwrap();
    eth_frame(dst, src, EthernetProtocol::Ipv6)
}

/// Present an unbound IPv6 flow riding on `frame`, returning its slot.
fn ride(t: &TestPpe, frame: &[u8], sport: u16) -> u32 {
    let hwe = ipv6_record(v6(1), sport, v6(2), 443);
    let slot = t.ppe.hash_of(&hwe);
    t.present(slot, &hwe, frame);
    slot
}

#[test]
fn bridge_then_subflow() {
    let t = TestPpe::new();
    let frame = l2_flow(&t, 7, BB, AA);

    let slot = ride(&t, &frame, 5000);

    let subs = t.ppe.subflows(7);
    assert_eq!(subs.len(), 1);
    let sub = &subs[0];
    assert_eq!(sub.hash, Some(slot));
    assert!(matches!(sub.kind, FlowKind::L2Subflow { .. }));
    assert_eq!(sub.cookie, None);

    let hwe = t.ppe.hw_entry(slot).unwrap();
    assert_eq!(hwe.ib1.state(), BindState::Bind);
    assert_eq!(hwe.packet_type(), Some(PacketType::Ipv6Route5T));
    assert_eq!(hwe.smac_id(), Some(0xf));
    assert_eq!(t.ppe.dump_stats().subflows_created, 1);
}

#[test]
fn subflow_takes_bridge_forwarding() {
    let t = TestPpe::new();
    let parent = bridge_entry(BB, AA);
    let frame = l2_flow(&t, 7, BB, AA);
    ride(&t, &frame, 5000);

    let sub = &t.ppe.subflows(7)[0];
    assert_eq!(sub.data.l2().dest_mac_hi, parent.l2().dest_mac_hi);
    assert_eq!(sub.data.l2().dest_mac_lo, parent.l2().dest_mac_lo);
    assert_eq!(sub.data.qdata(), parent.qdata());
    assert_eq!(sub.data.ib2(), parent.ib2());
    assert!(!sub.data.ib1.contains(Ib1Flags::UDP));
}

#[test]
fn l2_rule_through_control_plane() {
    let t = TestPpe::new();
    t.replace(3, bridge_rule(HOST_MAC, GW_MAC)).unwrap();
    let frame = eth_frame(HOST_MAC, GW_MAC, EthernetProtocol::Ipv6);
    ride(&t, &frame, 5000);
    assert_eq!(t.ppe.subflows(3).len(), 1);
}

#[test]
fn frame_of_unknown_pair_is_ignored() {
    let t = TestPpe::new();
    l2_flow(&t, 7, BB, AA);
    ride(&t, &any_frame(), 5000);
    assert!(t.ppe.subflows(7).is_empty());
    assert_eq!(t.ppe.dump_stats().subflows_created, 0);
}

#[test]
fn l2_idle_is_most_recent_subflow() {
    let t = TestPpe::new();
    let frame = l2_flow(&t, 7, BB, AA);

    t.hw.set_timestamp(100);
    ride(&t, &frame, 5000);
    t.hw.set_timestamp(150);
    ride(&t, &frame, 6000);
    assert_eq!(t.ppe.subflows(7).len(), 2);

    t.hw.set_timestamp(160);
    assert_eq!(t.ppe.idle_of(7), Some(10));
}

#[test]
fn stale_subflow_is_evicted_on_refresh() {
    let t = TestPpe::new();
    let frame = l2_flow(&t, 7, BB, AA);
    let slot = ride(&t, &frame, 5000);

    let mut hwe = t.ppe.hw_entry(slot).unwrap();
    hwe.ib1.set_state(BindState::Unbind);
    t.ppe.set_hw_entry(slot, &hwe).unwrap();

    t.ppe.idle_of(7);
    assert!(t.ppe.subflows(7).is_empty());
    assert_eq!(t.ppe.dump_stats().subflows_evicted, 1);

    let (_, buckets) = t.ppe.table_ids();
    assert!(buckets.is_empty());
}

#[test]
fn destroy_l2_removes_children() {
    let t = TestPpe::new();
    let frame = l2_flow(&t, 7, BB, AA);
    let s1 = ride(&t, &frame, 5000);
    let s2 = ride(&t, &frame, 6000);
    assert_eq!(t.ppe.subflows(7).len(), 2);

    t.destroy(7).unwrap();

    assert!(t.ppe.flow_entry(7).is_none());
    let (ids, buckets) = t.ppe.table_ids();
    assert!(ids.is_empty());
    assert!(buckets.is_empty());
    assert_eq!(bound_state(&t, s1), BindState::Invalid);
    assert_eq!(bound_state(&t, s2), BindState::Invalid);

    // The pair no longer leads anywhere.
    ride(&t, &frame, 7000);
    assert_eq!(t.ppe.dump_flows().flows.len(), 0);
}

#[test]
fn l2_takeover() {
    let t = TestPpe::new();
    let frame = l2_flow(&t, 1, BB, AA);
    t.ppe.add_flow(2, bridge_entry(BB, AA)).unwrap();

    // Removing the old holder must not unhook the new one.
    t.destroy(1).unwrap();
    ride(&t, &frame, 5000);
    assert_eq!(t.ppe.subflows(2).len(), 1);
}

#[test]
fn dump_and_print() {
    let t = TestPpe::new();
    let frame = l2_flow(&t, 7, BB, AA);
    ride(&t, &frame, 5000);
    t.replace(42, tcp4(1234)).unwrap();

    let dump = t.ppe.dump_flows();
    assert_eq!(dump.flows.len(), 3);
    assert!(
        dump.flows
            .iter()
            .any(|f| f.kind == FlowKindDump::L2 { subflows: 1 })
    );

    let mut out = vec![];
    print_flows_into(&mut out, &dump).unwrap();
    let out = String::from_utf8(out).unwrap();
    assert!(out.contains("L2 (1)"));
    assert!(out.contains("0x2a"));
}

// ================================================================
// Co-processor lifecycle
// ================================================================

#[test]
fn attach_on_first_command() {
    let t = TestPpe::new();
    assert!(!t.ppe.is_attached());

    t.replace(1, tcp4(1234)).unwrap();
    assert!(t.ppe.is_attached());
    assert_eq!(t.hw.inits(), 1);
    assert_eq!(t.hw.flushes(), 1);

    t.replace(2, tcp4(4321)).unwrap();
    assert_eq!(t.hw.inits(), 1);
}

#[test]
fn attach_loads_module() {
    let t = TestPpe::with(PpeCfg::default(), SimNpuLoad::OnRequest);
    t.replace(1, tcp4(1234)).unwrap();
    assert!(t.ppe.is_attached());
    assert_eq!(t.npu.gets(), 2);
}

#[test]
fn attach_without_npu() {
    let t = TestPpe::with(PpeCfg::default(), SimNpuLoad::Never);
    assert!(matches!(t.replace(1, tcp4(1234)), Err(PpeError::NoDevice(_))));
    assert!(!t.ppe.is_attached());
    assert_eq!(t.npu.gets(), 2);
    assert!(t.ppe.flow_entry(1).is_none());
}

#[test]
fn attach_failure_releases_npu() {
    let t = TestPpe::new();
    t.hw.fail_init(Some(libc::EIO));

    assert!(matches!(
        t.replace(1, tcp4(1234)),
        Err(PpeError::Npu { errno: libc::EIO, .. })
    ));
    assert!(!t.ppe.is_attached());
    assert_eq!(t.npu.puts(), 1);
    assert!(t.logged(LogLevel::Error, "failed to set up co-processor"));

    // Retried on the next command.
    t.hw.fail_init(None);
    t.replace(1, tcp4(1234)).unwrap();
    assert!(t.ppe.is_attached());
}

#[test]
fn commit_needs_attached_npu() {
    let t = TestPpe::new();
    t.replace(1, tcp4(1234)).unwrap();
    t.ppe.deinit();
    assert!(!t.ppe.is_attached());
    assert_eq!(t.hw.deinits(), 1);
    assert_eq!(t.npu.puts(), 1);

    t.learn(1);
    assert_eq!(t.ppe.flow_entry(1).unwrap().hash, None);

    // Any command brings it back.
    t.stats(1).unwrap();
    assert!(t.ppe.is_attached());
    assert_eq!(t.hw.inits(), 2);
}

#[test]
fn samples_race_control_plane() {
    let t = Arc::new(TestPpe::with(unthrottled(), SimNpuLoad::Loaded));
    t.replace(1, tcp4(1234)).unwrap();
    let e = t.ppe.flow_entry(1).unwrap().data;
    let slot = t.ppe.hash_of(&e);
    t.ppe.set_hw_entry(slot, &unbound(&e)).unwrap();

    let sampler = {
        let t = t.clone();
        std::thread::spawn(move || {
            for _ in 0..200 {
                t.ppe.on_sample(&any_frame(), slot);
            }
        })
    };

    for cookie in 100..150 {
        t.replace(cookie, tcp4(cookie as u16)).unwrap();
        t.stats(cookie).unwrap();
        t.destroy(cookie).unwrap();
    }
    sampler.join().unwrap();

    assert_eq!(t.ppe.flow_entry(1).unwrap().hash, Some(slot));
    assert_eq!(t.ppe.dump_flows().flows.len(), 1);
}

// ================================================================
// Serialized commands
// ================================================================

fn req(cmd: PpeCmd, body: Vec<u8>) -> Vec<u8> {
    postcard::to_allocvec(&PpeCmdReq::new(cmd, body)).unwrap()
}

#[test]
fn handle_cmd_round_trip() {
    let t = TestPpe::new();

    let rule = ipv4_rule(IPPROTO_UDP, SRC4, 1234, DST4, 80);
    let f = FlowClsOffload::replace(42, rule);
    let body = postcard::to_allocvec(&f).unwrap();
    t.ppe.handle_cmd(&req(PpeCmd::FlowOffload, body)).unwrap();

    let resp = t.ppe.handle_cmd(&req(PpeCmd::DumpFlows, vec![])).unwrap();
    let dump: DumpFlowsResp = postcard::from_bytes(&resp).unwrap();
    assert_eq!(dump.flows.len(), 1);
    assert_eq!(dump.flows[0].cookie, Some(42));
    assert_eq!(dump.flows[0].kind, FlowKindDump::L4);

    let (sport, slot) = sport_below(PPE1_STATS_NUM_ENTRIES);
    t.replace(9, tcp4(sport)).unwrap();
    t.learn(9);
    t.hw.set_stats(slot, FoeStats { packets: 3, bytes: 180 });
    let body = postcard::to_allocvec(&FlowClsOffload::stats(9)).unwrap();
    let resp = t.ppe.handle_cmd(&req(PpeCmd::FlowOffload, body)).unwrap();
    let stats: FlowStats = postcard::from_bytes(&resp).unwrap();
    assert_eq!((stats.pkts, stats.bytes), (3, 180));

    let resp = t.ppe.handle_cmd(&req(PpeCmd::DumpStats, vec![])).unwrap();
    let counters: DumpStatsResp = postcard::from_bytes(&resp).unwrap();
    assert_eq!(counters, t.ppe.dump_stats());
}

#[test]
fn handle_cmd_errors() {
    let t = TestPpe::new();

    let mut r = PpeCmdReq::new(PpeCmd::DumpStats, vec![]);
    r.api_version += 1;
    let bytes = postcard::to_allocvec(&r).unwrap();
    assert!(matches!(
        t.ppe.handle_cmd(&bytes),
        Err(PpeError::BadApiVersion { .. })
    ));

    assert!(matches!(
        t.ppe.handle_cmd(&[0xff, 0xff, 0xff]),
        Err(PpeError::DeserCmdReq(_))
    ));

    let body = postcard::to_allocvec(&FlowClsOffload::destroy(5)).unwrap();
    let err = t.ppe.handle_cmd(&req(PpeCmd::FlowOffload, body)).unwrap_err();
    assert_eq!(err, PpeError::FlowNotFound(5));
    assert_eq!(err.to_errno(), libc::ENOENT);
}
