// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The flow-offload engine.
//!
//! A [`Ppe`] owns the software flow table and the mirror of the
//! hardware table, and reconciles the two. Flows handed down by the
//! control plane (see [`super::offload`]) sit pending in the hash
//! bucket of their own record until the receive path reports a frame
//! sampled at a free slot of that bucket ([`Ppe::on_sample()`]), at
//! which point the matching entry is committed to that slot. The
//! hardware may age or evict an entry at any time without telling us;
//! we find out lazily, the next time we look at the slot.
//!
//! Locking: all structural changes and hardware commits happen under
//! the single state lock. The co-processor handle is published through
//! a [`KRcu`] so that the commit path can check it without blocking.

use super::ether;
use super::flow_table::EntryId;
use super::flow_table::FlowTable;
use super::foe::BindState;
use super::foe::FoeData;
use super::foe::FoeEntry;
use super::foe::IB1_BIND_TIMESTAMP;
use super::foe::IB1_UNBIND_TIMESTAMP;
use super::foe::Ib1;
use super::foe::Ib2Flags;
use super::foe::METER_TUNNEL_MTU;
use super::foe::PPE_ENTRY_SIZE;
use super::foe::PPE_SRAM_NUM_ENTRIES;
use super::foe::PPE1_SRAM_NUM_ENTRIES;
use super::foe::PacketType;
use super::foe::QDATA_ACTDP;
use super::foe::QDATA_CHANNEL;
use super::foe::QDATA_QID;
use super::foe::SMAC_ID_KEEP;
use super::hash::foe_hash;
use super::mirror::FeRegs;
use super::mirror::FoeTable;
use super::npu::AttachedNpu;
use super::npu::FoeStats64;
use super::npu::FoeStatsExt;
use super::npu::Npu;
use super::npu::NpuProvider;
use super::offload::NetDevs;
use super::regs::*;
use super::stat::PpeStats;
use crate::api::API_VERSION;
use crate::api::CmdOk;
use crate::api::DumpFlowsResp;
use crate::api::DumpStatsResp;
use crate::api::FlowClsOffload;
use crate::api::MacAddr;
use crate::api::PPE_HASH_MASK;
use crate::api::PpeCfg;
use crate::api::PpeCmd;
use crate::api::PpeCmdReq;
use crate::api::PpeError;
use crate::ddi::sync::KMutex;
use crate::ddi::sync::KMutexGuard;
use crate::ddi::sync::KRcu;
use crate::ddi::sync::TokenLock;
use crate::ddi::time::Moment;
use crate::provider::LogLevel;
use crate::provider::LogProvider;
use crate::provider::Providers;
use alloc::boxed::Box;
use alloc::string::ToString;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;
use zerocopy::IntoBytes;

type Result<T> = core::result::Result<T, PpeError>;

/// `check_time` value of a hash that was never sampled.
const NEVER_CHECKED: u64 = u64::MAX;

/// Everything protected by the state lock.
pub struct PpeState {
    pub(super) flows: FlowTable,
    pub(super) foe: FoeTable,
    /// Software high words of the co-processor's accounting counters.
    stats_ext: Vec<FoeStatsExt>,
}

pub struct Ppe {
    cfg: PpeCfg,
    log: Box<dyn LogProvider>,
    regs: Arc<dyn FeRegs>,
    npu_provider: Box<dyn NpuProvider>,
    pub(super) netdevs: Box<dyn NetDevs>,
    npu: KRcu<AttachedNpu>,
    /// Serializes co-processor attachment with control-plane commands.
    pub(super) offload_lock: TokenLock<()>,
    state: KMutex<PpeState>,
    /// When each hash was last looked at from the receive path, in
    /// milliseconds.
    check_time: Box<[AtomicU64]>,
    stats: PpeStats,
}

/// Time elapsed from `ts` to `now` on a counter wrapping at
/// `max + 1`.
pub fn idle_delta(now: u32, ts: u32, max: u32) -> u32 {
    if now >= ts { now - ts } else { now + (max + 1) - ts }
}

fn commit_probe(slot: u32, state: BindState) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            let state_s = format!("{state:?}");
            crate::ppe_provider::foe__commit!(|| (slot, state_s.as_str()));
        } else {
            let (..) = (slot, state);
        }
    }
}

fn unbind_probe(id: EntryId, slot: u32) {
    cfg_if! {
        if #[cfg(feature = "usdt")] {
            crate::ppe_provider::flow__unbind!(|| (id, slot));
        } else {
            let (..) = (id, slot);
        }
    }
}

impl Ppe {
    pub fn new(
        cfg: PpeCfg,
        providers: Providers,
        regs: Arc<dyn FeRegs>,
        npu_provider: Box<dyn NpuProvider>,
        netdevs: Box<dyn NetDevs>,
    ) -> Self {
        let check_time = (0..=PPE_HASH_MASK)
            .map(|_| AtomicU64::new(NEVER_CHECKED))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let state = PpeState {
            flows: FlowTable::new(),
            foe: FoeTable::new(regs.clone()),
            stats_ext: vec![
                FoeStatsExt::default();
                cfg.stats_entries() as usize
            ],
        };

        Self {
            cfg,
            log: providers.log,
            regs,
            npu_provider,
            netdevs,
            npu: KRcu::new(),
            offload_lock: TokenLock::new(()),
            state: KMutex::new(state),
            check_time,
            stats: PpeStats::default(),
        }
    }

    pub fn cfg(&self) -> &PpeCfg {
        &self.cfg
    }

    pub fn is_attached(&self) -> bool {
        self.npu.is_published()
    }

    pub(super) fn log(&self, level: LogLevel, msg: &str) {
        self.log.log(level, msg);
    }

    /// The current value of the engine's free-running timestamp, in
    /// the width of the bind timestamp field.
    pub fn timestamp(&self) -> u32 {
        let ts = self.regs.rr(REG_FE_FOE_TS) as u16;
        field_get(IB1_BIND_TIMESTAMP, ts as u32)
    }

    /// Program the table layout, aging and MTU registers of both
    /// engine instances.
    pub fn hw_init(&self) {
        let regs = &*self.regs;
        let sram_tb_size = PPE_SRAM_NUM_ENTRIES * PPE_ENTRY_SIZE as u32;
        let dram_num_entries = ram_num_entries_shift(
            super::foe::PPE_DRAM_NUM_ENTRIES,
        );
        let age = &self.cfg.bind_age;
        let mtu = self.cfg.max_mtu as u32;

        for i in 0..PPE_NUM {
            regs.wr(
                reg_ppe_tb_base(i),
                regs.foe_dma_addr().wrapping_add(sram_tb_size),
            );

            regs.rmw(
                reg_ppe_bnd_age0(i),
                PPE_BIND_AGE0_DELTA_NON_L4 | PPE_BIND_AGE0_DELTA_UDP,
                field_prep(PPE_BIND_AGE0_DELTA_NON_L4, age.non_l4 as u32)
                    | field_prep(PPE_BIND_AGE0_DELTA_UDP, age.udp as u32),
            );
            regs.rmw(
                reg_ppe_bnd_age1(i),
                PPE_BIND_AGE1_DELTA_TCP_FIN | PPE_BIND_AGE1_DELTA_TCP,
                field_prep(PPE_BIND_AGE1_DELTA_TCP_FIN, age.tcp_fin as u32)
                    | field_prep(PPE_BIND_AGE1_DELTA_TCP, age.tcp as u32),
            );

            regs.rmw(
                reg_ppe_tb_hash_cfg(i),
                PPE_SRAM_TABLE_EN_MASK
                    | PPE_SRAM_HASH1_EN_MASK
                    | PPE_DRAM_TABLE_EN_MASK
                    | PPE_SRAM_HASH0_MODE_MASK
                    | PPE_SRAM_HASH1_MODE_MASK
                    | PPE_DRAM_HASH0_MODE_MASK
                    | PPE_DRAM_HASH1_MODE_MASK,
                field_prep(PPE_SRAM_TABLE_EN_MASK, 1)
                    | field_prep(PPE_SRAM_HASH1_EN_MASK, 1)
                    | field_prep(PPE_SRAM_HASH1_MODE_MASK, 1)
                    | field_prep(PPE_DRAM_HASH1_MODE_MASK, 3),
            );

            regs.rmw(
                reg_ppe_tb_cfg(i),
                PPE_TB_CFG_SEARCH_MISS_MASK
                    | PPE_TB_CFG_KEEPALIVE_MASK
                    | PPE_TB_ENTRY_SIZE_MASK,
                field_prep(PPE_TB_CFG_SEARCH_MISS_MASK, 3)
                    | field_prep(PPE_TB_ENTRY_SIZE_MASK, 0),
            );

            regs.wr(reg_ppe_hash_seed(i), self.cfg.hash_seed);

            for p in 0..self.cfg.num_ports as usize {
                regs.rmw(
                    reg_ppe_mtu(i, p),
                    FP0_EGRESS_MTU_MASK | FP1_EGRESS_MTU_MASK,
                    field_prep(FP0_EGRESS_MTU_MASK, mtu)
                        | field_prep(FP1_EGRESS_MTU_MASK, mtu),
                );
            }
        }

        // The tail of SRAM holds the accounting counters.
        let (instances, sram_data) = if super::mirror::ppe2_enabled(regs) {
            (
                PPE_NUM,
                PPE1_SRAM_NUM_ENTRIES - self.cfg.ppe1_stats_entries(),
            )
        } else {
            (1, PPE_SRAM_NUM_ENTRIES - self.cfg.stats_entries())
        };
        let sram_num_entries = ram_num_entries_shift(sram_data);

        for i in 0..instances {
            regs.rmw(
                reg_ppe_tb_cfg(i),
                PPE_SRAM_TB_NUM_ENTRY_MASK | PPE_DRAM_TB_NUM_ENTRY_MASK,
                field_prep(PPE_SRAM_TB_NUM_ENTRY_MASK, sram_num_entries)
                    | field_prep(PPE_DRAM_TB_NUM_ENTRY_MASK, dram_num_entries),
            );
        }
    }

    /// Load the MAC address of frame-engine port `port_id` into the
    /// update memory, from which the engine rewrites source MACs.
    pub fn init_upd_mem(&self, port_id: u8, mac: MacAddr) {
        let a = mac.bytes();
        let ctrl = field_prep(PPE_UPDMEM_ADDR_MASK, port_id as u32)
            | PPE_UPDMEM_WR_MASK
            | PPE_UPDMEM_REQ_MASK;

        let lo = u32::from_be_bytes([a[2], a[3], a[4], a[5]]);
        self.regs.wr(reg_updmem_data(0), lo);
        self.regs.wr(reg_updmem_ctrl(0), ctrl);

        let hi = u32::from(u16::from_be_bytes([a[0], a[1]]));
        self.regs.wr(reg_updmem_data(0), hi);
        self.regs.wr(
            reg_updmem_ctrl(0),
            ctrl | field_prep(PPE_UPDMEM_OFFSET_MASK, 1),
        );
    }

    // ================================================================
    // Co-processor lifecycle
    // ================================================================

    fn npu_get(&self) -> Result<Arc<dyn Npu>> {
        match self.npu_provider.get() {
            Ok(npu) => Ok(npu),
            Err(_) => {
                self.npu_provider.request_module();
                self.npu_provider.get()
            }
        }
    }

    fn npu_setup(&self, npu: &dyn Npu) -> Result<()> {
        npu.ppe_init()?;
        self.hw_init();

        let mut st = self.state.lock();
        let sram = st.foe.clear_sram();
        npu.ppe_flush_sram_entries(sram, PPE_SRAM_NUM_ENTRIES)?;

        for (i, ext) in st.stats_ext.iter_mut().enumerate() {
            npu.reset_stats(i as u32);
            *ext = FoeStatsExt::default();
        }

        Ok(())
    }

    /// Acquire and initialize the co-processor, then publish it. The
    /// caller must hold the offload token.
    pub(super) fn offload_setup(&self) -> Result<()> {
        let npu = self.npu_get()?;

        if let Err(e) = self.npu_setup(&*npu) {
            self.log(
                LogLevel::Error,
                &format!("failed to set up co-processor: {e}"),
            );
            self.npu_provider.put(npu);
            return Err(e);
        }

        self.npu.assign(Arc::new(AttachedNpu { ops: npu }));
        self.log(LogLevel::Note, "co-processor attached");
        Ok(())
    }

    /// Detach the co-processor, if attached.
    pub fn deinit(&self) {
        let _token = self.offload_lock.lock();
        let Some(npu) = self.npu.retract() else {
            return;
        };

        if let Err(e) = npu.ops.ppe_deinit() {
            self.log(LogLevel::Warn, &format!("co-processor deinit: {e}"));
        }
        self.npu_provider.put(npu.ops.clone());
        self.log(LogLevel::Note, "co-processor detached");
    }

    // ================================================================
    // Hardware commit
    // ================================================================

    fn entry_hash(&self, entry: &FoeEntry) -> u32 {
        match foe_hash(entry) {
            Ok(hash) => hash,
            Err(e) => {
                self.log(LogLevel::Error, &format!("{e}"));
                PPE_HASH_MASK
            }
        }
    }

    fn stats_index(&self, foe: &FoeTable, slot: u32) -> Option<u32> {
        let mut index = slot;
        if foe.ppe2_enabled() && slot >= self.cfg.stats_entries() {
            index = slot - self.cfg.ppe1_stats_entries();
        }
        (index < self.cfg.stats_entries()).then_some(index)
    }

    /// Route the hardware copy of a record through the co-processor
    /// so it can account for it. Returns the counter it will use.
    fn stats_update(
        &self,
        st: &PpeState,
        hwe: &mut FoeEntry,
        slot: u32,
    ) -> Option<u32> {
        let index = self.stats_index(&st.foe, slot)?;

        let qdata = hwe.qdata_mut();
        let val = field_get(QDATA_CHANNEL | QDATA_QID, *qdata);
        *qdata = (*qdata & !QDATA_ACTDP) | field_prep(QDATA_ACTDP, val);

        let fwd = hwe.ib2().forwarding_bits();
        hwe.l2_mut().meter |= field_prep(METER_TUNNEL_MTU, fwd);

        let ib2 = hwe.ib2_mut();
        let nbq = if ib2.pse_port() == 1 { 6 } else { 5 };
        ib2.remove(Ib2Flags::PSE_QOS);
        ib2.set_pse_port(6);
        ib2.set_nbq(nbq);
        Some(index)
    }

    /// Write `entry` into `slot`, stamping it with the current bind
    /// timestamp first.
    ///
    /// # Errors
    ///
    /// * [`PpeError::NpuNotAttached`] before anything is written.
    /// * [`PpeError::Timeout`] if the SRAM window does not answer.
    /// * [`PpeError::Npu`] if the co-processor rejects the record. The
    ///   slot is invalidated again, so the hardware does not forward a
    ///   flow we consider pending.
    fn commit_entry(
        &self,
        st: &mut PpeState,
        entry: &mut FoeEntry,
        slot: u32,
    ) -> Result<()> {
        let guard = self.npu.read();
        let Some(npu) = guard.get() else {
            return Err(PpeError::NpuNotAttached);
        };

        entry.ib1.set_bind_timestamp(self.timestamp());

        let mut hwe = *entry;
        let stats_index = if self.cfg.flow_stats {
            self.stats_update(st, &mut hwe, slot)
        } else {
            None
        };

        let ppe2 = st.foe.is_ppe2_slot(slot);
        let mut written = false;
        let res = st.foe.write(slot, &hwe).and_then(|raw| {
            written = true;
            if slot < PPE_SRAM_NUM_ENTRIES {
                npu.ops.ppe_foe_commit_entry(raw.as_bytes(), slot, ppe2)
            } else {
                Ok(())
            }
        });

        match &res {
            Ok(()) => {
                if let Some(index) = stats_index {
                    npu.ops.reset_stats(index);
                    st.stats_ext[index as usize] = FoeStatsExt::default();
                }
                self.stats.commits.incr();
                commit_probe(slot, entry.ib1.state());
            }
            Err(e) => {
                self.stats.commit_errors.incr();
                self.log(
                    LogLevel::Error,
                    &format!("failed to commit slot {slot}: {e}"),
                );

                if written {
                    hwe.ib1.set_state(BindState::Invalid);
                    if let Err(e) = st.foe.write(slot, &hwe) {
                        self.log(
                            LogLevel::Error,
                            &format!("failed to invalidate slot {slot}: {e}"),
                        );
                    }
                }
            }
        }

        res
    }

    // ================================================================
    // Registration and removal
    // ================================================================

    /// Register the prepared record `entry` under `cookie`. A bridge
    /// record becomes an L2 flow, taking over its MAC pair from any
    /// earlier flow; anything else waits in the bucket of its own
    /// hash for a sample to commit it.
    ///
    /// # Errors
    ///
    /// * [`PpeError::FlowExists`] if `cookie` is already registered.
    /// * [`PpeError::NoMem`] if the bucket cannot grow.
    pub fn add_flow(&self, cookie: u64, entry: FoeEntry) -> Result<EntryId> {
        let mut st = self.state.lock();
        if st.flows.lookup_cookie(cookie).is_some() {
            return Err(PpeError::FlowExists(cookie));
        }

        let id = if entry.is_bridge() {
            st.flows.add_l2(cookie, entry)?
        } else {
            let hash = self.entry_hash(&entry);
            st.flows.add_l4(cookie, entry, hash)?
        };

        if let Err(e) = st.flows.register_cookie(cookie, id) {
            st.flows.unlink_l2(id);
            st.flows.remove(id);
            return Err(e);
        }

        Ok(id)
    }

    /// Retract and delete the flow registered under `cookie`, along
    /// with any subflows.
    ///
    /// # Errors
    ///
    /// * [`PpeError::FlowNotFound`] if `cookie` is not registered.
    pub fn remove_entry(&self, cookie: u64) -> Result<()> {
        let mut st = self.state.lock();
        let id = st
            .flows
            .lookup_cookie(cookie)
            .ok_or(PpeError::FlowNotFound(cookie))?;

        if st.flows.get(id).is_some_and(|e| e.is_l2()) {
            self.remove_l2_flow(&mut st, id);
        } else {
            self.remove_flow(&mut st, id);
        }

        st.flows.unregister_cookie(cookie);
        st.flows.remove(id);
        Ok(())
    }

    /// Take entry `id` out of the hardware and out of its bucket. A
    /// subflow is deleted outright; anything else stays in the table
    /// for the caller to dispose of.
    pub(super) fn remove_flow(&self, st: &mut PpeState, id: EntryId) {
        st.flows.unlink_bucket(id);

        let Some((slot, mut data)) = st.flows.get(id).map(|e| (e.hash, e.data))
        else {
            return;
        };

        if let Some(slot) = slot {
            data.ib1.set_state(BindState::Invalid);
            // Failure is logged by the commit; the entry is forgotten
            // regardless and the hardware will age the slot out.
            let _ = self.commit_entry(st, &mut data, slot);
            if let Some(e) = st.flows.get_mut(id) {
                e.data = data;
                e.hash = None;
            }
        }

        if st.flows.get(id).is_some_and(|e| e.is_subflow()) {
            st.flows.remove(id);
        }
    }

    /// Unregister L2 flow `id` and evict all its subflows.
    pub(super) fn remove_l2_flow(&self, st: &mut PpeState, id: EntryId) {
        st.flows.unlink_l2(id);
        for sub in st.flows.subflows(id) {
            self.remove_flow(st, sub);
            self.stats.subflows_evicted.incr();
        }
    }

    fn evict_subflow(&self, st: &mut PpeState, id: EntryId) {
        if let Some(e) = st.flows.get_mut(id) {
            e.hash = None;
        }
        self.remove_flow(st, id);
        self.stats.subflows_evicted.incr();
    }

    // ================================================================
    // Insertion
    // ================================================================

    /// Receive-path hook: `frame` was seen by the engine at hash slot
    /// `hash`. Looks at each slot at most once per sample interval.
    pub fn on_sample(&self, frame: &[u8], hash: u32) {
        if hash > PPE_HASH_MASK {
            return;
        }
        self.stats.samples.incr();

        let now = Moment::now().raw_millis();
        let last = &self.check_time[hash as usize];
        let prev = last.load(Ordering::Relaxed);
        let due = prev == NEVER_CHECKED
            || now.saturating_sub(prev) >= self.cfg.sample_interval_ms;

        // Only the receiver that moves the check time on gets to look.
        let won = due
            && last
                .compare_exchange(
                    prev,
                    now,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok();
        if !won {
            self.stats.samples_throttled.incr();
            return;
        }

        self.insert_entry(frame, hash);
    }

    fn insert_entry(&self, frame: &[u8], slot: u32) {
        let mut st = self.state.lock();

        let hwe = match st.foe.read(slot) {
            Ok(hwe) => hwe,
            Err(e) => {
                self.log(LogLevel::Warn, &format!("sample slot {slot}: {e}"));
                return;
            }
        };

        if hwe.ib1.state() == BindState::Bind {
            return;
        }

        let index = self.entry_hash(&hwe);
        let mut commit_done = false;

        for id in st.flows.bucket(index).to_vec() {
            let Some(e) = st.flows.get(id) else {
                continue;
            };

            if e.is_subflow() {
                if hwe.ib1.state() != BindState::Bind {
                    self.evict_subflow(&mut st, id);
                }
                continue;
            }

            // Only a pending entry is a candidate. A bound one keeps its
            // slot, whatever was sampled here.
            if e.hash.is_some() || !e.data.same_flow(&hwe) {
                continue;
            }

            // First match wins; the hash of a failed commit stays
            // unset, as does that of any later match.
            if commit_done {
                continue;
            }

            let mut data = e.data;
            let res = self.commit_entry(&mut st, &mut data, slot);
            if let Some(e) = st.flows.get_mut(id) {
                match res {
                    Ok(()) => {
                        e.data = data;
                        e.hash = Some(slot);
                        e.stats = FoeStats64::default();
                    }
                    Err(_) => e.hash = None,
                }
            }
            commit_done = true;
        }

        if commit_done {
            return;
        }

        let Some(key) = ether::bridge_key(frame) else {
            return;
        };
        let Some(parent) = st.flows.lookup_l2(&key) else {
            return;
        };

        match self.commit_subflow(&mut st, parent, &hwe, slot) {
            Ok(_) => self.stats.subflows_created.incr(),
            Err(e) => self.log(
                LogLevel::Warn,
                &format!("failed to create subflow at slot {slot}: {e}"),
            ),
        }
    }

    /// Build a subflow of L2 flow `parent` from the unbound hardware
    /// record `hwe` found at `slot`, and commit it there.
    fn commit_subflow(
        &self,
        st: &mut PpeState,
        parent: EntryId,
        hwe: &FoeEntry,
        slot: u32,
    ) -> Result<EntryId> {
        let pdata = st
            .flows
            .get(parent)
            .map(|p| p.data)
            .ok_or_else(|| PpeError::BadRule(format!("no L2 flow {parent}")))?;

        let mut sub = *hwe;
        sub.ib1 = hwe.ib1.merge(pdata.ib1, Ib1::SUBFLOW_KEEP);
        *sub.l2_mut() = *pdata.l2();
        *sub.ib2_mut() = pdata.ib2();
        *sub.qdata_mut() = pdata.qdata();

        let hnapt = sub.packet_type() == Some(PacketType::Ipv4Hnapt);
        match &mut sub.data {
            FoeData::Ipv6(v6) => {
                v6.l2.src_mac_hi = 0;
                v6.l2.set_smac_id(SMAC_ID_KEEP);
            }
            FoeData::Ipv4(v4) if hnapt => v4.new_tuple = v4.orig_tuple,
            _ => {}
        }

        let id = st.flows.add_subflow(parent, sub, slot)?;
        if let Err(e) = self.commit_entry(st, &mut sub, slot) {
            st.flows.remove(id);
            return Err(e);
        }

        if let Some(e) = st.flows.get_mut(id) {
            e.data = sub;
        }
        Ok(id)
    }

    // ================================================================
    // Idle time and stats
    // ================================================================

    fn entry_idle_time(&self, ib1: Ib1) -> u32 {
        let now = self.timestamp();
        if ib1.state() == BindState::Bind {
            idle_delta(
                now,
                ib1.bind_timestamp(),
                field_max(IB1_BIND_TIMESTAMP),
            )
        } else {
            idle_delta(
                field_get(IB1_UNBIND_TIMESTAMP, now),
                ib1.unbind_timestamp(),
                field_max(IB1_UNBIND_TIMESTAMP),
            )
        }
    }

    /// Refresh an L2 flow from its subflows: evict the ones no longer
    /// bound and take the bind timestamp of the most recently active.
    fn l2_entry_update(&self, st: &mut PpeState, id: EntryId) {
        let Some(mut ib1) = st.flows.get(id).map(|e| e.data.ib1) else {
            return;
        };
        let mut min_idle = self.entry_idle_time(ib1);

        for sub in st.flows.subflows(id) {
            let Some(slot) = st.flows.get(sub).and_then(|e| e.hash) else {
                continue;
            };
            let Ok(hwe) = st.foe.read(slot) else {
                continue;
            };

            if hwe.ib1.state() != BindState::Bind {
                unbind_probe(sub, slot);
                self.evict_subflow(st, sub);
                continue;
            }

            let idle = self.entry_idle_time(hwe.ib1);
            if idle >= min_idle {
                continue;
            }

            min_idle = idle;
            ib1.set_bind_timestamp(hwe.ib1.bind_timestamp());
        }

        if let Some(e) = st.flows.get_mut(id) {
            e.data.ib1 = ib1;
        }
    }

    /// Check that entry `id` still owns its slot, taking the live
    /// control word if it does and dropping the slot if it does not.
    pub(super) fn flow_entry_update(&self, st: &mut PpeState, id: EntryId) {
        let Some(e) = st.flows.get(id) else {
            return;
        };

        if e.is_l2() {
            self.l2_entry_update(st, id);
            return;
        }

        let Some(slot) = e.hash else {
            return;
        };
        let Ok(hwe) = st.foe.read(slot) else {
            return;
        };

        let Some(e) = st.flows.get_mut(id) else {
            return;
        };
        if hwe.ib1.state() != BindState::Bind || !e.data.same_flow(&hwe) {
            e.hash = None;
            self.stats.entries_unbound.incr();
            unbind_probe(id, slot);
            return;
        }

        e.data.ib1 = hwe.ib1;
    }

    /// The idle time of entry `id` in timestamp units, after a
    /// refresh.
    pub(super) fn idle_time(&self, st: &mut PpeState, id: EntryId) -> u32 {
        self.flow_entry_update(st, id);
        st.flows.get(id).map(|e| self.entry_idle_time(e.data.ib1)).unwrap_or(0)
    }

    /// Read the 64-bit counters of `slot`.
    pub(super) fn get_stats(
        &self,
        st: &mut PpeState,
        slot: u32,
    ) -> Option<FoeStats64> {
        let index = self.stats_index(&st.foe, slot)?;
        let guard = self.npu.read();
        let npu = guard.get()?;
        let hw = npu.ops.read_stats(index);
        Some(st.stats_ext[index as usize].extend(hw))
    }

    pub(super) fn lock_state(&self) -> KMutexGuard<'_, PpeState> {
        self.state.lock()
    }

    // ================================================================
    // Dumps and the command interface
    // ================================================================

    pub fn dump_flows(&self) -> DumpFlowsResp {
        DumpFlowsResp { flows: self.state.lock().flows.dump() }
    }

    pub fn dump_stats(&self) -> DumpStatsResp {
        self.stats.snapshot()
    }

    /// Run a serialized [`PpeCmdReq`] and return the serialized
    /// response.
    pub fn handle_cmd(&self, req: &[u8]) -> Result<Vec<u8>> {
        let req: PpeCmdReq = postcard::from_bytes(req)
            .map_err(|e| PpeError::DeserCmdReq(e.to_string()))?;

        if !req.check_version() {
            return Err(PpeError::BadApiVersion {
                user: req.api_version,
                kernel: API_VERSION,
            });
        }

        match req.cmd {
            PpeCmd::FlowOffload => {
                let mut f: FlowClsOffload = postcard::from_bytes(&req.body)
                    .map_err(|e| PpeError::DeserCmdReq(e.to_string()))?;
                self.setup_tc_block_cb(&mut f)?;
                encode_resp(&f.stats)
            }
            PpeCmd::DumpFlows => encode_resp(&self.dump_flows()),
            PpeCmd::DumpStats => encode_resp(&self.dump_stats()),
        }
    }
}

fn encode_resp<T: CmdOk>(resp: &T) -> Result<Vec<u8>> {
    postcard::to_allocvec(resp).map_err(|e| PpeError::SerCmdResp(e.to_string()))
}

#[cfg(any(feature = "test-help", test))]
impl Ppe {
    /// Read the hardware record at `slot`.
    pub fn hw_entry(&self, slot: u32) -> Result<FoeEntry> {
        self.state.lock().foe.read(slot)
    }

    /// Attach the co-processor without going through a command.
    pub fn attach(&self) -> Result<()> {
        let _token = self.offload_lock.lock();
        if self.is_attached() {
            return Ok(());
        }
        self.offload_setup()
    }

    /// The refreshed idle time of the flow registered under `cookie`,
    /// in timestamp units.
    pub fn idle_of(&self, cookie: u64) -> Option<u32> {
        let mut st = self.state.lock();
        let id = st.flows.lookup_cookie(cookie)?;
        Some(self.idle_time(&mut st, id))
    }

    /// Store `entry` at `slot` the way the engine itself would when it
    /// learns or ages a flow, bypassing the co-processor.
    pub fn set_hw_entry(&self, slot: u32, entry: &FoeEntry) -> Result<()> {
        self.state.lock().foe.write(slot, entry).map(|_| ())
    }

    /// The hash the engine would file `entry` under.
    pub fn hash_of(&self, entry: &FoeEntry) -> u32 {
        self.entry_hash(entry)
    }

    /// A copy of the entry registered under `cookie`.
    pub fn flow_entry(
        &self,
        cookie: u64,
    ) -> Option<super::flow_table::FlowTableEntry> {
        let st = self.state.lock();
        let id = st.flows.lookup_cookie(cookie)?;
        st.flows.get(id).cloned()
    }

    /// Copies of the subflows of the L2 flow registered under
    /// `cookie`.
    pub fn subflows(
        &self,
        cookie: u64,
    ) -> Vec<super::flow_table::FlowTableEntry> {
        let st = self.state.lock();
        let Some(id) = st.flows.lookup_cookie(cookie) else {
            return Vec::new();
        };
        st.flows
            .subflows(id)
            .into_iter()
            .filter_map(|s| st.flows.get(s).cloned())
            .collect()
    }

    /// Every entry id in the table, and every id in any bucket.
    pub fn table_ids(&self) -> (Vec<EntryId>, Vec<EntryId>) {
        let st = self.state.lock();
        let buckets = (0..=PPE_HASH_MASK)
            .flat_map(|b| st.flows.bucket(b).to_vec())
            .collect();
        (st.flows.ids(), buckets)
    }
}
