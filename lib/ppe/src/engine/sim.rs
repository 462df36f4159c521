// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! A simulated frame engine and NPU, for tests.
//!
//! [`SimHw`] answers the register accesses the engine makes: it
//! implements the SRAM request/acknowledge window over its own SRAM
//! array, exposes a settable timestamp counter and PPE2 enable bit,
//! and plays the NPU by loading committed records into that same SRAM
//! and serving a stats region tests can fill in.

use super::foe::FOE_ENTRY_WORDS;
use super::foe::FoeEntryRaw;
use super::foe::PPE_ENTRY_SIZE;
use super::foe::PPE_SRAM_NUM_ENTRIES;
use super::mirror::FeRegs;
use super::npu::FoeStats;
use super::npu::Npu;
use super::npu::NpuProvider;
use super::offload::NetDevs;
use super::prepare::Egress;
use super::regs::*;
use crate::api::PPE_STATS_NUM_ENTRIES;
use crate::api::PpeError;
use crate::ddi::sync::KMutex;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::AtomicU32;
use core::sync::atomic::Ordering;
use zerocopy::FromBytes;

struct SimState {
    regs: BTreeMap<u32, u32>,
    sram: Vec<FoeEntryRaw>,
    sram_ack: bool,
    sram_requests: u64,
    stats: Vec<FoeStats>,
    commits: Vec<(u32, bool)>,
    inits: u32,
    deinits: u32,
    flushes: u32,
    fail_init: Option<i32>,
    fail_commit: Option<i32>,
}

pub struct SimHw {
    state: KMutex<SimState>,
}

impl Default for SimHw {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHw {
    pub fn new() -> Self {
        let state = SimState {
            regs: BTreeMap::new(),
            sram: vec![FoeEntryRaw::default(); PPE_SRAM_NUM_ENTRIES as usize],
            sram_ack: true,
            sram_requests: 0,
            stats: vec![FoeStats::default(); PPE_STATS_NUM_ENTRIES as usize],
            commits: vec![],
            inits: 0,
            deinits: 0,
            flushes: 0,
            fail_init: None,
            fail_commit: None,
        };
        Self { state: KMutex::new(state) }
    }

    pub fn reg(&self, reg: u32) -> u32 {
        self.state.lock().regs.get(&reg).copied().unwrap_or(0)
    }

    pub fn set_timestamp(&self, ts: u16) {
        self.state.lock().regs.insert(REG_FE_FOE_TS, ts as u32);
    }

    pub fn set_ppe2(&self, enabled: bool) {
        let mut state = self.state.lock();
        let reg = reg_ppe_glo_cfg(1);
        let cur = state.regs.get(&reg).copied().unwrap_or(0);
        let val = if enabled {
            cur | PPE_GLO_CFG_EN_MASK
        } else {
            cur & !PPE_GLO_CFG_EN_MASK
        };
        state.regs.insert(reg, val);
    }

    /// Stop acknowledging SRAM window requests.
    pub fn set_sram_ack(&self, ack: bool) {
        self.state.lock().sram_ack = ack;
    }

    pub fn sram_requests(&self) -> u64 {
        self.state.lock().sram_requests
    }

    pub fn sram_entry(&self, slot: u32) -> FoeEntryRaw {
        self.state.lock().sram[slot as usize]
    }

    /// Change an SRAM record the way the engine itself would, behind
    /// the driver's back.
    pub fn set_sram_entry(&self, slot: u32, raw: &FoeEntryRaw) {
        self.state.lock().sram[slot as usize] = *raw;
    }

    pub fn set_stats(&self, index: u32, stats: FoeStats) {
        self.state.lock().stats[index as usize] = stats;
    }

    pub fn stats(&self, index: u32) -> FoeStats {
        self.state.lock().stats[index as usize]
    }

    pub fn commits(&self) -> Vec<(u32, bool)> {
        self.state.lock().commits.clone()
    }

    pub fn inits(&self) -> u32 {
        self.state.lock().inits
    }

    pub fn deinits(&self) -> u32 {
        self.state.lock().deinits
    }

    pub fn flushes(&self) -> u32 {
        self.state.lock().flushes
    }

    pub fn fail_init(&self, errno: Option<i32>) {
        self.state.lock().fail_init = errno;
    }

    pub fn fail_commit(&self, errno: Option<i32>) {
        self.state.lock().fail_commit = errno;
    }

    fn sram_window(state: &mut SimState, n: usize, val: u32) {
        state.sram_requests += 1;
        let ctrl = reg_ppe_ram_ctrl(n);

        if !state.sram_ack {
            state.regs.insert(ctrl, val & !PPE_SRAM_CTRL_ACK_MASK);
            return;
        }

        let slot = field_get(PPE_SRAM_CTRL_ENTRY_MASK, val) as usize;
        if slot < state.sram.len() {
            if val & PPE_SRAM_CTRL_WR_MASK != 0 {
                let words: [u32; FOE_ENTRY_WORDS] = core::array::from_fn(|i| {
                    state
                        .regs
                        .get(&reg_ppe_ram_entry(n, i))
                        .copied()
                        .unwrap_or(0)
                });
                state.sram[slot] = FoeEntryRaw::from_words(&words);
            } else {
                let words = state.sram[slot].words();
                for (i, w) in words.iter().enumerate() {
                    state.regs.insert(reg_ppe_ram_entry(n, i), *w);
                }
            }
        }

        state.regs.insert(ctrl, val | PPE_SRAM_CTRL_ACK_MASK);
    }
}

impl FeRegs for SimHw {
    fn rr(&self, reg: u32) -> u32 {
        self.reg(reg)
    }

    fn wr(&self, reg: u32, val: u32) {
        let mut state = self.state.lock();

        for n in 0..PPE_NUM {
            if reg == reg_ppe_ram_ctrl(n) && val & PPE_SRAM_CTRL_REQ_MASK != 0
            {
                Self::sram_window(&mut state, n, val);
                return;
            }

            if reg == reg_updmem_ctrl(n) && val & PPE_UPDMEM_REQ_MASK != 0 {
                state.regs.insert(reg, val | PPE_UPDMEM_ACK_MASK);
                return;
            }
        }

        state.regs.insert(reg, val);
    }

    fn foe_dma_addr(&self) -> u32 {
        0x8000_0000
    }
}

impl Npu for SimHw {
    fn ppe_init(&self) -> Result<(), PpeError> {
        let mut state = self.state.lock();
        state.inits += 1;
        match state.fail_init {
            Some(errno) => {
                Err(PpeError::Npu { errno, msg: "ppe init failed".into() })
            }
            None => Ok(()),
        }
    }

    fn ppe_deinit(&self) -> Result<(), PpeError> {
        self.state.lock().deinits += 1;
        Ok(())
    }

    fn ppe_foe_commit_entry(
        &self,
        entry: &[u8],
        slot: u32,
        ppe2: bool,
    ) -> Result<(), PpeError> {
        let mut state = self.state.lock();
        if let Some(errno) = state.fail_commit {
            return Err(PpeError::Npu { errno, msg: "commit failed".into() });
        }

        let raw = FoeEntryRaw::read_from_bytes(entry).map_err(|_| {
            PpeError::Npu { errno: libc::EINVAL, msg: "short entry".into() }
        })?;
        state.commits.push((slot, ppe2));
        state.sram[slot as usize] = raw;
        Ok(())
    }

    fn ppe_flush_sram_entries(
        &self,
        entries: &[u8],
        count: u32,
    ) -> Result<(), PpeError> {
        let mut state = self.state.lock();
        state.flushes += 1;
        for (i, chunk) in
            entries.chunks_exact(PPE_ENTRY_SIZE).take(count as usize).enumerate()
        {
            if let Ok(raw) = FoeEntryRaw::read_from_bytes(chunk) {
                state.sram[i] = raw;
            }
        }
        Ok(())
    }

    fn read_stats(&self, index: u32) -> FoeStats {
        self.state.lock().stats[index as usize]
    }

    fn reset_stats(&self, index: u32) {
        self.state.lock().stats[index as usize] = FoeStats::default();
    }
}

/// When the simulated NPU driver becomes available.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SimNpuLoad {
    Loaded,
    /// Only after the module has been requested.
    OnRequest,
    Never,
}

pub struct SimNpuProvider {
    hw: Arc<SimHw>,
    load: KMutex<SimNpuLoad>,
    gets: AtomicU32,
    puts: AtomicU32,
}

impl SimNpuProvider {
    pub fn new(hw: Arc<SimHw>, load: SimNpuLoad) -> Self {
        Self {
            hw,
            load: KMutex::new(load),
            gets: AtomicU32::new(0),
            puts: AtomicU32::new(0),
        }
    }

    pub fn gets(&self) -> u32 {
        self.gets.load(Ordering::Relaxed)
    }

    pub fn puts(&self) -> u32 {
        self.puts.load(Ordering::Relaxed)
    }
}

impl NpuProvider for SimNpuProvider {
    fn get(&self) -> Result<Arc<dyn Npu>, PpeError> {
        self.gets.fetch_add(1, Ordering::Relaxed);
        match *self.load.lock() {
            SimNpuLoad::Loaded => Ok(self.hw.clone()),
            _ => Err(PpeError::NoDevice("npu".into())),
        }
    }

    fn request_module(&self) {
        let mut load = self.load.lock();
        if *load == SimNpuLoad::OnRequest {
            *load = SimNpuLoad::Loaded;
        }
    }

    fn put(&self, _npu: Arc<dyn Npu>) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }
}

impl NpuProvider for Arc<SimNpuProvider> {
    fn get(&self) -> Result<Arc<dyn Npu>, PpeError> {
        (**self).get()
    }

    fn request_module(&self) {
        (**self).request_module()
    }

    fn put(&self, npu: Arc<dyn Npu>) {
        (**self).put(npu)
    }
}

/// A fixed interface-index to egress map.
#[derive(Clone, Debug, Default)]
pub struct SimNetDevs {
    devs: BTreeMap<u32, Egress>,
}

impl SimNetDevs {
    pub fn with(mut self, ifindex: u32, egress: Egress) -> Self {
        self.devs.insert(ifindex, egress);
        self
    }
}

impl NetDevs for SimNetDevs {
    fn egress(&self, ifindex: u32) -> Option<Egress> {
        self.devs.get(&ifindex).copied()
    }
}
