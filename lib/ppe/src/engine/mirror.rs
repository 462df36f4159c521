// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Access to the hardware copy of the flow table.
//!
//! The table is split in two. Slots below [`PPE_SRAM_NUM_ENTRIES`]
//! live in on-chip SRAM and can only be reached one record at a time
//! through a request/acknowledge register window. The rest live in a
//! host memory buffer the engine walks directly. Both are mirrored in
//! [`FoeTable`]'s buffer, which for SRAM slots is only as fresh as the
//! last read or write of that slot.

use super::foe::FOE_ENTRY_WORDS;
use super::foe::FoeEntry;
use super::foe::FoeEntryRaw;
use super::foe::PPE_SRAM_NUM_ENTRIES;
use super::foe::PPE1_SRAM_NUM_ENTRIES;
use super::regs::*;
use crate::api::PPE_NUM_ENTRIES;
use crate::api::PpeError;
use crate::ddi::time::poll_timeout;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;
use core::sync::atomic::fence;
use zerocopy::IntoBytes;

/// Interval between two looks at the SRAM acknowledge bit.
pub const SRAM_POLL_INTERVAL_US: u64 = 10;
/// How long an SRAM request may stay unacknowledged.
pub const SRAM_POLL_BUDGET_US: u64 = 100;

/// The frame-engine register block.
pub trait FeRegs: Send + Sync {
    fn rr(&self, reg: u32) -> u32;
    fn wr(&self, reg: u32, val: u32);

    fn rmw(&self, reg: u32, mask: u32, val: u32) {
        let cur = self.rr(reg);
        self.wr(reg, (cur & !mask) | val);
    }

    fn set(&self, reg: u32, mask: u32) {
        self.rmw(reg, 0, mask);
    }

    fn clear(&self, reg: u32, mask: u32) {
        self.rmw(reg, mask, 0);
    }

    /// Bus address of the flow-table buffer as seen by the engine.
    fn foe_dma_addr(&self) -> u32 {
        0
    }
}

pub fn ppe2_enabled(regs: &dyn FeRegs) -> bool {
    regs.rr(reg_ppe_glo_cfg(1)) & PPE_GLO_CFG_EN_MASK != 0
}

pub struct FoeTable {
    regs: Arc<dyn FeRegs>,
    foe: Vec<FoeEntryRaw>,
}

impl FoeTable {
    pub fn new(regs: Arc<dyn FeRegs>) -> Self {
        let foe = vec![FoeEntryRaw::default(); PPE_NUM_ENTRIES as usize];
        Self { regs, foe }
    }

    pub fn ppe2_enabled(&self) -> bool {
        ppe2_enabled(&*self.regs)
    }

    /// SRAM slots served by each engine instance.
    pub fn sram_entries(&self) -> u32 {
        if self.ppe2_enabled() {
            PPE1_SRAM_NUM_ENTRIES
        } else {
            PPE_SRAM_NUM_ENTRIES
        }
    }

    /// Is `slot` in the half of SRAM owned by the second engine?
    pub fn is_ppe2_slot(&self, slot: u32) -> bool {
        slot < PPE_SRAM_NUM_ENTRIES
            && slot >= PPE1_SRAM_NUM_ENTRIES
            && self.ppe2_enabled()
    }

    fn check_slot(slot: u32) -> Result<usize, PpeError> {
        if slot >= PPE_NUM_ENTRIES {
            return Err(PpeError::BadRule(format!("slot {slot} out of range")));
        }
        Ok(slot as usize)
    }

    fn sram_request(&self, slot: u32, write: bool) -> Result<(), PpeError> {
        let n = usize::from(self.is_ppe2_slot(slot));
        let ctrl = reg_ppe_ram_ctrl(n);
        let mut val = field_prep(PPE_SRAM_CTRL_ENTRY_MASK, slot)
            | PPE_SRAM_CTRL_REQ_MASK;
        if write {
            val |= PPE_SRAM_CTRL_WR_MASK;
        }
        self.regs.wr(ctrl, val);

        let acked =
            poll_timeout(SRAM_POLL_INTERVAL_US, SRAM_POLL_BUDGET_US, || {
                self.regs.rr(ctrl) & PPE_SRAM_CTRL_ACK_MASK != 0
            });

        if acked { Ok(()) } else { Err(PpeError::Timeout { slot }) }
    }

    /// Fetch the current hardware record of `slot`.
    pub fn read(&mut self, slot: u32) -> Result<FoeEntry, PpeError> {
        let idx = Self::check_slot(slot)?;

        if slot < PPE_SRAM_NUM_ENTRIES {
            self.sram_request(slot, false)?;
            let n = usize::from(self.is_ppe2_slot(slot));
            let words: [u32; FOE_ENTRY_WORDS] =
                core::array::from_fn(|i| self.regs.rr(reg_ppe_ram_entry(n, i)));
            self.foe[idx] = FoeEntryRaw::from_words(&words);
        }

        Ok(FoeEntry::from_raw(&self.foe[idx]))
    }

    /// Store `entry` into `slot`. The body is made visible before
    /// `ib1`, so the engine never sees a bind state paired with a
    /// stale body.
    ///
    /// Returns the record as written, for handing to the co-processor.
    pub fn write(
        &mut self,
        slot: u32,
        entry: &FoeEntry,
    ) -> Result<&FoeEntryRaw, PpeError> {
        let idx = Self::check_slot(slot)?;
        let raw = entry.to_raw();

        if slot < PPE_SRAM_NUM_ENTRIES {
            let n = usize::from(self.is_ppe2_slot(slot));
            for (i, w) in raw.words().iter().enumerate().skip(1) {
                self.regs.wr(reg_ppe_ram_entry(n, i), *w);
            }
            self.regs.wr(reg_ppe_ram_entry(n, 0), raw.ib1);
            self.sram_request(slot, true)?;
        }

        let hwe = &mut self.foe[idx];
        hwe.d = raw.d;
        fence(Ordering::Release);
        hwe.ib1 = raw.ib1;
        Ok(&self.foe[idx])
    }

    /// Zero the SRAM part of the buffer and return it, ready to be
    /// pushed to the co-processor as the initial SRAM contents.
    pub fn clear_sram(&mut self) -> &[u8] {
        let n = self.sram_entries() as usize;
        for hwe in &mut self.foe[..n] {
            *hwe = FoeEntryRaw::default();
        }
        self.foe[..PPE_SRAM_NUM_ENTRIES as usize].as_bytes()
    }
}
