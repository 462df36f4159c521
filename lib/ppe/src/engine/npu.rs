// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The co-processor (NPU) the engine depends on.
//!
//! The NPU owns SRAM-resident table entries and the per-flow
//! accounting counters. Its handle is published to the data path
//! through a [`KRcu`](crate::ddi::sync::KRcu), see
//! [`Ppe`](super::ppe::Ppe).

use crate::api::PpeError;
use alloc::sync::Arc;

/// One hardware accounting counter, as maintained by the NPU. Both
/// fields wrap at 32 bits.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[repr(C)]
pub struct FoeStats {
    pub bytes: u32,
    pub packets: u32,
}

/// A counter widened to 64 bits.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FoeStats64 {
    pub bytes: u64,
    pub packets: u64,
}

/// The high words the driver keeps for one [`FoeStats`], bumped each
/// time the NPU's low word is seen to wrap.
#[derive(Clone, Copy, Debug, Default)]
pub struct FoeStatsExt {
    last: FoeStats,
    bytes_hi: u32,
    packets_hi: u32,
}

impl FoeStatsExt {
    /// Fold a fresh reading of the hardware counter into a 64-bit
    /// value. Readings must be taken more often than the low word can
    /// wrap twice.
    pub fn extend(&mut self, hw: FoeStats) -> FoeStats64 {
        if hw.bytes < self.last.bytes {
            self.bytes_hi = self.bytes_hi.wrapping_add(1);
        }
        if hw.packets < self.last.packets {
            self.packets_hi = self.packets_hi.wrapping_add(1);
        }
        self.last = hw;

        FoeStats64 {
            bytes: (self.bytes_hi as u64) << 32 | hw.bytes as u64,
            packets: (self.packets_hi as u64) << 32 | hw.packets as u64,
        }
    }
}

/// The operations the NPU driver offers the engine.
pub trait Npu: Send + Sync {
    fn ppe_init(&self) -> Result<(), PpeError>;
    fn ppe_deinit(&self) -> Result<(), PpeError>;

    /// Load the record `entry` into SRAM slot `slot`.
    fn ppe_foe_commit_entry(
        &self,
        entry: &[u8],
        slot: u32,
        ppe2: bool,
    ) -> Result<(), PpeError>;

    /// Replace the first `count` SRAM records with those in
    /// `entries`.
    fn ppe_flush_sram_entries(
        &self,
        entries: &[u8],
        count: u32,
    ) -> Result<(), PpeError>;

    /// Read accounting counter `index` from the shared stats region.
    fn read_stats(&self, index: u32) -> FoeStats;

    fn reset_stats(&self, index: u32);
}

/// How the engine obtains and releases the NPU.
pub trait NpuProvider: Send + Sync {
    fn get(&self) -> Result<Arc<dyn Npu>, PpeError>;

    /// Ask for the NPU driver to be loaded, after which `get()` is
    /// retried once.
    fn request_module(&self) {}

    fn put(&self, _npu: Arc<dyn Npu>) {}
}

/// The NPU as published to readers.
pub struct AttachedNpu {
    pub ops: Arc<dyn Npu>,
}
