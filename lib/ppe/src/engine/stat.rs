// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Engine counters.

use crate::api::DumpStatsResp;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn val(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct PpeStats {
    /// Samples delivered by the receive path.
    pub samples: Counter,
    /// Samples dropped because the same slot was looked at recently.
    pub samples_throttled: Counter,
    pub commits: Counter,
    pub commit_errors: Counter,
    pub subflows_created: Counter,
    pub subflows_evicted: Counter,
    /// Entries found to have lost their hardware slot.
    pub entries_unbound: Counter,
}

impl PpeStats {
    pub fn snapshot(&self) -> DumpStatsResp {
        DumpStatsResp {
            samples: self.samples.val(),
            samples_throttled: self.samples_throttled.val(),
            commits: self.commits.val(),
            commit_errors: self.commit_errors.val(),
            subflows_created: self.subflows_created.val(),
            subflows_evicted: self.subflows_evicted.val(),
            entries_unbound: self.entries_unbound.val(),
        }
    }
}
