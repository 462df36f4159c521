// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Moments, busy-wait delays and bounded polling.

use core::time::Duration;
use std::sync::OnceLock;
use std::time::Instant;

/// The number of milliseconds in a second.
pub const MILLIS: u64 = 1_000;
/// The number of microseconds in a second.
pub const MICROS: u64 = 1_000_000;

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// A moment in time.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct Moment {
    inner: Instant,
}

impl Moment {
    pub fn now() -> Self {
        Self { inner: Instant::now() }
    }

    /// Milliseconds elapsed from `earlier` to `self`, saturating at
    /// zero.
    pub fn delta_as_millis(&self, earlier: Moment) -> u64 {
        self.inner.saturating_duration_since(earlier.inner).as_millis() as u64
    }

    /// Milliseconds since an arbitrary, fixed, process-wide epoch.
    /// Only meaningful when compared against another raw value.
    pub fn raw_millis(&self) -> u64 {
        self.inner.saturating_duration_since(epoch()).as_millis() as u64
    }
}

/// Spin for `us` microseconds without yielding the CPU.
pub fn delay(us: u64) {
    let until = Instant::now() + Duration::from_micros(us);
    while Instant::now() < until {
        core::hint::spin_loop();
    }
}

/// Evaluate `cond` every `interval_us` until it holds or `budget_us`
/// has passed. The condition is always checked once more after the
/// budget runs out, so a slow caller cannot miss a late success.
pub fn poll_timeout<F>(interval_us: u64, budget_us: u64, mut cond: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_micros(budget_us);

    loop {
        if cond() {
            return true;
        }

        if Instant::now() >= deadline {
            return cond();
        }

        delay(interval_us);
    }
}
