// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Engine configuration.

use serde::Deserialize;
use serde::Serialize;

/// Number of hardware stats counters available to the first engine
/// instance when flow accounting is enabled.
pub const PPE1_STATS_NUM_ENTRIES: u32 = 4 * 1024;

/// Number of hardware stats counters across both engine instances.
pub const PPE_STATS_NUM_ENTRIES: u32 = 2 * PPE1_STATS_NUM_ENTRIES;

/// Aging deltas programmed into the bind-age registers, in hardware
/// timestamp ticks.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct BindAgeCfg {
    pub non_l4: u16,
    pub udp: u16,
    pub tcp_fin: u16,
    pub tcp: u16,
}

impl Default for BindAgeCfg {
    fn default() -> Self {
        Self { non_l4: 1, udp: 12, tcp_fin: 1, tcp: 7 }
    }
}

/// Configuration for a [`Ppe`] instance.
///
/// Every field has a default matching the values the engine has
/// always been brought up with, so a configuration file need only
/// name what it changes.
///
/// [`Ppe`]: ../ppe/engine/ppe/struct.Ppe.html
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct PpeCfg {
    /// Account per-flow packets and bytes through the co-processor's
    /// stats region.
    pub flow_stats: bool,

    /// Minimum interval between two looks at the same hash slot from
    /// the receive path.
    pub sample_interval_ms: u64,

    pub hash_seed: u32,

    /// Egress MTU programmed for every port.
    pub max_mtu: u16,

    pub bind_age: BindAgeCfg,

    /// Number of frame-engine (GDM) ports whose MTU is programmed.
    pub num_ports: u8,
}

impl Default for PpeCfg {
    fn default() -> Self {
        Self {
            flow_stats: true,
            sample_interval_ms: 100,
            hash_seed: 0x12345678,
            max_mtu: 9216,
            bind_age: BindAgeCfg::default(),
            num_ports: 4,
        }
    }
}

impl PpeCfg {
    /// The number of stats counters owned by the first engine
    /// instance, zero when flow accounting is disabled.
    pub fn ppe1_stats_entries(&self) -> u32 {
        if self.flow_stats { PPE1_STATS_NUM_ENTRIES } else { 0 }
    }

    pub fn stats_entries(&self) -> u32 {
        if self.flow_stats { PPE_STATS_NUM_ENTRIES } else { 0 }
    }
}
