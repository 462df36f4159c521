// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Ethernet header access for sampled frames.

use super::foe::BridgeKey;
use crate::api::MacAddr;
use smoltcp::wire::EthernetFrame;

/// The MAC pair of a sampled frame, as used to find the L2 flow it
/// belongs to. `None` when the frame is too short to carry a header.
pub fn bridge_key(frame: &[u8]) -> Option<BridgeKey> {
    let eth = EthernetFrame::new_checked(frame).ok()?;
    Some(BridgeKey {
        dest: MacAddr::from(eth.dst_addr()),
        src: MacAddr::from(eth.src_addr()),
    })
}
