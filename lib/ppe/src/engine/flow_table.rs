// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The software flow table.
//!
//! Every offloaded flow has a [`FlowTableEntry`] here, whether or not
//! the hardware currently holds it. Entries live in an arena keyed by
//! [`EntryId`] and are indexed three ways:
//!
//! * by cookie, for the control plane;
//! * by MAC pair, for L2 flows, so that sampled frames can find the
//!   aggregate they belong to;
//! * by hash bucket, for L4 flows waiting for (or holding) a slot and
//!   for the subflows created under L2 flows.
//!
//! This module only maintains those structures. Everything that
//! touches the hardware lives in [`super::ppe`].

use super::foe::BridgeKey;
use super::foe::FoeEntry;
use super::npu::FoeStats64;
use crate::api::FlowEntryDump;
use crate::api::FlowKindDump;
use crate::api::PPE_NUM_ENTRIES;
use crate::api::PpeError;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

type Result<T> = core::result::Result<T, PpeError>;

pub type EntryId = u64;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FlowKind {
    /// A routed or NAT flow, committed as-is.
    L4,
    /// A bridged flow. It never occupies a slot itself; instead each
    /// L4 flow seen riding on it gets a subflow.
    L2 { subflows: Vec<EntryId> },
    L2Subflow { parent: EntryId },
}

#[derive(Clone, Debug)]
pub struct FlowTableEntry {
    /// The control-plane identifier; subflows have none.
    pub cookie: Option<u64>,
    /// The record to commit, or for a committed entry the record as
    /// last seen in hardware.
    pub data: FoeEntry,
    pub kind: FlowKind,
    /// The slot this entry was committed to. Only trustworthy while
    /// the slot is still bound to a record matching `data`.
    pub hash: Option<u32>,
    /// Counters as of the last stats report.
    pub stats: FoeStats64,
    bucket: Option<u32>,
}

impl FlowTableEntry {
    fn new(cookie: Option<u64>, data: FoeEntry, kind: FlowKind) -> Self {
        Self {
            cookie,
            data,
            kind,
            hash: None,
            stats: FoeStats64::default(),
            bucket: None,
        }
    }

    pub fn is_l2(&self) -> bool {
        matches!(self.kind, FlowKind::L2 { .. })
    }

    pub fn is_subflow(&self) -> bool {
        matches!(self.kind, FlowKind::L2Subflow { .. })
    }
}

pub struct FlowTable {
    entries: BTreeMap<EntryId, FlowTableEntry>,
    next_id: EntryId,
    cookies: BTreeMap<u64, EntryId>,
    l2_flows: BTreeMap<BridgeKey, EntryId>,
    buckets: Vec<Vec<EntryId>>,
}

impl Default for FlowTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowTable {
    pub fn new() -> Self {
        let mut buckets = Vec::new();
        buckets.resize_with(PPE_NUM_ENTRIES as usize, Vec::new);
        Self {
            entries: BTreeMap::new(),
            next_id: 1,
            cookies: BTreeMap::new(),
            l2_flows: BTreeMap::new(),
            buckets,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: EntryId) -> Option<&FlowTableEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut FlowTableEntry> {
        self.entries.get_mut(&id)
    }

    pub fn lookup_cookie(&self, cookie: u64) -> Option<EntryId> {
        self.cookies.get(&cookie).copied()
    }

    pub fn lookup_l2(&self, key: &BridgeKey) -> Option<EntryId> {
        self.l2_flows.get(key).copied()
    }

    pub fn bucket(&self, index: u32) -> &[EntryId] {
        self.buckets.get(index as usize).map(Vec::as_slice).unwrap_or(&[])
    }

    fn alloc_id(&mut self) -> EntryId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn bucket_push(&mut self, index: u32, id: EntryId) -> Result<()> {
        let bucket = self
            .buckets
            .get_mut(index as usize)
            .ok_or_else(|| PpeError::BadRule(format!("bucket {index}")))?;
        bucket.try_reserve(1).map_err(|_| PpeError::NoMem)?;
        bucket.push(id);
        Ok(())
    }

    /// Add a pending L4 flow to bucket `index`.
    pub fn add_l4(
        &mut self,
        cookie: u64,
        data: FoeEntry,
        index: u32,
    ) -> Result<EntryId> {
        let id = self.alloc_id();
        self.bucket_push(index, id)?;
        let mut entry = FlowTableEntry::new(Some(cookie), data, FlowKind::L4);
        entry.bucket = Some(index);
        self.entries.insert(id, entry);
        Ok(id)
    }

    /// Add an L2 flow. It takes over the MAC pair from any earlier
    /// flow registered under it; that flow stays in the table, and
    /// keeps its subflows, but sampled frames no longer find it.
    pub fn add_l2(&mut self, cookie: u64, data: FoeEntry) -> Result<EntryId> {
        let key = data
            .bridge_key()
            .ok_or_else(|| PpeError::BadRule("not a bridge entry".into()))?;
        let id = self.alloc_id();
        let kind = FlowKind::L2 { subflows: Vec::new() };
        self.entries.insert(id, FlowTableEntry::new(Some(cookie), data, kind));
        self.l2_flows.insert(key, id);
        Ok(id)
    }

    /// Create a subflow of L2 flow `parent`, already committed to
    /// `hash`.
    pub fn add_subflow(
        &mut self,
        parent: EntryId,
        data: FoeEntry,
        hash: u32,
    ) -> Result<EntryId> {
        let id = self.alloc_id();
        let Some(FlowTableEntry { kind: FlowKind::L2 { subflows }, .. }) =
            self.entries.get_mut(&parent)
        else {
            return Err(PpeError::BadRule(format!("{parent} is not L2")));
        };
        subflows.try_reserve(1).map_err(|_| PpeError::NoMem)?;

        self.bucket_push(hash, id)?;

        if let Some(FlowTableEntry { kind: FlowKind::L2 { subflows }, .. }) =
            self.entries.get_mut(&parent)
        {
            subflows.push(id);
        }

        let mut entry =
            FlowTableEntry::new(None, data, FlowKind::L2Subflow { parent });
        entry.hash = Some(hash);
        entry.bucket = Some(hash);
        self.entries.insert(id, entry);
        Ok(id)
    }

    pub fn register_cookie(&mut self, cookie: u64, id: EntryId) -> Result<()> {
        if self.cookies.contains_key(&cookie) {
            return Err(PpeError::FlowExists(cookie));
        }
        self.cookies.insert(cookie, id);
        Ok(())
    }

    pub fn unregister_cookie(&mut self, cookie: u64) -> Option<EntryId> {
        self.cookies.remove(&cookie)
    }

    /// Take `id` out of its hash bucket, if it is in one.
    pub fn unlink_bucket(&mut self, id: EntryId) {
        let Some(index) = self.entries.get_mut(&id).and_then(|e| e.bucket.take())
        else {
            return;
        };

        if let Some(bucket) = self.buckets.get_mut(index as usize) {
            bucket.retain(|b| *b != id);
        }
    }

    /// Forget the MAC pair of L2 flow `id`, unless another flow has
    /// since taken it over.
    pub fn unlink_l2(&mut self, id: EntryId) {
        let Some(key) = self.entries.get(&id).and_then(|e| e.data.bridge_key())
        else {
            return;
        };

        if self.l2_flows.get(&key) == Some(&id) {
            self.l2_flows.remove(&key);
        }
    }

    pub fn subflows(&self, id: EntryId) -> Vec<EntryId> {
        match self.entries.get(&id).map(|e| &e.kind) {
            Some(FlowKind::L2 { subflows }) => subflows.clone(),
            _ => Vec::new(),
        }
    }

    /// Delete `id` from the arena, unlinking a subflow from its
    /// parent. The caller is responsible for any hardware state.
    pub fn remove(&mut self, id: EntryId) -> Option<FlowTableEntry> {
        self.unlink_bucket(id);
        let entry = self.entries.remove(&id)?;

        if let FlowKind::L2Subflow { parent } = entry.kind {
            if let Some(FlowTableEntry {
                kind: FlowKind::L2 { subflows }, ..
            }) = self.entries.get_mut(&parent)
            {
                subflows.retain(|s| *s != id);
            }
        }

        Some(entry)
    }

    pub fn ids(&self) -> Vec<EntryId> {
        self.entries.keys().copied().collect()
    }

    pub fn dump(&self) -> Vec<FlowEntryDump> {
        let mut flows = Vec::with_capacity(self.entries.len());
        for (id, e) in &self.entries {
            let kind = match &e.kind {
                FlowKind::L4 => FlowKindDump::L4,
                FlowKind::L2 { subflows } => {
                    FlowKindDump::L2 { subflows: subflows.len() as u32 }
                }
                FlowKind::L2Subflow { parent } => {
                    FlowKindDump::L2Subflow { parent: *parent }
                }
            };

            flows.push(FlowEntryDump {
                id: *id,
                cookie: e.cookie,
                kind,
                hash: e.hash,
                packet_type: e.data.ib1.packet_type_raw(),
                packets: e.stats.packets,
                bytes: e.stats.bytes,
            });
        }
        flows
    }
}
