// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use super::API_VERSION;
use super::rule::FlowRule;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Debug;
use libc::c_int;
use serde::Deserialize;
use serde::Serialize;

/// The classifier-offload command being requested.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[repr(C)]
pub enum FlowCmd {
    Replace = 0,
    Destroy = 1,
    Stats = 2,
    TmpltCreate = 3,
    TmpltDestroy = 4,
}

impl TryFrom<c_int> for FlowCmd {
    type Error = ();

    fn try_from(num: c_int) -> Result<Self, Self::Error> {
        match num {
            0 => Ok(Self::Replace),
            1 => Ok(Self::Destroy),
            2 => Ok(Self::Stats),
            3 => Ok(Self::TmpltCreate),
            4 => Ok(Self::TmpltDestroy),
            _ => Err(()),
        }
    }
}

/// Statistics reported back for a flow.
///
/// The counters are accumulators: a stats request adds the activity
/// seen since the previous request rather than overwriting them.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FlowStats {
    /// Milliseconds-resolution timestamp of the last packet seen.
    pub lastused: u64,
    pub pkts: u64,
    pub bytes: u64,
}

impl CmdOk for FlowStats {}

/// A classifier-offload request, as delivered by the block callback.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FlowClsOffload {
    pub command: FlowCmd,
    /// Opaque identifier chosen by the control plane.
    pub cookie: u64,
    /// The rule to install; only consulted by `Replace`.
    pub rule: FlowRule,
    /// Output of a `Stats` request.
    pub stats: FlowStats,
}

impl FlowClsOffload {
    pub fn replace(cookie: u64, rule: FlowRule) -> Self {
        Self {
            command: FlowCmd::Replace,
            cookie,
            rule,
            stats: FlowStats::default(),
        }
    }

    pub fn destroy(cookie: u64) -> Self {
        Self {
            command: FlowCmd::Destroy,
            cookie,
            rule: FlowRule::default(),
            stats: FlowStats::default(),
        }
    }

    pub fn stats(cookie: u64) -> Self {
        Self {
            command: FlowCmd::Stats,
            cookie,
            rule: FlowRule::default(),
            stats: FlowStats::default(),
        }
    }
}

/// Commands accepted across the serialized command boundary.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[repr(C)]
pub enum PpeCmd {
    FlowOffload = 1, // run a classifier-offload request
    DumpFlows = 10,  // dump the software flow table
    DumpStats = 11,  // dump engine counters
}

impl TryFrom<c_int> for PpeCmd {
    type Error = ();

    fn try_from(num: c_int) -> Result<Self, Self::Error> {
        match num {
            1 => Ok(Self::FlowOffload),
            10 => Ok(Self::DumpFlows),
            11 => Ok(Self::DumpStats),
            _ => Err(()),
        }
    }
}

/// The envelope around every serialized command request.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PpeCmdReq {
    pub api_version: u64,
    pub cmd: PpeCmd,
    pub body: Vec<u8>,
}

impl PpeCmdReq {
    pub fn new(cmd: PpeCmd, body: Vec<u8>) -> Self {
        Self { api_version: API_VERSION, cmd, body }
    }

    /// Is this the expected API version?
    pub fn check_version(&self) -> bool {
        self.api_version == API_VERSION
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, thiserror::Error)]
pub enum PpeError {
    #[error("API version mismatch: user {user}, engine {kernel}")]
    BadApiVersion { user: u64, kernel: u64 },

    #[error("malformed rule: {0}")]
    BadRule(String),

    #[error("failed to deserialize command request: {0}")]
    DeserCmdReq(String),

    #[error("flow {0:#x} already offloaded")]
    FlowExists(u64),

    #[error("flow {0:#x} not found")]
    FlowNotFound(u64),

    #[error("no such device: {0}")]
    NoDevice(String),

    #[error("out of memory")]
    NoMem,

    #[error("co-processor call failed ({errno}): {msg}")]
    Npu { errno: c_int, msg: String },

    #[error("co-processor not attached")]
    NpuNotAttached,

    #[error("failed to serialize command response: {0}")]
    SerCmdResp(String),

    /// The SRAM access window never acknowledged a request.
    #[error("SRAM request for slot {slot} timed out")]
    Timeout { slot: u32 },

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl PpeError {
    /// Convert to an errno value.
    pub fn to_errno(&self) -> c_int {
        use libc::*;

        match self {
            Self::BadApiVersion { .. } => EPROTO,
            Self::BadRule(_) => EINVAL,
            Self::DeserCmdReq(_) => ENOMSG,
            Self::FlowExists(_) => EEXIST,
            Self::FlowNotFound(_) => ENOENT,
            Self::NoDevice(_) => ENODEV,
            Self::NoMem => ENOMEM,
            Self::Npu { errno, .. } => *errno,
            Self::NpuNotAttached => ENODEV,
            Self::SerCmdResp(_) => ENOMSG,
            Self::Timeout { .. } => ETIMEDOUT,
            Self::Unsupported(_) => EOPNOTSUPP,
        }
    }
}

/// A marker trait indicating a success response type that is returned
/// from a command and may be passed across the command boundary.
pub trait CmdOk: Debug + Serialize {}

impl CmdOk for () {}

/// Where an entry sits in the L2/L4 hierarchy.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum FlowKindDump {
    L4,
    L2 { subflows: u32 },
    L2Subflow { parent: u64 },
}

/// One software flow-table entry.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FlowEntryDump {
    pub id: u64,
    pub cookie: Option<u64>,
    pub kind: FlowKindDump,
    /// The hardware slot the entry is committed to, if any.
    pub hash: Option<u32>,
    pub packet_type: u8,
    pub packets: u64,
    pub bytes: u64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct DumpFlowsResp {
    pub flows: Vec<FlowEntryDump>,
}

impl CmdOk for DumpFlowsResp {}

/// Engine counters.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct DumpStatsResp {
    pub samples: u64,
    pub samples_throttled: u64,
    pub commits: u64,
    pub commit_errors: u64,
    pub subflows_created: u64,
    pub subflows_evicted: u64,
    pub entries_unbound: u64,
}

impl CmdOk for DumpStatsResp {}
