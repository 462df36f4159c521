// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Print command responses in human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both a control tool and integration tests.

use crate::api::DumpFlowsResp;
use crate::api::DumpStatsResp;
use crate::api::FlowEntryDump;
use crate::api::FlowKindDump;
use crate::engine::foe::PacketType;
use std::io::Write;
use std::string::String;
use std::string::ToString;
use tabwriter::TabWriter;

/// Print a [`DumpFlowsResp`].
pub fn print_flows(resp: &DumpFlowsResp) -> std::io::Result<()> {
    print_flows_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpFlowsResp`] into a given writer.
pub fn print_flows_into(
    writer: &mut impl Write,
    resp: &DumpFlowsResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "Flows: {}", resp.flows.len())?;
    write_hrb(&mut t)?;
    writeln!(t, "ID\tCOOKIE\tKIND\tTYPE\tSLOT\tPACKETS\tBYTES")?;
    for flow in &resp.flows {
        print_flow(&mut t, flow)?;
    }
    writeln!(t)?;
    t.flush()
}

fn print_flow(t: &mut impl Write, flow: &FlowEntryDump) -> std::io::Result<()> {
    let cookie = match flow.cookie {
        Some(c) => format!("{c:#x}"),
        None => "-".to_string(),
    };

    let kind = match flow.kind {
        FlowKindDump::L4 => "L4".to_string(),
        FlowKindDump::L2 { subflows } => format!("L2 ({subflows})"),
        FlowKindDump::L2Subflow { parent } => format!("SUB of {parent}"),
    };

    let ptype = match PacketType::try_from(flow.packet_type) {
        Ok(p) => p.to_string(),
        Err(raw) => format!("?{raw}"),
    };

    let slot = flow.hash.map(|h| h.to_string()).unwrap_or(String::from("-"));

    writeln!(
        t,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}",
        flow.id, cookie, kind, ptype, slot, flow.packets, flow.bytes,
    )
}

/// Print a [`DumpStatsResp`].
pub fn print_stats(resp: &DumpStatsResp) -> std::io::Result<()> {
    print_stats_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpStatsResp`] into a given writer.
pub fn print_stats_into(
    writer: &mut impl Write,
    resp: &DumpStatsResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "Engine Counters")?;
    write_hr(&mut t)?;
    writeln!(t, "samples\t{}", resp.samples)?;
    writeln!(t, "samples throttled\t{}", resp.samples_throttled)?;
    writeln!(t, "commits\t{}", resp.commits)?;
    writeln!(t, "commit errors\t{}", resp.commit_errors)?;
    writeln!(t, "subflows created\t{}", resp.subflows_created)?;
    writeln!(t, "subflows evicted\t{}", resp.subflows_evicted)?;
    writeln!(t, "entries unbound\t{}", resp.entries_unbound)?;
    t.flush()
}

/// Print a horizontal rule in bold.
pub fn write_hrb(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:=<70}", "=")
}

/// Print a horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}
