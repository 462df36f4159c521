// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Flow offload for the Airoha PPE (Packet Processing Engine).
//!
//! The engine mirrors classifier-offload rules into the hardware flow
//! table (the FOE table) and keeps that mirror honest in the face of
//! the hardware aging out and evicting entries on its own. See
//! [`engine::ppe::Ppe`] for the entry points.
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]
// Enable features needed for USDT, if needed.
#![cfg_attr(all(feature = "usdt", not(usdt_stable_asm)), feature(asm))]

#[macro_use]
extern crate alloc;

#[macro_use]
extern crate cfg_if;

pub mod api;
pub mod ddi;
pub mod engine;
#[cfg(feature = "std")]
pub mod print;
pub mod provider;

// ================================================================
// DTrace USDT Provider
//
// Allowing us to use USDT to trace commits and unbinds when running
// in std/test.
// ================================================================
#[cfg(feature = "usdt")]
#[usdt::provider]
mod ppe_provider {
    fn foe__commit(slot: u32, state: &str) {}
    fn flow__unbind(id: u64, slot: u32) {}
}
