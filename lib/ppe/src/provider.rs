// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Providers let the engine run in different contexts by plugging
//! in implementations of core services. Today that is only logging:
//! a driver routes messages to the kernel log, tests print them or
//! collect them for inspection.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;

use crate::ddi::sync::KMutex;

/// The set of all platform-specific providers required by the engine.
pub struct Providers {
    pub log: Box<dyn LogProvider>,
}

/// A logging provider provides the means to log messages to some
/// destination based on the context in which the engine is running.
///
/// Logging levels are provided by [`LogLevel`]. These levels will map
/// to the underlying provider with varying degrees of success.
pub trait LogProvider: Send + Sync {
    /// Log a message at the specified level.
    fn log(&self, level: LogLevel, msg: &str);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Note,
    Warn,
    Error,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let level_s = match self {
            Self::Note => "[NOTE]",
            Self::Warn => "[WARN]",
            Self::Error => "[ERROR]",
        };
        write!(f, "{level_s}")
    }
}

#[derive(Clone, Copy)]
pub struct PrintlnLog;

impl LogProvider for PrintlnLog {
    fn log(&self, level: LogLevel, msg: &str) {
        println!("{level} {msg}");
    }
}

/// Keeps every message so a test can assert on what was logged.
#[derive(Default)]
pub struct CaptureLog {
    msgs: KMutex<Vec<(LogLevel, String)>>,
}

impl CaptureLog {
    pub fn take(&self) -> Vec<(LogLevel, String)> {
        core::mem::take(&mut *self.msgs.lock())
    }
}

impl LogProvider for alloc::sync::Arc<CaptureLog> {
    fn log(&self, level: LogLevel, msg: &str) {
        self.msgs.lock().push((level, msg.into()));
    }
}
