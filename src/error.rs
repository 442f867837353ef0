// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Error taxonomy for a probe run.
//!
//! Only [`ProbeError::Spawn`] is fatal to a run. Everything else is caught at
//! step granularity and turned into a failed [`crate::report::TestResult`].

use std::time::Duration;

use crate::rpc::RequestId;

/// Errors produced while driving a server under test.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The server binary is missing or cannot be executed.
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        /// The program that was launched.
        command: String,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A line from the server could not be decoded as a JSON-RPC message.
    #[error("malformed line: {0}")]
    Parse(String),

    /// No response arrived before the step's deadline.
    #[error("no response within deadline ({}ms)", .0.as_millis())]
    Timeout(Duration),

    /// The server closed its output stream before responding.
    #[error("server closed its output stream")]
    Closed,

    /// A well-formed response is missing something the step expected.
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),

    /// A wait was requested for an id that was never registered.
    #[error("no pending request with id {0}")]
    UnknownId(RequestId),

    /// The request could not be serialized.
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    /// Reading from or writing to the server failed.
    #[error("i/o error talking to server: {0}")]
    Io(#[from] std::io::Error),

    /// The server did not exit within its grace period.
    #[error("server did not exit within {}ms, killed", .0.as_millis())]
    Termination(Duration),
}

impl ProbeError {
    /// Returns `true` if this error must abort the whole run.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Spawn { .. })
    }
}
