// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! mcprobe drives an MCP server over stdio and checks that it holds up its
//! side of the conversation.
//!
//! It spawns the server, runs scripted scenarios (handshake, tool discovery,
//! tool calls) with per-step deadlines, records one result per step, and
//! tears the server down within a bounded grace period.

/// Terminal output helpers.
pub mod cli;
/// Layered configuration and user-defined scenarios.
pub mod config;
/// Error taxonomy.
pub mod error;
/// Server process management and lifecycle state.
pub mod process;
/// Result aggregation and rendering.
pub mod report;
/// JSON-RPC wire layer: messages, codec, correlation.
pub mod rpc;
/// Scenario model, built-in scenarios, and the runner.
pub mod scenario;

pub use error::ProbeError;
