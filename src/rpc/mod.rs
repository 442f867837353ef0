// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Newline-delimited encoding and decoding.
pub mod codec;
/// Request/response correlation.
pub mod correlator;
/// Writer and background reader over the server's stdio.
pub mod transport;
/// JSON-RPC and MCP message types.
pub mod types;

pub use codec::{Incoming, LineBuffer, decode, encode};
pub use correlator::{Correlator, Fulfillment};
pub use transport::{LineWriter, ReaderStats, spawn_reader};
pub use types::{Notification, Request, RequestId, Response, ResponseError};
