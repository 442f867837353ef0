// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// Spawning and terminating the server under test.
pub mod manager;
/// Lifecycle state tracking.
pub mod state;

pub use manager::{KILL_OVERHEAD, ServerCommand, ServerProcess, StderrMode};
pub use state::{Lifecycle, ProcessState};
