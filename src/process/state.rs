/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Lifecycle state of the server under test.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, warn};

/// Where the server process is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    /// Nothing spawned yet.
    NotStarted,
    /// Spawned, handshake not yet answered.
    Starting,
    /// Handshake answered; idle between steps.
    Ready,
    /// A step is in flight.
    Running,
    /// Shutdown requested.
    Terminating,
    /// Process has exited.
    Stopped,
}

impl ProcessState {
    /// Create from atomic u8 value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::NotStarted,
            1 => Self::Starting,
            2 => Self::Ready,
            3 => Self::Running,
            4 => Self::Terminating,
            _ => Self::Stopped,
        }
    }

    /// Convert to atomic u8 value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::NotStarted => 0,
            Self::Starting => 1,
            Self::Ready => 2,
            Self::Running => 3,
            Self::Terminating => 4,
            Self::Stopped => 5,
        }
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Starting)
                // Handshake answered, or gave up waiting for it
                | (Self::Starting, Self::Ready | Self::Running)
                | (Self::Ready, Self::Running)
                | (Self::Running, Self::Ready)
                | (
                    Self::Starting | Self::Ready | Self::Running,
                    Self::Terminating
                )
                // Spawn failure skips straight to stopped
                | (Self::Starting | Self::Terminating, Self::Stopped)
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not-started",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Terminating => "terminating",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Atomically tracked lifecycle state.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Starts in [`ProcessState::NotStarted`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(ProcessState::NotStarted.as_u8()),
        }
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> ProcessState {
        ProcessState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Moves to `next` if the transition is legal; returns whether it moved.
    pub fn advance(&self, next: ProcessState) -> bool {
        let current = self.get();
        if current == next {
            return true;
        }
        if !current.can_become(next) {
            warn!("Ignoring illegal state transition {} -> {}", current, next);
            return false;
        }
        let moved = self
            .state
            .compare_exchange(
                current.as_u8(),
                next.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if moved {
            debug!("Server state: {} -> {}", current, next);
        }
        moved
    }
}
