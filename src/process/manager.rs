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

//! Spawning and tearing down the server under test.

use serde::Deserialize;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::error::ProbeError;

/// Upper bound on how long a forced kill may take to be reaped.
pub const KILL_OVERHEAD: Duration = Duration::from_secs(2);

/// Where the server's stderr goes. It is never read as protocol output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StderrMode {
    /// Discard it.
    #[default]
    Null,
    /// Pass it through to the probe's own stderr.
    Inherit,
}

impl From<StderrMode> for Stdio {
    fn from(mode: StderrMode) -> Self {
        match mode {
            StderrMode::Null => Self::null(),
            StderrMode::Inherit => Self::inherit(),
        }
    }
}

/// How to launch the server under test.
#[derive(Debug, Clone)]
pub struct ServerCommand {
    /// The program to execute.
    pub program: String,
    /// Arguments, including any `--repo <path>` pair.
    pub args: Vec<String>,
    /// Working directory, or inherit ours.
    pub cwd: Option<PathBuf>,
    /// Destination of the server's stderr.
    pub stderr: StderrMode,
}

impl ServerCommand {
    /// A command with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stderr: StderrMode::Null,
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Human-readable command line.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A running server process and its protocol pipes.
pub struct ServerProcess {
    child: Child,
    program: String,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
}

impl ServerProcess {
    /// Spawns the server with piped stdin/stdout.
    ///
    /// The child is killed if this handle is dropped without
    /// [`Self::terminate`] being called.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Spawn`] if the program is missing or not
    /// executable, or if its pipes could not be captured.
    pub fn start(command: &ServerCommand) -> Result<Self, ProbeError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(command.stderr)
            .kill_on_drop(true);
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }

        let spawn_error = |source| ProbeError::Spawn {
            command: command.program.clone(),
            source,
        };

        let mut child = cmd.spawn().map_err(spawn_error)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error(std::io::Error::other("stdout not captured")))?;

        info!(
            "Spawned server (pid {}): {}",
            child.id().unwrap_or_default(),
            command.display()
        );

        Ok(Self {
            child,
            program: command.program.clone(),
            stdin: Some(stdin),
            stdout: Some(stdout),
        })
    }

    /// Takes the writable end of the server's stdin. Yields it once.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Takes the readable end of the server's stdout. Yields it once.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// OS process id, while the process has not been reaped.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Returns `true` if the process has not exited yet.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Asks the server to exit, then kills it if it has not within `grace`.
    ///
    /// Cooperative shutdown closes stdin (if still held here) and, on Unix,
    /// sends `SIGTERM`; delivering the signal is charged to `grace`.
    /// Returns within `grace` plus [`KILL_OVERHEAD`].
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Termination`] if the server had to be killed,
    /// or [`ProbeError::Io`] if waiting on it failed.
    pub async fn terminate(&mut self, grace: Duration) -> Result<ExitStatus, ProbeError> {
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!("Server already exited: {}", status);
            return Ok(status);
        }

        let deadline = tokio::time::Instant::now() + grace;
        self.stdin.take();
        self.request_stop(deadline).await;

        match tokio::time::timeout_at(deadline, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!("Server exited: {}", status);
                Ok(status)
            }
            Ok(Err(e)) => Err(ProbeError::Io(e)),
            Err(_) => {
                warn!(
                    "Server {} did not exit within {:?}, killing",
                    self.program, grace
                );
                match tokio::time::timeout(KILL_OVERHEAD, self.child.kill()).await {
                    Ok(Err(e)) => warn!("Failed to kill server: {}", e),
                    Err(_) => warn!("Server not reaped within {:?} of kill", KILL_OVERHEAD),
                    Ok(Ok(())) => {}
                }
                Err(ProbeError::Termination(grace))
            }
        }
    }

    #[cfg(unix)]
    async fn request_stop(&self, deadline: tokio::time::Instant) {
        // unsafe is forbidden; shell out instead of libc::kill
        let Some(pid) = self.child.id() else { return };
        let mut kill = Command::new("kill");
        kill.args(["-TERM", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        match tokio::time::timeout_at(deadline, kill.status()).await {
            Ok(Ok(status)) if status.success() => debug!("Sent SIGTERM to {}", pid),
            Ok(Ok(status)) => debug!("kill -TERM {} exited with {}", pid, status),
            Ok(Err(e)) => debug!("Could not run kill: {}", e),
            Err(_) => debug!("kill -TERM {} timed out", pid),
        }
    }

    #[cfg(not(unix))]
    #[allow(
        clippy::unused_async,
        reason = "Signature matches the Unix variant; closing stdin is the only cooperative signal"
    )]
    async fn request_stop(&self, _deadline: tokio::time::Instant) {}
}
