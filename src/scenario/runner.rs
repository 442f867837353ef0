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

//! Drives scenarios against a live server.
//!
//! Steps run strictly one at a time: a request is written, then awaited
//! (or timed out) before the next one is built. A background reader task
//! drains the server's stdout into the correlator the whole time.

use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Scenario, ScenarioContext, Step, StepKind, expect};
use crate::error::ProbeError;
use crate::process::{KILL_OVERHEAD, Lifecycle, ProcessState, ServerCommand, ServerProcess};
use crate::report::{Report, TestResult};
use crate::rpc::{
    Correlator, LineWriter, Notification, ReaderStats, Request, RequestId, Response, spawn_reader,
};

/// Run-wide settings that are not part of any step.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Time the server gets to exit after stdin closes and SIGTERM.
    pub grace: Duration,
    /// Delay before the first handshake retry; doubles on each further retry.
    pub readiness_backoff: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(5),
            readiness_backoff: Duration::from_millis(250),
        }
    }
}

/// One conversation with one server process.
pub struct Session {
    process: ServerProcess,
    writer: LineWriter,
    correlator: Correlator,
    reader: Option<JoinHandle<ReaderStats>>,
    lifecycle: Lifecycle,
    next_id: i64,
    context: ScenarioContext,
    backoff: Duration,
}

impl Session {
    /// Spawns the server and starts draining its output.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Spawn`] if the server cannot be launched.
    pub fn start(command: &ServerCommand, options: &RunOptions) -> Result<Self, ProbeError> {
        let lifecycle = Lifecycle::new();
        lifecycle.advance(ProcessState::Starting);

        let spawned = ServerProcess::start(command).and_then(|mut process| {
            let pipes = process.take_stdin().zip(process.take_stdout());
            pipes.map(|pipes| (process, pipes)).ok_or_else(|| ProbeError::Spawn {
                command: command.program.clone(),
                source: std::io::Error::other("server pipes unavailable"),
            })
        });
        let (process, (stdin, stdout)) = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                lifecycle.advance(ProcessState::Stopped);
                return Err(e);
            }
        };

        let writer = LineWriter::new(stdin);
        let correlator = Correlator::new();
        let reader = spawn_reader(stdout, correlator.clone(), writer.clone());

        Ok(Self {
            process,
            writer,
            correlator,
            reader: Some(reader),
            lifecycle,
            next_id: 1,
            context: ScenarioContext::default(),
            backoff: options.readiness_backoff,
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.lifecycle.get()
    }

    /// What the session has learned so far.
    #[must_use]
    pub const fn context(&self) -> &ScenarioContext {
        &self.context
    }

    fn allocate_id(&mut self) -> RequestId {
        let id = RequestId::Number(self.next_id);
        self.next_id += 1;
        id
    }

    /// Sends a request and waits up to `timeout` for its response.
    ///
    /// # Errors
    ///
    /// [`ProbeError::Timeout`] if nothing arrives in time,
    /// [`ProbeError::Closed`] if the server's output ended, or an I/O error
    /// if the request could not be written.
    pub async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Response, ProbeError> {
        let id = self.allocate_id();
        let request = Request::new(id.clone(), method, params);
        debug!("Request {} (id: {})", method, id);

        let writer = &self.writer;
        self.correlator
            .exchange(id, timeout, || writer.send(&request))
            .await
    }

    /// Sends a notification. Only the write is awaited, for up to `timeout`.
    ///
    /// # Errors
    ///
    /// [`ProbeError::Timeout`] if the server did not take the line in time,
    /// or an error if the notification could not be written.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<(), ProbeError> {
        debug!("Notification {}", method);
        let notification = Notification::new(method, params);
        tokio::time::timeout(timeout, self.writer.send(&notification))
            .await
            .unwrap_or(Err(ProbeError::Timeout(timeout)))
    }

    /// Runs one step and records exactly one result for it.
    pub async fn run_step(&mut self, scenario: &str, step: &Step) -> TestResult {
        let started = Instant::now();
        let outcome = self.execute(step).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(()) => {
                info!("PASS {}/{} ({}ms)", scenario, step.name, elapsed_ms);
                TestResult::pass(scenario, &step.name, elapsed_ms)
            }
            Err(diagnostic) => {
                warn!("FAIL {}/{}: {}", scenario, step.name, diagnostic);
                TestResult::fail(scenario, &step.name, diagnostic, elapsed_ms)
            }
        }
    }

    async fn execute(&mut self, step: &Step) -> Result<(), String> {
        let params = (step.params)(&self.context)
            .map_err(|e| format!("could not build request: {e}"))?;

        if step.kind == StepKind::Notification {
            return self
                .notify(&step.method, params, step.timeout)
                .await
                .map_err(|e| e.to_string());
        }

        // The first initialize exchange is the readiness signal
        let handshake =
            self.lifecycle.get() == ProcessState::Starting && step.method == "initialize";
        if !handshake {
            self.lifecycle.advance(ProcessState::Running);
        }

        let outcome = self.exchange_with_retry(step, params).await;

        let verdict = outcome.map_err(|e| e.to_string()).and_then(|response| {
            (step.check)(&response)
                .map_err(|d| ProbeError::UnexpectedShape(d).to_string())
                .map(|()| response)
        });

        match &verdict {
            Ok(response) => {
                if let Some(result) = &response.result {
                    self.context.record(&step.name, result.clone());
                }
                if step.method == "initialize"
                    && let Ok(init) = expect::parse_initialize(response)
                {
                    info!(
                        "Server identified as {} {}",
                        init.server_info.name,
                        init.server_info.version.as_deref().unwrap_or("")
                    );
                    self.context.identify(init.server_info);
                }
                if step.method == "tools/list"
                    && let Ok(listing) = expect::parse_tools(response)
                {
                    info!("Server lists {} tools", listing.tools.len());
                    self.context
                        .discover(listing.tools.into_iter().map(|tool| tool.name).collect());
                }
                self.lifecycle.advance(ProcessState::Ready);
            }
            Err(_) if handshake => warn!("Server did not complete the handshake"),
            Err(_) => {
                self.lifecycle.advance(ProcessState::Ready);
            }
        }

        verdict.map(|_| ())
    }

    async fn exchange_with_retry(
        &mut self,
        step: &Step,
        params: Option<Value>,
    ) -> Result<Response, ProbeError> {
        let mut attempt = 1;
        loop {
            match self.request(&step.method, params.clone(), step.timeout).await {
                Err(ProbeError::Timeout(_)) if attempt < step.attempts => {
                    let delay = self.backoff.saturating_mul(1 << (attempt - 1).min(16));
                    warn!(
                        "{} attempt {}/{} timed out, retrying in {:?}",
                        step.method, attempt, step.attempts, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }

    /// Runs every step of a scenario in order. A failing step does not stop
    /// the ones after it.
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> Vec<TestResult> {
        info!("Scenario: {}", scenario.name);
        let mut results = Vec::with_capacity(scenario.steps.len());
        for step in &scenario.steps {
            results.push(self.run_step(&scenario.name, step).await);
        }
        results
    }

    /// Closes the server's stdin, terminates it, and joins the reader.
    ///
    /// Returns within `grace` plus twice [`KILL_OVERHEAD`]: one for the
    /// forced kill, one for joining the reader. Returns the reader's
    /// counters, if it finished in time.
    pub async fn shutdown(mut self, grace: Duration) -> (ScenarioContext, Option<ReaderStats>) {
        self.lifecycle.advance(ProcessState::Terminating);
        self.writer.close().await;

        match self.process.terminate(grace).await {
            Ok(status) => debug!("Server exit status: {}", status),
            Err(e) => warn!("{}", e),
        }
        self.lifecycle.advance(ProcessState::Stopped);

        let stats = match self.reader.take() {
            Some(mut reader) => match tokio::time::timeout(KILL_OVERHEAD, &mut reader).await {
                Ok(Ok(stats)) => Some(stats),
                Ok(Err(e)) => {
                    warn!("Reader task failed: {}", e);
                    None
                }
                Err(_) => {
                    warn!("Reader task did not finish, aborting it");
                    reader.abort();
                    None
                }
            },
            None => None,
        };
        if let Some(stats) = &stats {
            debug!(
                "Read {} lines: {} delivered, {} skipped, {} discarded, {} from server",
                stats.lines, stats.delivered, stats.skipped, stats.discarded, stats.server_messages
            );
        }

        (self.context, stats)
    }
}

/// Spawns the server, runs every scenario against it, and tears it down.
///
/// # Errors
///
/// Only [`ProbeError::Spawn`] is returned; every other failure becomes a
/// failed [`TestResult`] in the report.
pub async fn run(
    command: &ServerCommand,
    scenarios: &[Scenario],
    options: &RunOptions,
) -> Result<Report, ProbeError> {
    let started_at = Utc::now();
    let mut session = Session::start(command, options)?;

    let mut results = Vec::new();
    for scenario in scenarios {
        results.extend(session.run_scenario(scenario).await);
    }

    let (context, _) = session.shutdown(options.grace).await;
    let report = Report::new(
        command.display(),
        context.server().cloned(),
        started_at,
        Utc::now(),
        results,
    );
    Ok(match context.tools() {
        Some(tools) => report.with_tools(tools.to_vec()),
        None => report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;

    fn options() -> RunOptions {
        RunOptions {
            grace: Duration::from_secs(2),
            readiness_backoff: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_is_returned() {
        let command = ServerCommand::new("/nonexistent/mcprobe-no-such-server");
        let scenarios = vec![Scenario::new("s", vec![Step::request("ping", "ping")])];
        let outcome = run(&command, &scenarios, &options()).await;
        assert!(matches!(outcome, Err(ProbeError::Spawn { .. })));
    }

    // Reads everything and never answers
    fn silent() -> ServerCommand {
        ServerCommand::new("sh").args(["-c", "cat > /dev/null"])
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_every_step_recorded_against_silent_server() -> Result<()> {
        let scenarios = vec![
            Scenario::new(
                "one",
                vec![
                    Step::request("first", "ping").timeout(Duration::from_millis(100)),
                    Step::notification("note", "notifications/initialized"),
                ],
            ),
            Scenario::new(
                "two",
                vec![Step::request("second", "ping").timeout(Duration::from_millis(100))],
            ),
        ];
        let report = run(&silent(), &scenarios, &options()).await?;

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(
            report.results[0].diagnostic.as_deref(),
            Some("no response within deadline (100ms)")
        );
        assert!(report.results[1].passed);
        assert_eq!(report.results[2].scenario, "two");
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_closed_stream_fails_fast() -> Result<()> {
        // Exits immediately, closing stdout
        let scenarios = vec![Scenario::new(
            "closed",
            vec![
                Step::request("a", "ping").timeout(Duration::from_secs(30)),
                Step::request("b", "ping").timeout(Duration::from_secs(30)),
            ],
        )];
        let started = Instant::now();
        let report = run(&ServerCommand::new("true"), &scenarios, &options()).await?;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(report.results.len(), 2);
        assert!(report.results.iter().all(|r| !r.passed));
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_params_failure_sends_nothing() -> Result<()> {
        let mut session = Session::start(&silent(), &options())?;
        let step = Step::request("call", "tools/call")
            .params_with(|_| Err("nothing to call".to_string()));

        let result = session.run_step("s", &step).await;
        assert!(!result.passed);
        assert_eq!(
            result.diagnostic.as_deref(),
            Some("could not build request: nothing to call")
        );
        assert_eq!(session.next_id, 1);

        let (_, stats) = session.shutdown(Duration::from_secs(2)).await;
        assert_eq!(stats.map(|s| s.lines), Some(0));
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_server_not_reading_stdin_times_out() -> Result<()> {
        // Alive, but never reads: a large request fills the pipe
        let stuck = ServerCommand::new("sh").args(["-c", "exec sleep 30"]);
        let mut session = Session::start(&stuck, &options())?;

        let query = "x".repeat(1 << 20);
        let scenario = Scenario::new(
            "stuck",
            vec![
                Step::request("big", "tools/call")
                    .params(json!({"name": "search_code", "arguments": {"query": query}}))
                    .timeout(Duration::from_millis(200)),
                Step::notification("note", "notifications/initialized")
                    .timeout(Duration::from_millis(200)),
                Step::request("after", "ping").timeout(Duration::from_millis(200)),
            ],
        );

        let started = Instant::now();
        let results = session.run_scenario(&scenario).await;
        assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| !r.passed));
        assert_eq!(
            results[0].diagnostic.as_deref(),
            Some("no response within deadline (200ms)")
        );

        let started = Instant::now();
        session.shutdown(Duration::from_secs(1)).await;
        assert!(started.elapsed() < Duration::from_secs(1) + KILL_OVERHEAD + KILL_OVERHEAD);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_handshake_retries_with_fresh_ids() -> Result<()> {
        let mut session = Session::start(&silent(), &options())?;
        assert_eq!(session.state(), ProcessState::Starting);

        let step = Step::request("initialize", "initialize")
            .params(json!({}))
            .timeout(Duration::from_millis(50))
            .attempts(3);
        let result = session.run_step("handshake", &step).await;

        assert!(!result.passed);
        assert_eq!(session.next_id, 4);
        assert_eq!(session.state(), ProcessState::Starting);

        let (context, _) = session.shutdown(Duration::from_secs(2)).await;
        assert!(context.server().is_none());
        Ok(())
    }
}
