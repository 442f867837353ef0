// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Scenarios: named, ordered sequences of steps run against a server.

pub mod builtin;
pub mod expect;
pub mod runner;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::rpc::Response;
use crate::rpc::types::ServerInfo;

pub use builtin::{BuiltinOptions, suite};
pub use expect::Expectation;
pub use runner::{RunOptions, Session, run};

/// Per-step deadline when none is given.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for search-like tool calls.
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Validation predicate over a response. `Err` carries the diagnostic.
pub type Check = Box<dyn Fn(&Response) -> Result<(), String> + Send + Sync>;

/// Builds a step's params from what earlier steps learned.
pub type ParamsFn = Box<dyn Fn(&ScenarioContext) -> Result<Option<Value>, String> + Send + Sync>;

/// What earlier steps in the session produced.
#[derive(Debug, Default, Clone)]
pub struct ScenarioContext {
    results: HashMap<String, Value>,
    server: Option<ServerInfo>,
    tools: Option<Vec<String>>,
}

impl ScenarioContext {
    /// Result of the last passing step called `step`.
    #[must_use]
    pub fn result(&self, step: &str) -> Option<&Value> {
        self.results.get(step)
    }

    /// Server identification from the handshake, if it succeeded.
    #[must_use]
    pub const fn server(&self) -> Option<&ServerInfo> {
        self.server.as_ref()
    }

    /// Stores a passing step's result.
    pub fn record(&mut self, step: &str, result: Value) {
        self.results.insert(step.to_string(), result);
    }

    /// Stores the negotiated server identification.
    pub fn identify(&mut self, server: ServerInfo) {
        self.server = Some(server);
    }

    /// Tool names from the most recent successful `tools/list`.
    #[must_use]
    pub fn tools(&self) -> Option<&[String]> {
        self.tools.as_deref()
    }

    /// Stores the tools the server advertised.
    pub fn discover(&mut self, tools: Vec<String>) {
        self.tools = Some(tools);
    }
}

/// Whether a step waits for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Registered with the correlator and awaited.
    Request,
    /// Written and forgotten.
    Notification,
}

/// One request/response interaction.
pub struct Step {
    /// Name shown in the report and used as the context key.
    pub name: String,
    /// JSON-RPC method.
    pub method: String,
    /// Params builder.
    pub params: ParamsFn,
    /// Request or notification.
    pub kind: StepKind,
    /// Deadline for the response.
    pub timeout: Duration,
    /// Tries before giving up on a timeout. Only the handshake uses more than one.
    pub attempts: u32,
    /// Validation predicate.
    pub check: Check,
}

impl Step {
    /// A request step with no params that passes on any result.
    pub fn request(name: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: method.into(),
            params: Box::new(|_| Ok(None)),
            kind: StepKind::Request,
            timeout: DEFAULT_TIMEOUT,
            attempts: 1,
            check: Box::new(expect::has_result),
        }
    }

    /// A notification step.
    pub fn notification(name: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            kind: StepKind::Notification,
            ..Self::request(name, method)
        }
    }

    /// Sends these params verbatim.
    #[must_use]
    pub fn params(mut self, params: Value) -> Self {
        self.params = Box::new(move |_| Ok(Some(params.clone())));
        self
    }

    /// Builds params from the context when the step runs.
    #[must_use]
    pub fn params_with<F>(mut self, build: F) -> Self
    where
        F: Fn(&ScenarioContext) -> Result<Option<Value>, String> + Send + Sync + 'static,
    {
        self.params = Box::new(build);
        self
    }

    /// Overrides the deadline.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Retries on timeout, up to `attempts` tries in total.
    #[must_use]
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Replaces the validation predicate.
    #[must_use]
    pub fn check<F>(mut self, check: F) -> Self
    where
        F: Fn(&Response) -> Result<(), String> + Send + Sync + 'static,
    {
        self.check = Box::new(check);
        self
    }

    /// Replaces the validation predicate with a compiled one.
    #[must_use]
    pub fn expect(mut self, check: Check) -> Self {
        self.check = check;
        self
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("kind", &self.kind)
            .field("timeout", &self.timeout)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// A named, ordered sequence of steps.
#[derive(Debug)]
pub struct Scenario {
    /// Name shown in the report.
    pub name: String,
    /// Steps, run in order.
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Creates a scenario.
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }
}
