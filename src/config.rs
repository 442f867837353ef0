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

//! Layered configuration: defaults, user file, explicit file, environment.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::process::StderrMode;
use crate::scenario::expect::{self, Expectation};
use crate::scenario::runner::RunOptions;
use crate::scenario::{BuiltinOptions, Scenario, Step};

/// Probe settings after all layers are merged.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Deadline for ordinary requests in seconds (default: 10)
    pub request_timeout_secs: u64,

    /// Deadline for search-like tool calls in seconds (default: 15)
    pub search_timeout_secs: u64,

    /// Time the server gets to exit on its own in seconds (default: 5)
    pub grace_period_secs: u64,

    /// Handshake tries before the server is considered unresponsive (default: 3)
    pub readiness_attempts: u32,

    /// Delay before the first handshake retry in milliseconds (default: 250)
    pub readiness_backoff_ms: u64,

    /// Protocol version offered in `initialize`
    pub protocol_version: String,

    /// Run the built-in scenarios (default: true)
    pub builtin: bool,

    /// Where the server's stderr goes
    #[serde(default)]
    pub server_stderr: StderrMode,

    /// User-defined scenarios, run after the built-ins
    #[serde(default, rename = "scenario")]
    pub scenarios: Vec<ScenarioConfig>,
}

/// A scenario declared in a config file.
#[derive(Debug, Deserialize, Clone)]
pub struct ScenarioConfig {
    /// Scenario name
    pub name: String,

    /// Steps, in order
    #[serde(default, rename = "step")]
    pub steps: Vec<StepConfig>,
}

/// A step declared in a config file.
#[derive(Debug, Deserialize, Clone)]
pub struct StepConfig {
    /// Step name
    pub name: String,

    /// JSON-RPC method
    pub method: String,

    /// Params as a TOML table
    #[serde(default)]
    pub params: Option<Value>,

    /// Params as a JSON string, for keys the TOML table cannot keep verbatim
    #[serde(default)]
    pub params_json: Option<String>,

    /// Deadline override in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Send as a notification and expect nothing back
    #[serde(default)]
    pub notification: bool,

    /// Checks applied to the response; empty means "has a result"
    #[serde(default)]
    pub expect: Vec<Expectation>,
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be parsed or a value has the wrong type.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Start with defaults
        builder = builder
            .set_default("request_timeout_secs", 10)?
            .set_default("search_timeout_secs", 15)?
            .set_default("grace_period_secs", 5)?
            .set_default("readiness_attempts", 3)?
            .set_default("readiness_backoff_ms", 250)?
            .set_default("protocol_version", "2024-11-05")?
            .set_default("builtin", true)?;

        // 2. Load from user config directory (~/.config/mcprobe/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("mcprobe").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 3. Load from explicit file if provided
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 4. Load from environment variables (MCPROBE_GRACE_PERIOD_SECS, etc.)
        builder = builder.add_source(config::Environment::with_prefix("MCPROBE"));

        let config = builder
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Options for the built-in scenarios.
    #[must_use]
    pub fn builtin_options(&self) -> BuiltinOptions {
        BuiltinOptions {
            protocol_version: self.protocol_version.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            search_timeout: Duration::from_secs(self.search_timeout_secs),
            readiness_attempts: self.readiness_attempts,
        }
    }

    /// Options for the run as a whole.
    #[must_use]
    pub const fn run_options(&self) -> RunOptions {
        RunOptions {
            grace: Duration::from_secs(self.grace_period_secs),
            readiness_backoff: Duration::from_millis(self.readiness_backoff_ms),
        }
    }

    /// Builds the user-defined scenarios.
    ///
    /// # Errors
    ///
    /// Returns an error naming the step if its params JSON or a regex is invalid.
    pub fn user_scenarios(&self) -> Result<Vec<Scenario>> {
        let default_timeout = Duration::from_secs(self.request_timeout_secs);
        self.scenarios
            .iter()
            .map(|scenario| {
                let steps = scenario
                    .steps
                    .iter()
                    .map(|step| {
                        step.build(default_timeout)
                            .with_context(|| format!("In step {}/{}", scenario.name, step.name))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Scenario::new(scenario.name.clone(), steps))
            })
            .collect()
    }
}

impl StepConfig {
    fn build(&self, default_timeout: Duration) -> Result<Step> {
        let params = match (&self.params, &self.params_json) {
            (Some(_), Some(_)) => return Err(anyhow!("set either params or params_json, not both")),
            (Some(params), None) => Some(params.clone()),
            (None, Some(json)) => {
                Some(serde_json::from_str(json).context("params_json is not valid JSON")?)
            }
            (None, None) => None,
        };

        let step = if self.notification {
            Step::notification(&self.name, &self.method)
        } else {
            let check = expect::compile(&self.expect).context("Invalid expectation")?;
            Step::request(&self.name, &self.method).expect(check)
        };
        let step = match params {
            Some(params) => step.params(params),
            None => step,
        };

        Ok(step.timeout(self.timeout_secs.map_or(default_timeout, Duration::from_secs)))
    }
}
