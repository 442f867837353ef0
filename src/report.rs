// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Aggregates step results into a summary and an exit status.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::{ColorConfig, truncate};
use crate::rpc::types::ServerInfo;

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    /// Scenario the step belongs to.
    pub scenario: String,
    /// Step name.
    pub step: String,
    /// Whether the step passed.
    pub passed: bool,
    /// Why it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    /// Wall-clock time spent on the step.
    pub elapsed_ms: u64,
}

impl TestResult {
    /// A passing result.
    pub fn pass(scenario: impl Into<String>, step: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            scenario: scenario.into(),
            step: step.into(),
            passed: true,
            diagnostic: None,
            elapsed_ms,
        }
    }

    /// A failing result with a diagnostic.
    pub fn fail(
        scenario: impl Into<String>,
        step: impl Into<String>,
        diagnostic: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            scenario: scenario.into(),
            step: step.into(),
            passed: false,
            diagnostic: Some(diagnostic.into()),
            elapsed_ms,
        }
    }
}

/// Pass/fail counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    /// Steps that passed.
    pub passed: usize,
    /// Steps that failed.
    pub failed: usize,
    /// `passed / (passed + failed) * 100`, or 0 with no results.
    pub success_rate: f64,
}

impl Summary {
    /// Counts `results`.
    #[must_use]
    pub fn of(results: &[TestResult]) -> Self {
        let passed = results.iter().filter(|r| r.passed).count();
        let failed = results.len() - passed;
        let success_rate = if results.is_empty() {
            0.0
        } else {
            #[allow(
                clippy::cast_precision_loss,
                reason = "Step counts are far below f64's exact integer range"
            )]
            let rate = passed as f64 / results.len() as f64 * 100.0;
            rate
        };
        Self {
            passed,
            failed,
            success_rate,
        }
    }

    /// `true` when nothing failed.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the server was torn down.
    pub finished_at: DateTime<Utc>,
    /// Command line of the server under test.
    pub server: String,
    /// Identification the server gave in its handshake.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    /// Tool names the server listed, if a `tools/list` step passed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
    /// Steps that passed.
    pub passed: usize,
    /// Steps that failed.
    pub failed: usize,
    /// Percentage of passing steps.
    pub success_rate: f64,
    /// One entry per executed step, in order.
    pub results: Vec<TestResult>,
}

impl Report {
    /// Builds a report, computing the summary once.
    #[must_use]
    pub fn new(
        server: String,
        server_info: Option<ServerInfo>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        results: Vec<TestResult>,
    ) -> Self {
        let summary = Summary::of(&results);
        Self {
            started_at,
            finished_at,
            server,
            server_info,
            tools: None,
            passed: summary.passed,
            failed: summary.failed,
            success_rate: summary.success_rate,
            results,
        }
    }

    /// Attaches the tools the server advertised.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// The summary counts.
    #[must_use]
    pub const fn summary(&self) -> Summary {
        Summary {
            passed: self.passed,
            failed: self.failed,
            success_rate: self.success_rate,
        }
    }

    /// `true` when every step passed.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.failed == 0
    }

    /// Human-readable report, one line per step and a summary block.
    #[must_use]
    pub fn render(&self, colors: &ColorConfig) -> String {
        let mut out = String::new();
        let mut scenario = "";

        for result in &self.results {
            if result.scenario != scenario {
                scenario = &result.scenario;
                let _ = writeln!(out, "{}", colors.cyan(&format!("[{scenario}]")));
            }
            let mark = if result.passed {
                colors.green("PASS")
            } else {
                colors.red("FAIL")
            };
            let _ = write!(
                out,
                "  {mark} {} {}",
                result.step,
                colors.dim(&format!("({}ms)", result.elapsed_ms))
            );
            if let Some(diagnostic) = &result.diagnostic {
                let _ = write!(out, ": {}", truncate(diagnostic, 200));
            }
            out.push('\n');
        }

        let _ = writeln!(out, "\n=== Results ===");
        if let Some(info) = &self.server_info {
            let _ = writeln!(
                out,
                "Server: {} {}",
                info.name,
                info.version.as_deref().unwrap_or("")
            );
        }
        if let Some(tools) = &self.tools {
            let _ = writeln!(out, "Tools: {}", tools_line(tools));
        }
        let _ = writeln!(out, "Passed: {}", colors.green(&self.passed.to_string()));
        let failed = self.failed.to_string();
        let failed = if self.failed == 0 {
            failed
        } else {
            colors.red(&failed)
        };
        let _ = writeln!(out, "Failed: {failed}");
        let _ = writeln!(out, "Success Rate: {:.1}%", self.success_rate);
        out
    }

    /// Writes the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))
    }
}

/// "N (a, b, c, ...)", naming at most the first few tools.
fn tools_line(tools: &[String]) -> String {
    const SHOWN: usize = 5;
    if tools.is_empty() {
        return "0".to_string();
    }
    let mut names = tools[..tools.len().min(SHOWN)].join(", ");
    if tools.len() > SHOWN {
        names.push_str(", ...");
    }
    format!("{} ({names})", tools.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results() -> Vec<TestResult> {
        vec![
            TestResult::pass("handshake", "initialize", 12),
            TestResult::pass("handshake", "initialized", 0),
            TestResult::pass("discovery", "list_tools", 3),
            TestResult::fail("search", "search_code", "no response within deadline (15000ms)", 15001),
        ]
    }

    fn report(results: Vec<TestResult>) -> Report {
        let now = Utc::now();
        Report::new("mockmcp --repo .".to_string(), None, now, now, results)
    }

    #[test]
    fn test_summary_counts() {
        let summary = Summary::of(&results());
        assert_eq!(summary.passed, 3);
        assert_eq!(summary.failed, 1);
        assert!((summary.success_rate - 75.0).abs() < f64::EPSILON);
        assert!(!summary.success());
    }

    #[test]
    fn test_empty_rate_is_zero() {
        let summary = Summary::of(&[]);
        assert_eq!(summary.passed, 0);
        assert_eq!(summary.failed, 0);
        assert!(summary.success_rate.abs() < f64::EPSILON);
        assert!(summary.success());
    }

    #[test]
    fn test_render_plain() {
        let text = report(results()).render(&ColorConfig::new(true));
        assert!(text.contains("[handshake]\n  PASS initialize (12ms)\n"));
        assert!(text.contains("FAIL search_code (15001ms): no response within deadline"));
        assert!(text.contains("=== Results ==="));
        assert!(text.contains("Passed: 3\n"));
        assert!(text.contains("Failed: 1\n"));
        assert!(text.contains("Success Rate: 75.0%"));
    }

    #[test]
    fn test_render_names_server() {
        let now = Utc::now();
        let report = Report::new(
            "mockmcp".to_string(),
            Some(ServerInfo {
                name: "mockmcp".to_string(),
                version: Some("0.1.0".to_string()),
            }),
            now,
            now,
            results(),
        );
        assert!(report.render(&ColorConfig::new(true)).contains("Server: mockmcp 0.1.0"));
    }

    #[test]
    fn test_render_lists_tools() {
        let names = |n: usize| (1..=n).map(|i| format!("tool{i}")).collect::<Vec<_>>();

        let text = report(results()).with_tools(names(2)).render(&ColorConfig::new(true));
        assert!(text.contains("Tools: 2 (tool1, tool2)\n"), "{text}");

        let text = report(results()).with_tools(names(7)).render(&ColorConfig::new(true));
        assert!(
            text.contains("Tools: 7 (tool1, tool2, tool3, tool4, tool5, ...)\n"),
            "{text}"
        );

        let text = report(results()).with_tools(Vec::new()).render(&ColorConfig::new(true));
        assert!(text.contains("Tools: 0\n"), "{text}");

        assert!(!report(results()).render(&ColorConfig::new(true)).contains("Tools:"));
    }

    #[test]
    fn test_json_report() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("report.json");
        report(results()).write_json(&path)?;

        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(json["passed"], 3);
        assert_eq!(json["failed"], 1);
        assert_eq!(json["success_rate"], 75.0);
        assert_eq!(json["results"][0]["scenario"], "handshake");
        assert!(json["results"][0].get("diagnostic").is_none());
        assert_eq!(json["results"][3]["elapsed_ms"], 15001);
        assert!(json["started_at"].is_string());
        Ok(())
    }
}
