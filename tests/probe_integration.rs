// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end tests: the mcprobe binary driving the mockmcp server.
//!
//! Each test runs mcprobe as a child process against mockmcp configured
//! with a fault, then checks the exit status and the JSON report.

use anyhow::{Context, Result};
use serde_json::Value;
use std::process::{Command, Output};
use std::time::{Duration, Instant};

fn mock() -> &'static str {
    env!("CARGO_BIN_EXE_mockmcp")
}

/// Runs mcprobe with `args` in isolation from the user's config.
fn probe(args: &[&str]) -> Result<Output> {
    let home = tempfile::tempdir()?;
    Command::new(env!("CARGO_BIN_EXE_mcprobe"))
        .args(args)
        .env("XDG_CONFIG_HOME", home.path())
        .env_remove("RUST_LOG")
        .output()
        .context("Failed to run mcprobe")
}

/// Runs mcprobe against mockmcp with `mock_flags` and returns the JSON report.
fn probe_mock(probe_flags: &[&str], mock_flags: &[&str]) -> Result<(Output, Value)> {
    let dir = tempfile::tempdir()?;
    let report_path = dir.path().join("report.json");
    let report_arg = report_path.to_str().context("Non-UTF-8 temp path")?;

    let mut args = vec!["--nocolor", "--json", report_arg];
    args.extend_from_slice(probe_flags);
    args.push(mock());
    args.push("--");
    args.extend_from_slice(mock_flags);

    let output = probe(&args)?;
    let report = std::fs::read_to_string(&report_path).with_context(|| {
        format!(
            "No report written. stderr:\n{}",
            String::from_utf8_lossy(&output.stderr)
        )
    })?;
    Ok((output, serde_json::from_str(&report)?))
}

fn step<'a>(report: &'a Value, name: &str) -> Option<&'a Value> {
    report["results"]
        .as_array()?
        .iter()
        .find(|r| r["step"] == name)
}

fn failed_steps(report: &Value) -> Vec<String> {
    report["results"]
        .as_array()
        .map(|results| {
            results
                .iter()
                .filter(|r| r["passed"] == false)
                .filter_map(|r| r["step"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn test_builtin_suite_passes() -> Result<()> {
    let (output, report) = probe_mock(&[], &[])?;
    assert!(output.status.success(), "{report:#}");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("=== Results ==="));
    assert!(stdout.contains("Passed: 5"));
    assert!(stdout.contains("Failed: 0"));
    assert!(stdout.contains("Success Rate: 100.0%"));
    assert!(stdout.contains("Tools: 3 (get_status, search_code, context_window)"));

    assert_eq!(report["passed"], 5);
    assert_eq!(report["server_info"]["name"], "mockmcp");
    assert_eq!(report["tools"].as_array().map(Vec::len), Some(3));
    let order: Vec<&str> = report["results"]
        .as_array()
        .context("results missing")?
        .iter()
        .filter_map(|r| r["step"].as_str())
        .collect();
    assert_eq!(
        order,
        vec!["initialize", "initialized", "list_tools", "get_status", "search_code"]
    );
    Ok(())
}

#[test]
fn test_extended_suite_passes() -> Result<()> {
    let (output, report) = probe_mock(&["--extended"], &[])?;
    assert!(output.status.success(), "{report:#}");
    assert_eq!(report["passed"], 9);
    assert!(step(&report, "context_window").is_some());
    assert!(step(&report, "unknown_method").is_some());
    assert_eq!(
        step(&report, "call_first_tool").map(|r| r["passed"].clone()),
        Some(Value::Bool(true))
    );
    Ok(())
}

#[test]
fn test_error_response_isolated_to_its_step() -> Result<()> {
    let (output, report) = probe_mock(&[], &["--fail-on", "tools/list"])?;
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(failed_steps(&report), vec!["list_tools"]);

    let diagnostic = step(&report, "list_tools")
        .and_then(|r| r["diagnostic"].as_str())
        .unwrap_or_default();
    assert!(diagnostic.contains("-32603"), "{diagnostic}");
    assert_eq!(report["passed"], 4);
    assert_eq!(report["success_rate"], 80.0);
    Ok(())
}

#[test]
fn test_hung_step_times_out_and_run_continues() -> Result<()> {
    let (output, report) = probe_mock(&["--timeout", "1"], &["--hang-on", "get_status"])?;
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(failed_steps(&report), vec!["get_status"]);

    let diagnostic = step(&report, "get_status")
        .and_then(|r| r["diagnostic"].as_str())
        .unwrap_or_default();
    assert_eq!(diagnostic, "no response within deadline (1000ms)");

    let elapsed = step(&report, "get_status")
        .and_then(|r| r["elapsed_ms"].as_u64())
        .unwrap_or_default();
    assert!((1000..3000).contains(&elapsed), "{elapsed}");
    Ok(())
}

#[test]
fn test_noise_and_duplicates_tolerated() -> Result<()> {
    let (output, report) = probe_mock(&[], &["--noise", "--duplicate"])?;
    assert!(output.status.success(), "{report:#}");
    assert_eq!(report["failed"], 0);
    Ok(())
}

#[test]
fn test_server_requests_answered() -> Result<()> {
    let (output, report) = probe_mock(&[], &["--ask-roots"])?;
    assert!(output.status.success(), "{report:#}");
    Ok(())
}

#[test]
fn test_empty_index_is_valid() -> Result<()> {
    let (output, report) = probe_mock(&[], &["--empty-search", "--no-tools"])?;
    assert!(output.status.success(), "{report:#}");
    assert!(String::from_utf8_lossy(&output.stdout).contains("Tools: 0\n"));
    Ok(())
}

#[test]
fn test_slow_startup_still_ready() -> Result<()> {
    let (output, report) = probe_mock(&[], &["--startup-delay", "500"])?;
    assert!(output.status.success(), "{report:#}");
    Ok(())
}

#[test]
fn test_crashed_server_fails_remaining_steps_fast() -> Result<()> {
    let start = Instant::now();
    let (output, report) = probe_mock(&[], &["--drop-after", "2"])?;
    assert_eq!(output.status.code(), Some(1));
    assert!(start.elapsed() < Duration::from_secs(8), "{:?}", start.elapsed());

    assert_eq!(report["results"].as_array().map(Vec::len), Some(5));
    assert_eq!(failed_steps(&report), vec!["get_status", "search_code"]);
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_server_ignoring_eof_is_stopped() -> Result<()> {
    let start = Instant::now();
    let (output, report) = probe_mock(&["--grace", "1"], &["--ignore-eof"])?;
    assert!(output.status.success(), "{report:#}");
    assert!(start.elapsed() < Duration::from_secs(8), "{:?}", start.elapsed());
    Ok(())
}

#[test]
fn test_missing_server_exits_nonzero() -> Result<()> {
    let output = probe(&["/nonexistent/mcprobe-no-such-server"])?;
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to spawn"), "{stderr}");
    assert!(output.stdout.is_empty());
    Ok(())
}

#[test]
fn test_no_server_given() -> Result<()> {
    let output = probe(&["run"])?;
    assert_eq!(output.status.code(), Some(1));
    Ok(())
}

#[test]
fn test_list_does_not_spawn() -> Result<()> {
    let output = probe(&["list", "--nocolor", "--extended"])?;
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in ["handshake", "initialize", "search_code", "context_window", "unknown_method"] {
        assert!(stdout.contains(name), "{name} missing from:\n{stdout}");
    }
    assert!(stdout.contains("notification"));
    Ok(())
}
