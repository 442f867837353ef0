// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! The built-in conversation: handshake, discovery, and tool invocation.

use std::time::Duration;

use serde_json::{Value, json};

use super::expect;
use super::{DEFAULT_TIMEOUT, SEARCH_TIMEOUT, Scenario, Step};
use crate::rpc::types::{ClientCapabilities, ClientInfo, InitializeParams, METHOD_NOT_FOUND};

/// Step name of the tools/list step; later steps read its result.
pub const LIST_TOOLS_STEP: &str = "list_tools";

/// Knobs for the built-in scenarios.
#[derive(Debug, Clone)]
pub struct BuiltinOptions {
    /// Protocol version offered in `initialize`.
    pub protocol_version: String,
    /// Deadline for ordinary requests.
    pub request_timeout: Duration,
    /// Deadline for search-like tool calls.
    pub search_timeout: Duration,
    /// Tries for the readiness handshake.
    pub readiness_attempts: u32,
}

impl Default for BuiltinOptions {
    fn default() -> Self {
        Self {
            protocol_version: "2024-11-05".to_string(),
            request_timeout: DEFAULT_TIMEOUT,
            search_timeout: SEARCH_TIMEOUT,
            readiness_attempts: 3,
        }
    }
}

/// The built-in scenarios, plus the extended ones if asked.
#[must_use]
pub fn suite(options: &BuiltinOptions, extended: bool) -> Vec<Scenario> {
    let mut scenarios = vec![
        handshake(options),
        discovery(options),
        status(options),
        search(options),
    ];
    if extended {
        scenarios.push(context_window(options));
        scenarios.push(protocol(options));
        scenarios.push(first_tool(options));
    }
    scenarios
}

fn handshake(options: &BuiltinOptions) -> Scenario {
    let params = InitializeParams {
        protocol_version: options.protocol_version.clone(),
        capabilities: ClientCapabilities::default(),
        client_info: ClientInfo {
            name: "mcprobe".to_string(),
            version: env!("MCPROBE_VERSION").to_string(),
        },
    };
    let params = serde_json::to_value(params);

    Scenario::new(
        "handshake",
        vec![
            Step::request("initialize", "initialize")
                .params_with(move |_| {
                    params
                        .as_ref()
                        .map(|p| Some(p.clone()))
                        .map_err(ToString::to_string)
                })
                .timeout(options.request_timeout)
                .attempts(options.readiness_attempts)
                .check(expect::server_identified),
            Step::notification("initialized", "notifications/initialized"),
        ],
    )
}

fn discovery(options: &BuiltinOptions) -> Scenario {
    Scenario::new(
        "discovery",
        vec![
            Step::request(LIST_TOOLS_STEP, "tools/list")
                .params(json!({}))
                .timeout(options.request_timeout)
                .check(expect::tools_listed),
        ],
    )
}

fn status(options: &BuiltinOptions) -> Scenario {
    Scenario::new(
        "status",
        vec![
            Step::request("get_status", "tools/call")
                .params(json!({"name": "get_status", "arguments": {}}))
                .timeout(options.request_timeout)
                .check(expect::content_non_empty),
        ],
    )
}

fn search(options: &BuiltinOptions) -> Scenario {
    Scenario::new(
        "search",
        vec![
            Step::request("search_code", "tools/call")
                .params(json!({
                    "name": "search_code",
                    "arguments": {"query": "engine", "limit": 3}
                }))
                .timeout(options.search_timeout)
                .check(expect::content_present),
        ],
    )
}

fn context_window(options: &BuiltinOptions) -> Scenario {
    Scenario::new(
        "context",
        vec![
            Step::request("context_window", "tools/call")
                .params(json!({
                    "name": "context_window",
                    "arguments": {"query": "Engine struct", "limit": 5, "token_budget": 500}
                }))
                .timeout(options.search_timeout)
                .check(expect::content_non_empty),
        ],
    )
}

fn protocol(options: &BuiltinOptions) -> Scenario {
    Scenario::new(
        "protocol",
        vec![
            Step::request("ping", "ping").timeout(options.request_timeout),
            Step::request("unknown_method", "mcprobe/no-such-method")
                .timeout(options.request_timeout)
                .check(|response| match &response.error {
                    Some(error) if error.code == METHOD_NOT_FOUND => Ok(()),
                    Some(error) => Err(format!(
                        "expected error code {METHOD_NOT_FOUND}, got {}",
                        error.code
                    )),
                    None => Err("expected an error, got a result".to_string()),
                }),
        ],
    )
}

fn first_tool(options: &BuiltinOptions) -> Scenario {
    Scenario::new(
        "first_tool",
        vec![
            Step::request("call_first_tool", "tools/call")
                .params_with(|context| {
                    let name = context
                        .result(LIST_TOOLS_STEP)
                        .and_then(|result| result.pointer("/tools/0/name"))
                        .and_then(Value::as_str)
                        .ok_or_else(|| "no tool listed by an earlier step".to_string())?;
                    Ok(Some(json!({"name": name, "arguments": {}})))
                })
                .timeout(options.search_timeout)
                .check(expect::has_result),
        ],
    )
}
