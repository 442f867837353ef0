// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Validation predicates applied to a step's response.
//!
//! A predicate returns `Err(diagnostic)` describing the mismatch. The
//! built-in scenarios use the typed checks at the top of this module;
//! user-defined steps use declarative [`Expectation`]s from the config file.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::Check;
use crate::rpc::Response;
use crate::rpc::types::{CallToolResult, InitializeResult, ListToolsResult};

/// The response's result, or a diagnostic if it carries an error instead.
///
/// # Errors
///
/// Returns a diagnostic if the response has an error object or no result.
pub fn result_of(response: &Response) -> Result<&Value, String> {
    if let Some(error) = &response.error {
        return Err(format!("server returned error: {error}"));
    }
    response
        .result
        .as_ref()
        .ok_or_else(|| "response has neither result nor error".to_string())
}

/// Passes if the response carries a result.
///
/// # Errors
///
/// See [`result_of`].
pub fn has_result(response: &Response) -> Result<(), String> {
    result_of(response).map(|_| ())
}

/// Passes if an initialize result identifies the server.
///
/// # Errors
///
/// Returns a diagnostic if `serverInfo.name` is missing or empty.
pub fn server_identified(response: &Response) -> Result<(), String> {
    let result = parse_initialize(response)?;
    if result.server_info.name.trim().is_empty() {
        return Err("serverInfo.name is empty".to_string());
    }
    Ok(())
}

/// Parses an initialize result.
///
/// # Errors
///
/// Returns a diagnostic if the result lacks `serverInfo`.
pub fn parse_initialize(response: &Response) -> Result<InitializeResult, String> {
    let result = result_of(response)?;
    serde_json::from_value(result.clone())
        .map_err(|e| format!("initialize result lacks server identification: {e}"))
}

/// Passes if a tools/list result has a tool sequence, possibly empty.
///
/// # Errors
///
/// Returns a diagnostic if `tools` is missing or a descriptor lacks a name.
pub fn tools_listed(response: &Response) -> Result<(), String> {
    parse_tools(response).map(|_| ())
}

/// Parses a tools/list result.
///
/// # Errors
///
/// Returns a diagnostic if the result is not a tool list.
pub fn parse_tools(response: &Response) -> Result<ListToolsResult, String> {
    let result = result_of(response)?;
    serde_json::from_value(result.clone()).map_err(|e| format!("result.tools malformed: {e}"))
}

/// Passes if a tools/call result has at least one content block.
///
/// # Errors
///
/// Returns a diagnostic if content is missing, empty, or flagged as an error.
pub fn content_non_empty(response: &Response) -> Result<(), String> {
    let result = parse_tool_result(response)?;
    if result.content.is_empty() {
        return Err("tool returned no content".to_string());
    }
    Ok(())
}

/// Passes if a tools/call result has a content sequence, possibly empty.
///
/// An empty sequence is how a server with an empty index answers a search.
///
/// # Errors
///
/// Returns a diagnostic if content is missing or flagged as an error.
pub fn content_present(response: &Response) -> Result<(), String> {
    parse_tool_result(response).map(|_| ())
}

fn parse_tool_result(response: &Response) -> Result<CallToolResult, String> {
    let result = result_of(response)?;
    let parsed: CallToolResult = serde_json::from_value(result.clone())
        .map_err(|e| format!("result.content malformed: {e}"))?;
    if parsed.is_error == Some(true) {
        return Err(format!("tool reported an error: {}", parsed.text()));
    }
    Ok(parsed)
}

/// A declarative check on a response, as written in a scenario file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expectation {
    /// A result object is present and no error.
    Result,
    /// An error object is present, optionally with this code.
    Error {
        /// Required error code.
        #[serde(default)]
        code: Option<i64>,
    },
    /// The JSON pointer resolves inside the result.
    Present {
        /// JSON pointer into the result, e.g. `/serverInfo/name`.
        pointer: String,
    },
    /// The pointer resolves to a non-empty array, object, or string.
    NonEmpty {
        /// JSON pointer into the result.
        pointer: String,
    },
    /// The pointer resolves to exactly `value`.
    Equals {
        /// JSON pointer into the result.
        pointer: String,
        /// Expected value.
        value: Value,
    },
    /// The pointer resolves to a string matching `pattern`.
    Matches {
        /// JSON pointer into the result.
        pointer: String,
        /// Regular expression.
        pattern: String,
    },
}

enum Compiled {
    Result,
    Error(Option<i64>),
    Present(String),
    NonEmpty(String),
    Equals(String, Value),
    Matches(String, Regex),
}

/// Compiles expectations into a single predicate. An empty list means
/// [`Expectation::Result`].
///
/// # Errors
///
/// Returns an error if a `matches` pattern is not a valid regex.
pub fn compile(expectations: &[Expectation]) -> Result<Check, regex::Error> {
    let mut compiled = expectations
        .iter()
        .map(|expectation| {
            Ok(match expectation {
                Expectation::Result => Compiled::Result,
                Expectation::Error { code } => Compiled::Error(*code),
                Expectation::Present { pointer } => Compiled::Present(pointer.clone()),
                Expectation::NonEmpty { pointer } => Compiled::NonEmpty(pointer.clone()),
                Expectation::Equals { pointer, value } => {
                    Compiled::Equals(pointer.clone(), value.clone())
                }
                Expectation::Matches { pointer, pattern } => {
                    Compiled::Matches(pointer.clone(), Regex::new(pattern)?)
                }
            })
        })
        .collect::<Result<Vec<_>, regex::Error>>()?;

    if compiled.is_empty() {
        compiled.push(Compiled::Result);
    }

    Ok(Box::new(move |response: &Response| {
        compiled.iter().try_for_each(|check| check.apply(response))
    }))
}

impl Compiled {
    fn apply(&self, response: &Response) -> Result<(), String> {
        match self {
            Self::Result => has_result(response),
            Self::Error(code) => {
                let error = response
                    .error
                    .as_ref()
                    .ok_or_else(|| "expected an error, got a result".to_string())?;
                match code {
                    Some(code) if *code != error.code => Err(format!(
                        "expected error code {code}, got {}",
                        error.code
                    )),
                    _ => Ok(()),
                }
            }
            Self::Present(pointer) => lookup(response, pointer).map(|_| ()),
            Self::NonEmpty(pointer) => {
                let empty = match lookup(response, pointer)? {
                    Value::Array(items) => items.is_empty(),
                    Value::Object(map) => map.is_empty(),
                    Value::String(s) => s.is_empty(),
                    Value::Null => true,
                    Value::Bool(_) | Value::Number(_) => false,
                };
                if empty {
                    Err(format!("{pointer} is empty"))
                } else {
                    Ok(())
                }
            }
            Self::Equals(pointer, expected) => {
                let actual = lookup(response, pointer)?;
                if actual == expected {
                    Ok(())
                } else {
                    Err(format!("{pointer} is {actual}, expected {expected}"))
                }
            }
            Self::Matches(pointer, regex) => {
                let actual = lookup(response, pointer)?;
                let text = actual
                    .as_str()
                    .ok_or_else(|| format!("{pointer} is not a string"))?;
                if regex.is_match(text) {
                    Ok(())
                } else {
                    Err(format!("{pointer} does not match /{}/", regex.as_str()))
                }
            }
        }
    }
}

fn lookup<'a>(response: &'a Response, pointer: &str) -> Result<&'a Value, String> {
    result_of(response)?
        .pointer(pointer)
        .ok_or_else(|| format!("{pointer} missing from result"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RequestId;
    use anyhow::Result;
    use serde_json::json;

    fn ok(result: Value) -> Response {
        Response::success(RequestId::Number(1), result)
    }

    fn err(code: i64) -> Response {
        Response::error(RequestId::Number(1), code, "nope")
    }

    #[test]
    fn test_server_identified() {
        let good = ok(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "serverInfo": {"name": "omnicontext", "version": "0.9.0"}
        }));
        assert!(server_identified(&good).is_ok());

        let nameless = ok(json!({"protocolVersion": "2024-11-05", "serverInfo": {"name": " "}}));
        assert_eq!(
            server_identified(&nameless),
            Err("serverInfo.name is empty".to_string())
        );

        let missing = ok(json!({"protocolVersion": "2024-11-05"}));
        assert!(server_identified(&missing).is_err());
    }

    #[test]
    fn test_error_object_is_diagnosed() {
        let diagnostic = tools_listed(&err(-32603)).err().unwrap_or_default();
        assert_eq!(diagnostic, "server returned error: nope (-32603)");
    }

    #[test]
    fn test_tools_listed_accepts_empty() {
        assert!(tools_listed(&ok(json!({"tools": []}))).is_ok());
        assert!(tools_listed(&ok(json!({"tools": [{"name": "get_status"}]}))).is_ok());
        assert!(tools_listed(&ok(json!({}))).is_err());
        assert!(tools_listed(&ok(json!({"tools": [{"description": "no name"}]}))).is_err());
    }

    #[test]
    fn test_content_checks() {
        let empty = ok(json!({"content": []}));
        assert!(content_present(&empty).is_ok());
        assert!(content_non_empty(&empty).is_err());

        let text = ok(json!({"content": [{"type": "text", "text": "3 files indexed"}]}));
        assert!(content_present(&text).is_ok());
        assert!(content_non_empty(&text).is_ok());

        let flagged = ok(json!({
            "content": [{"type": "text", "text": "index locked"}],
            "isError": true
        }));
        assert_eq!(
            content_non_empty(&flagged),
            Err("tool reported an error: index locked".to_string())
        );

        assert!(content_present(&ok(json!({"text": "no content key"}))).is_err());
    }

    #[test]
    fn test_empty_expectations_mean_result() -> Result<()> {
        let check = compile(&[])?;
        assert!(check(&ok(json!({}))).is_ok());
        assert!(check(&err(-32601)).is_err());
        Ok(())
    }

    #[test]
    fn test_error_expectation() -> Result<()> {
        let check = compile(&[Expectation::Error { code: Some(-32601) }])?;
        assert!(check(&err(-32601)).is_ok());
        assert_eq!(
            check(&err(-32603)),
            Err("expected error code -32601, got -32603".to_string())
        );
        assert!(check(&ok(json!({}))).is_err());
        Ok(())
    }

    #[test]
    fn test_pointer_expectations() -> Result<()> {
        let response = ok(json!({
            "serverInfo": {"name": "omnicontext", "version": "0.9.0"},
            "content": [{"type": "text", "text": "Found 3 results for 'engine'"}]
        }));

        let check = compile(&[
            Expectation::Present {
                pointer: "/serverInfo/version".to_string(),
            },
            Expectation::NonEmpty {
                pointer: "/content".to_string(),
            },
            Expectation::Equals {
                pointer: "/serverInfo/name".to_string(),
                value: json!("omnicontext"),
            },
            Expectation::Matches {
                pointer: "/content/0/text".to_string(),
                pattern: r"Found \d+ results".to_string(),
            },
        ])?;
        assert!(check(&response).is_ok());

        let check = compile(&[Expectation::Equals {
            pointer: "/serverInfo/name".to_string(),
            value: json!("other"),
        }])?;
        assert_eq!(
            check(&response),
            Err(r#"/serverInfo/name is "omnicontext", expected "other""#.to_string())
        );

        let check = compile(&[Expectation::Present {
            pointer: "/missing".to_string(),
        }])?;
        assert_eq!(check(&response), Err("/missing missing from result".to_string()));
        Ok(())
    }

    #[test]
    fn test_first_failing_expectation_reported() -> Result<()> {
        let check = compile(&[
            Expectation::NonEmpty {
                pointer: "/content".to_string(),
            },
            Expectation::Present {
                pointer: "/never".to_string(),
            },
        ])?;
        assert_eq!(
            check(&ok(json!({"content": []}))),
            Err("/content is empty".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_bad_regex_rejected() {
        let outcome = compile(&[Expectation::Matches {
            pointer: "/x".to_string(),
            pattern: "(unclosed".to_string(),
        }]);
        assert!(outcome.is_err());
    }

    #[test]
    fn test_deserialize_expectations() -> Result<()> {
        let parsed: Vec<Expectation> = serde_json::from_value(json!([
            {"kind": "result"},
            {"kind": "error", "code": -32601},
            {"kind": "non_empty", "pointer": "/content"},
            {"kind": "matches", "pointer": "/content/0/text", "pattern": "engine"}
        ]))?;
        assert_eq!(parsed[0], Expectation::Result);
        assert_eq!(parsed[1], Expectation::Error { code: Some(-32601) });
        assert_eq!(
            parsed[2],
            Expectation::NonEmpty {
                pointer: "/content".to_string()
            }
        );
        Ok(())
    }
}
