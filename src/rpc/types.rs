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

//! JSON-RPC 2.0 messages and the MCP payloads the probe sends and inspects.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only JSON-RPC version spoken on the wire.
pub const JSONRPC_VERSION: &str = "2.0";

/// Error code for a method the receiver does not implement.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC request sent to the server under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation id.
    pub id: RequestId,
    /// Method to invoke.
    pub method: String,
    /// Params object, omitted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Creates a request with the given id.
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC notification. No response is expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Method to invoke.
    pub method: String,
    /// Params object, omitted when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Creates a notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Correlation id, numeric or string.
///
/// The probe only ever assigns numbers, but servers echo whatever they
/// received and some stringify it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    String(String),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "\"{s}\""),
        }
    }
}

/// JSON-RPC response from the server under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Correlation id.
    pub id: RequestId,
    /// Present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    /// A response carrying `result`.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// A response carrying an error object.
    pub fn error(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(ResponseError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Error object of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    /// Numeric code, e.g. -32601.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional extra detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

/// Params the probe sends with `initialize`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version the probe offers.
    pub protocol_version: String,
    /// Client capabilities; the probe advertises none.
    pub capabilities: ClientCapabilities,
    /// Identifies the probe.
    pub client_info: ClientInfo,
}

/// MCP client capabilities. The probe advertises none.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientCapabilities {
    /// `roots` capability, if advertised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<Value>,
    /// `sampling` capability, if advertised.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
}

/// Client identification.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    /// Client name.
    pub name: String,
    /// Client version.
    pub version: String,
}

/// What a server answers to `initialize`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the server settled on.
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Server capabilities, kept opaque.
    #[serde(default)]
    pub capabilities: Value,
    /// Server identification. Required.
    pub server_info: ServerInfo,
}

/// Server identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name; must be non-empty.
    pub name: String,
    /// Server version, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Tool descriptor from a tools/list response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Name passed back in `tools/call`.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Argument schema, not validated here.
    #[serde(default)]
    pub input_schema: Value,
}

/// Result of `tools/list`. An empty list is valid.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    /// Advertised tools.
    pub tools: Vec<Tool>,
}

/// Result of `tools/call`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Content blocks.
    pub content: Vec<ContentBlock>,
    /// Set when the tool itself failed.
    #[serde(default)]
    pub is_error: Option<bool>,
}

/// One content block of a tool result.
///
/// Only text blocks are inspected; other kinds are carried through untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlock {
    /// Block kind, e.g. `"text"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The text, for text blocks.
    #[serde(default)]
    pub text: Option<String>,
}

impl CallToolResult {
    /// Concatenated text of every text block.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
