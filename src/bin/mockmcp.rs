// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A configurable mock MCP server for testing.
//!
//! Speaks MCP over stdin/stdout using newline-delimited JSON-RPC. CLI flags
//! control timing and failure modes. No tokio, just blocking std I/O.

use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Mock MCP server for integration testing.
#[derive(Parser, Debug)]
#[command(name = "mockmcp")]
#[allow(
    clippy::struct_excessive_bools,
    reason = "CLI flags are inherently boolean"
)]
struct Args {
    /// Repository the server pretends to index.
    #[arg(long, default_value = ".")]
    repo: String,

    /// Sleep before reading any input (milliseconds).
    #[arg(long, default_value_t = 0)]
    startup_delay: u64,

    /// Sleep before every response (milliseconds).
    #[arg(long, default_value_t = 0)]
    response_delay: u64,

    /// Never respond to this method or tool (repeatable).
    #[arg(long)]
    hang_on: Vec<String>,

    /// Return `InternalError` for this method or tool (repeatable).
    #[arg(long)]
    fail_on: Vec<String>,

    /// Send every response twice.
    #[arg(long)]
    duplicate: bool,

    /// Interleave log lines and notifications with responses on stdout.
    #[arg(long)]
    noise: bool,

    /// Exit after n responses (simulate crash).
    #[arg(long)]
    drop_after: Option<u64>,

    /// Return no content from `search_code`.
    #[arg(long)]
    empty_search: bool,

    /// Advertise no tools.
    #[arg(long)]
    no_tools: bool,

    /// Keep running after stdin closes.
    #[arg(long)]
    ignore_eof: bool,

    /// Send a `roots/list` request to the client after initialize.
    #[arg(long)]
    ask_roots: bool,
}

/// A JSON-RPC message from the client.
#[derive(Debug, Deserialize)]
struct Request {
    #[allow(dead_code, reason = "Required by JSON-RPC protocol")]
    jsonrpc: String,
    id: Option<Value>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
}

/// A JSON-RPC response.
#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

/// JSON-RPC error object.
#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Thread-safe writer handle. Wraps `std::io::Stdout` for production,
/// or a shared `Vec<u8>` for tests.
type Writer = Arc<Mutex<Box<dyn Write + Send>>>;

/// Create a writer that forwards to stdout.
fn stdout_writer() -> Writer {
    Arc::new(Mutex::new(Box::new(std::io::stdout())))
}

#[cfg(test)]
fn buffer_writer() -> (Writer, Arc<Mutex<Vec<u8>>>) {
    let buf = Arc::new(Mutex::new(Vec::<u8>::new()));
    let writer: Box<dyn Write + Send> = Box::new(SharedVecWriter(buf.clone()));
    (Arc::new(Mutex::new(writer)), buf)
}

/// Write adapter for `Arc<Mutex<Vec<u8>>>` used in tests.
#[cfg(test)]
struct SharedVecWriter(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Write for SharedVecWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Whether the read loop should keep going.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Shared state for the mock server.
struct MockServer {
    args: Args,
    response_count: u64,
    writer: Writer,
}

impl MockServer {
    fn new(args: Args, writer: Writer) -> Self {
        Self {
            args,
            response_count: 0,
            writer,
        }
    }

    /// Run the server, reading lines until EOF or a configured drop.
    fn run(&mut self, reader: &mut dyn BufRead) {
        if self.args.startup_delay > 0 {
            std::thread::sleep(Duration::from_millis(self.args.startup_delay));
        }

        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }

            let Ok(request) = serde_json::from_str::<Request>(line.trim()) else {
                continue;
            };
            if self.handle_message(request) == Flow::Stop {
                break;
            }
        }
    }

    fn handle_message(&mut self, request: Request) -> Flow {
        // Replies to our own requests carry no method
        let Some(method) = request.method.clone() else {
            return Flow::Continue;
        };

        match request.id {
            Some(id) => self.handle_request(&method, id, &request.params),
            None => Flow::Continue,
        }
    }

    fn handle_request(&mut self, method: &str, id: Value, params: &Value) -> Flow {
        let tool = (method == "tools/call")
            .then(|| params.get("name").and_then(Value::as_str))
            .flatten()
            .unwrap_or_default();
        let targeted = |list: &[String]| list.iter().any(|m| m == method || m == tool);

        // Never respond
        if targeted(&self.args.hang_on) {
            return Flow::Continue;
        }

        // Response delay
        if self.args.response_delay > 0 {
            std::thread::sleep(Duration::from_millis(self.args.response_delay));
        }

        if self.args.noise {
            write_line(&self.writer, &format!("[mockmcp] handling {method}"));
            send_message(
                &self.writer,
                &json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/message",
                    "params": {"level": "info", "data": format!("handling {method}")}
                }),
            );
        }

        let response = if targeted(&self.args.fail_on) {
            Response {
                jsonrpc: "2.0".to_string(),
                id,
                result: None,
                error: Some(RpcError {
                    code: -32603,
                    message: format!("mockmcp: configured to fail on {method}"),
                }),
            }
        } else {
            match self.dispatch(method, params) {
                Ok(result) => Response {
                    jsonrpc: "2.0".to_string(),
                    id,
                    result: Some(result),
                    error: None,
                },
                Err(error) => Response {
                    jsonrpc: "2.0".to_string(),
                    id,
                    result: None,
                    error: Some(error),
                },
            }
        };

        self.send_response(&response);
        if self.args.duplicate {
            self.send_response(&response);
        }

        if method == "initialize" && self.args.ask_roots {
            send_message(
                &self.writer,
                &json!({"jsonrpc": "2.0", "id": "mockmcp-1", "method": "roots/list"}),
            );
        }

        self.response_count += 1;
        if self
            .args
            .drop_after
            .is_some_and(|limit| self.response_count >= limit)
        {
            return Flow::Stop;
        }
        Flow::Continue
    }

    fn dispatch(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.handle_initialize()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.handle_tools_list()),
            "tools/call" => Ok(self.handle_tools_call(params)),
            _ => Err(RpcError {
                code: -32601,
                message: format!("mockmcp: method not found: {method}"),
            }),
        }
    }

    fn handle_initialize(&self) -> Value {
        json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "mockmcp", "version": env!("CARGO_PKG_VERSION")},
            "instructions": format!("Mock index of {}", self.args.repo)
        })
    }

    fn handle_tools_list(&self) -> Value {
        if self.args.no_tools {
            return json!({"tools": []});
        }
        json!({
            "tools": [
                {
                    "name": "get_status",
                    "description": "Report index status",
                    "inputSchema": {"type": "object", "properties": {}}
                },
                {
                    "name": "search_code",
                    "description": "Search the index",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "query": {"type": "string"},
                            "limit": {"type": "integer"}
                        },
                        "required": ["query"]
                    }
                },
                {
                    "name": "context_window",
                    "description": "Assemble context for a query",
                    "inputSchema": {
                        "type": "object",
                        "properties": {
                            "query": {"type": "string"},
                            "limit": {"type": "integer"},
                            "token_budget": {"type": "integer"}
                        },
                        "required": ["query"]
                    }
                }
            ]
        })
    }

    fn handle_tools_call(&self, params: &Value) -> Value {
        let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
        let query = arguments
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default();

        match name {
            "get_status" => text_result(&format!(
                "Repository: {}\nFiles indexed: 3\nChunks: 42",
                self.args.repo
            )),
            "search_code" if self.args.empty_search => json!({"content": []}),
            "search_code" => {
                let limit = arguments.get("limit").and_then(Value::as_u64).unwrap_or(10);
                let hits = ["src/engine.rs:12", "src/engine.rs:88", "src/lib.rs:3"];
                let content: Vec<Value> = hits
                    .iter()
                    .take(usize::try_from(limit).unwrap_or(usize::MAX))
                    .map(|hit| json!({"type": "text", "text": format!("{hit} matches '{query}'")}))
                    .collect();
                json!({"content": content})
            }
            "context_window" => {
                let budget = arguments
                    .get("token_budget")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                text_result(&format!(
                    "Context for '{query}' within {budget} tokens:\npub struct Engine {{ .. }}"
                ))
            }
            _ => json!({
                "content": [{"type": "text", "text": format!("Unknown tool: {name}")}],
                "isError": true
            }),
        }
    }

    fn send_response(&self, response: &Response) {
        if let Ok(value) = serde_json::to_value(response) {
            send_message(&self.writer, &value);
        }
    }
}

fn text_result(text: &str) -> Value {
    json!({"content": [{"type": "text", "text": text}]})
}

/// Write one newline-terminated line.
fn write_line(writer: &Writer, line: &str) {
    let Ok(mut w) = writer.lock() else { return };
    let _ = w.write_all(line.as_bytes());
    let _ = w.write_all(b"\n");
    let _ = w.flush();
}

/// Send a JSON-RPC message to the client.
fn send_message(writer: &Writer, value: &Value) {
    let Ok(json) = serde_json::to_string(value) else {
        return;
    };
    write_line(writer, &json);
}

fn main() {
    let args = Args::parse();
    let ignore_eof = args.ignore_eof;
    let writer = stdout_writer();
    let mut server = MockServer::new(args, writer);
    let mut stdin = std::io::stdin().lock();
    server.run(&mut stdin);

    if ignore_eof {
        // Only a signal ends us now
        loop {
            std::thread::sleep(Duration::from_secs(60));
        }
    }
}
