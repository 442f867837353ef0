// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Line-oriented halves of the conversation with the server.
//!
//! [`LineWriter`] serializes writers onto the server's stdin. [`spawn_reader`]
//! drains the server's stdout in the background and feeds the correlator.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use super::codec::{self, Incoming, LineBuffer};
use super::correlator::{Correlator, Fulfillment};
use super::types::{METHOD_NOT_FOUND, Response};
use crate::error::ProbeError;

type Sink = Box<dyn AsyncWrite + Send + Unpin>;

/// How long an error reply to a server-initiated request may take to write.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared, serialized writer for newline-delimited messages.
///
/// Every message is written and flushed under one lock, so lines from the
/// runner and from the reader's error replies never interleave.
///
/// `send` is cancellation safe in the framing sense: the sink is held
/// outside the lock while a line is in flight, so dropping a `send` future
/// mid-write (for example on a deadline) drops the sink with it. The server
/// sees EOF rather than half a line followed by the next message.
#[derive(Clone)]
pub struct LineWriter {
    sink: Arc<Mutex<Option<Sink>>>,
}

impl LineWriter {
    /// Wraps an async byte sink.
    pub fn new(sink: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Some(Box::new(sink)))),
        }
    }

    /// Encodes and writes one message.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Encode`] if the message cannot be serialized,
    /// [`ProbeError::Io`] if the write fails or the writer was closed.
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<(), ProbeError> {
        let line = codec::encode_message(message)?;
        trace!("Sending: {}", line.trim_end());

        let mut guard = self.sink.lock().await;
        let mut sink = guard.take().ok_or_else(|| {
            ProbeError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "server stdin already closed",
            ))
        })?;
        // A failed write leaves the sink dropped; nothing more can be framed
        sink.write_all(line.as_bytes()).await?;
        sink.flush().await?;
        *guard = Some(sink);
        Ok(())
    }

    /// Flushes and drops the sink, signalling EOF to the reader on the other end.
    pub async fn close(&self) {
        if let Some(mut sink) = self.sink.lock().await.take()
            && let Err(e) = sink.shutdown().await
        {
            debug!("Error closing server stdin: {}", e);
        }
    }
}

/// Counters kept by the reader task, returned when it exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReaderStats {
    /// Complete lines read.
    pub lines: usize,
    /// Responses delivered to a waiting slot.
    pub delivered: usize,
    /// Lines that did not decode and were skipped.
    pub skipped: usize,
    /// Responses dropped as duplicate, late, or for an unknown id.
    pub discarded: usize,
    /// Server-initiated requests and notifications.
    pub server_messages: usize,
}

/// Spawns the background task that drains `stream` into `correlator`.
///
/// Server-to-client requests are answered with `MethodNotFound` through
/// `replies`. When the stream ends the correlator is closed.
pub fn spawn_reader<R>(
    stream: R,
    correlator: Correlator,
    replies: LineWriter,
) -> JoinHandle<ReaderStats>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(reader_task(stream, correlator, replies))
}

async fn reader_task<R>(mut stream: R, correlator: Correlator, replies: LineWriter) -> ReaderStats
where
    R: AsyncRead + Unpin,
{
    let mut buffer = LineBuffer::new();
    let mut stats = ReaderStats::default();
    let mut temp = [0u8; 4096];

    loop {
        match stream.read(&mut temp).await {
            Ok(0) => {
                debug!("Server stdout closed");
                break;
            }
            Ok(n) => buffer.extend(&temp[..n]),
            Err(e) => {
                error!("Error reading from server stdout: {}", e);
                break;
            }
        }

        while let Some(line) = buffer.next_line() {
            handle_line(line, &correlator, &replies, &mut stats).await;
        }
    }

    if let Some(line) = buffer.finish() {
        handle_line(line, &correlator, &replies, &mut stats).await;
    }

    correlator.close().await;
    debug!("Reader task exiting: {:?}", stats);
    stats
}

async fn handle_line(
    line: Result<String, ProbeError>,
    correlator: &Correlator,
    replies: &LineWriter,
    stats: &mut ReaderStats,
) {
    stats.lines += 1;

    let line = match line {
        Ok(line) if line.trim().is_empty() => return,
        Ok(line) => line,
        Err(e) => {
            debug!("Skipping line: {}", e);
            stats.skipped += 1;
            return;
        }
    };
    trace!("Received: {}", line);

    match codec::decode_message(&line) {
        Ok(Incoming::Response(response)) => {
            let id = response.id.clone();
            match correlator.fulfill(response).await {
                Fulfillment::Delivered => stats.delivered += 1,
                Fulfillment::Duplicate => {
                    warn!("Discarding duplicate response for id {}", id);
                    stats.discarded += 1;
                }
                Fulfillment::Unknown => {
                    warn!("Discarding response for unknown or expired id {}", id);
                    stats.discarded += 1;
                }
            }
        }
        Ok(Incoming::Request { id, method }) => {
            debug!("Server request: {} (id: {})", method, id);
            stats.server_messages += 1;
            let reply = Response::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method '{method}' not supported by client"),
            );
            // Written off the reader task so stdout keeps draining while
            // the server is not reading its stdin
            let replies = replies.clone();
            tokio::spawn(async move {
                match tokio::time::timeout(REPLY_TIMEOUT, replies.send(&reply)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("Failed to reply to server request {}: {}", method, e),
                    Err(_) => warn!(
                        "Reply to server request {} not written within {:?}",
                        method, REPLY_TIMEOUT
                    ),
                }
            });
        }
        Ok(Incoming::Notification { method }) => {
            trace!("Ignoring server notification: {}", method);
            stats.server_messages += 1;
        }
        Err(e) => {
            debug!("Skipping line: {}", e);
            stats.skipped += 1;
        }
    }
}
