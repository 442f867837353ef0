// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Correlates responses from the background reader with waiting steps.
//!
//! Each registered id owns a slot holding both ends of a oneshot channel.
//! The reader fulfills a slot by sending into it, which stores the response
//! whether or not anyone is waiting yet. A step then takes the receiver and
//! waits on it against the slot's deadline. The first response for an id
//! wins; anything after that is reported back to the reader for logging.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tokio::time::Instant;
use tracing::{trace, warn};

use super::types::{RequestId, Response};
use crate::error::ProbeError;

/// What happened to a response handed to [`Correlator::fulfill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fulfillment {
    /// Stored in a pending slot.
    Delivered,
    /// The slot for this id was already fulfilled; the response was dropped.
    Duplicate,
    /// No slot for this id (never registered, or its wait already ended).
    Unknown,
}

struct Slot {
    sender: Option<oneshot::Sender<Response>>,
    receiver: Option<oneshot::Receiver<Response>>,
    registered: Instant,
    deadline: Instant,
}

#[derive(Default)]
struct Slots {
    pending: HashMap<RequestId, Slot>,
    closed: bool,
}

/// Shared map from request id to pending correlation slot.
///
/// Cloning yields another handle to the same map.
#[derive(Clone, Default)]
pub struct Correlator {
    slots: Arc<Mutex<Slots>>,
}

impl Correlator {
    /// Creates an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pending slot for `id` that expires at `deadline`.
    ///
    /// Must be called before the request is written, so a fast response
    /// always finds its slot.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Closed`] once the server's output has ended.
    pub async fn register(&self, id: RequestId, deadline: Instant) -> Result<(), ProbeError> {
        self.insert(id, Instant::now(), deadline).await
    }

    async fn insert(
        &self,
        id: RequestId,
        registered: Instant,
        deadline: Instant,
    ) -> Result<(), ProbeError> {
        let mut slots = self.slots.lock().await;
        if slots.closed {
            return Err(ProbeError::Closed);
        }

        let (tx, rx) = oneshot::channel();
        let slot = Slot {
            sender: Some(tx),
            receiver: Some(rx),
            registered,
            deadline,
        };
        if slots.pending.insert(id.clone(), slot).is_some() {
            warn!("Request id {} registered twice, previous wait dropped", id);
        }
        trace!("Registered slot for id {}", id);
        Ok(())
    }

    /// Stores a response in its slot.
    pub async fn fulfill(&self, response: Response) -> Fulfillment {
        let mut slots = self.slots.lock().await;
        let Some(slot) = slots.pending.get_mut(&response.id) else {
            return Fulfillment::Unknown;
        };
        let Some(sender) = slot.sender.take() else {
            return Fulfillment::Duplicate;
        };

        let id = response.id.clone();
        match sender.send(response) {
            Ok(()) => Fulfillment::Delivered,
            Err(_) => {
                // Receiver gone: the wait expired and is about to drop the slot.
                slots.pending.remove(&id);
                Fulfillment::Unknown
            }
        }
    }

    /// Blocks until the slot for `id` is fulfilled or its deadline passes.
    ///
    /// The slot is destroyed when this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// - [`ProbeError::Timeout`] if the deadline elapsed first.
    /// - [`ProbeError::Closed`] if the server's output ended first.
    /// - [`ProbeError::UnknownId`] if `id` was never registered or is
    ///   already being waited on.
    pub async fn wait(&self, id: &RequestId) -> Result<Response, ProbeError> {
        let (receiver, registered, deadline) = {
            let mut slots = self.slots.lock().await;
            let slot = slots
                .pending
                .get_mut(id)
                .ok_or_else(|| ProbeError::UnknownId(id.clone()))?;
            let receiver = slot
                .receiver
                .take()
                .ok_or_else(|| ProbeError::UnknownId(id.clone()))?;
            (receiver, slot.registered, slot.deadline)
        };

        let outcome = tokio::time::timeout_at(deadline, receiver).await;
        self.slots.lock().await.pending.remove(id);

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ProbeError::Closed),
            Err(_) => Err(ProbeError::Timeout(deadline.duration_since(registered))),
        }
    }

    /// Registers, runs `send`, and waits, cleaning up the slot if sending fails.
    ///
    /// One deadline covers both the write and the wait, so a server that
    /// stops reading its stdin cannot hold the caller past `timeout`.
    ///
    /// # Errors
    ///
    /// [`ProbeError::Timeout`] if the write or the wait outlasts `timeout`,
    /// otherwise any error from [`Self::register`], `send`, or [`Self::wait`].
    pub async fn exchange<F, Fut>(
        &self,
        id: RequestId,
        timeout: Duration,
        send: F,
    ) -> Result<Response, ProbeError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), ProbeError>>,
    {
        let now = Instant::now();
        let deadline = now + timeout;
        self.insert(id.clone(), now, deadline).await?;

        let sent = match tokio::time::timeout_at(deadline, send()).await {
            Ok(sent) => sent,
            Err(_) => {
                warn!("Request {} not written within {:?}", id, timeout);
                Err(ProbeError::Timeout(timeout))
            }
        };
        if let Err(e) = sent {
            self.slots.lock().await.pending.remove(&id);
            return Err(e);
        }
        self.wait(&id).await
    }

    /// Marks the server's output as ended.
    ///
    /// Pending waits fail with [`ProbeError::Closed`] unless their response
    /// already arrived; later registrations are refused.
    pub async fn close(&self) {
        let mut slots = self.slots.lock().await;
        slots.closed = true;
        for slot in slots.pending.values_mut() {
            slot.sender.take();
        }
    }

    /// Returns `true` once [`Self::close`] has been called.
    pub async fn is_closed(&self) -> bool {
        self.slots.lock().await.closed
    }

    /// Number of live slots.
    pub async fn pending(&self) -> usize {
        self.slots.lock().await.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, bail};
    use serde_json::json;

    fn response(id: i64, marker: &str) -> Response {
        Response::success(RequestId::Number(id), json!({ "marker": marker }))
    }

    fn id(n: i64) -> RequestId {
        RequestId::Number(n)
    }

    fn in_secs(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn test_response_before_wait_is_not_lost() -> Result<()> {
        let correlator = Correlator::new();
        correlator.register(id(1), in_secs(5)).await?;

        assert_eq!(
            correlator.fulfill(response(1, "early")).await,
            Fulfillment::Delivered
        );

        let got = correlator.wait(&id(1)).await?;
        assert_eq!(got.result, Some(json!({"marker": "early"})));
        assert_eq!(correlator.pending().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_waiter_unblocked_by_reader() -> Result<()> {
        let correlator = Correlator::new();
        correlator.register(id(2), in_secs(5)).await?;

        let reader = correlator.clone();
        let feeder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            reader.fulfill(response(2, "later")).await
        });

        let got = correlator.wait(&id(2)).await?;
        assert_eq!(got.id, RequestId::Number(2));
        assert_eq!(feeder.await?, Fulfillment::Delivered);
        Ok(())
    }

    #[tokio::test]
    async fn test_first_fulfillment_wins() -> Result<()> {
        let correlator = Correlator::new();
        correlator.register(id(3), in_secs(5)).await?;

        assert_eq!(
            correlator.fulfill(response(3, "first")).await,
            Fulfillment::Delivered
        );
        assert_eq!(
            correlator.fulfill(response(3, "second")).await,
            Fulfillment::Duplicate
        );

        let got = correlator.wait(&id(3)).await?;
        assert_eq!(got.result, Some(json!({"marker": "first"})));
        Ok(())
    }

    #[tokio::test]
    async fn test_unregistered_id_is_unknown() {
        let correlator = Correlator::new();
        assert_eq!(
            correlator.fulfill(response(99, "stray")).await,
            Fulfillment::Unknown
        );
    }

    #[tokio::test]
    async fn test_wait_times_out_within_slack() -> Result<()> {
        let correlator = Correlator::new();
        let deadline = Duration::from_millis(100);
        let start = std::time::Instant::now();
        correlator
            .register(id(4), Instant::now() + deadline)
            .await?;

        let outcome = correlator.wait(&id(4)).await;
        let elapsed = start.elapsed();

        let Err(ProbeError::Timeout(reported)) = outcome else {
            bail!("expected timeout, got {outcome:?}");
        };
        assert!(reported <= deadline && reported + Duration::from_millis(50) > deadline);
        assert!(elapsed >= deadline, "returned early: {elapsed:?}");
        assert!(
            elapsed < deadline + Duration::from_millis(500),
            "returned late: {elapsed:?}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_late_arrival_is_discarded() -> Result<()> {
        let correlator = Correlator::new();
        correlator
            .register(id(5), Instant::now() + Duration::from_millis(20))
            .await?;
        assert!(correlator.wait(&id(5)).await.is_err());

        correlator.register(id(6), in_secs(5)).await?;
        assert_eq!(
            correlator.fulfill(response(5, "late")).await,
            Fulfillment::Unknown
        );
        assert_eq!(
            correlator.fulfill(response(6, "on time")).await,
            Fulfillment::Delivered
        );

        let got = correlator.wait(&id(6)).await?;
        assert_eq!(got.result, Some(json!({"marker": "on time"})));
        assert_eq!(correlator.pending().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_close_fails_pending_waits() -> Result<()> {
        let correlator = Correlator::new();
        correlator.register(id(7), in_secs(30)).await?;

        let closer = correlator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close().await;
        });

        let outcome = correlator.wait(&id(7)).await;
        assert!(matches!(outcome, Err(ProbeError::Closed)), "{outcome:?}");
        assert!(matches!(
            correlator.register(id(8), in_secs(1)).await,
            Err(ProbeError::Closed)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_close_keeps_already_delivered_response() -> Result<()> {
        let correlator = Correlator::new();
        correlator.register(id(9), in_secs(5)).await?;
        correlator.fulfill(response(9, "kept")).await;
        correlator.close().await;

        let got = correlator.wait(&id(9)).await?;
        assert_eq!(got.result, Some(json!({"marker": "kept"})));
        Ok(())
    }

    #[tokio::test]
    async fn test_wait_on_unregistered_id() {
        let correlator = Correlator::new();
        let outcome = correlator.wait(&id(10)).await;
        assert!(matches!(outcome, Err(ProbeError::UnknownId(_))));
    }

    #[tokio::test]
    async fn test_exchange_cleans_up_on_send_failure() {
        let correlator = Correlator::new();
        let outcome = correlator
            .exchange(id(11), Duration::from_secs(5), || async {
                Err(ProbeError::Io(std::io::Error::from(
                    std::io::ErrorKind::BrokenPipe,
                )))
            })
            .await;
        assert!(matches!(outcome, Err(ProbeError::Io(_))));
        assert_eq!(correlator.pending().await, 0);
    }

    #[tokio::test]
    async fn test_exchange_bounds_a_stuck_send() {
        let correlator = Correlator::new();
        let budget = Duration::from_millis(50);
        let start = std::time::Instant::now();
        let outcome = correlator
            .exchange(id(13), budget, std::future::pending::<Result<(), ProbeError>>)
            .await;

        assert!(
            matches!(outcome, Err(ProbeError::Timeout(reported)) if reported == budget),
            "{outcome:?}"
        );
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(correlator.pending().await, 0);
    }

    #[tokio::test]
    async fn test_exchange_reports_exact_budget() {
        let correlator = Correlator::new();
        let budget = Duration::from_millis(30);
        let outcome = correlator.exchange(id(12), budget, || async { Ok(()) }).await;
        assert!(
            matches!(outcome, Err(ProbeError::Timeout(reported)) if reported == budget),
            "{outcome:?}"
        );
    }
}
