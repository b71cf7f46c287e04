//! Request correlation table
//!
//! Tracks outstanding requests for one connection. Each entry ends in
//! exactly one of three ways, whichever happens first:
//! - `resolve`: the first response carrying its ID
//! - `sweep_timeouts`: its deadline passed
//! - `cancel_all`: the connection was lost
//!
//! The table is owned by a single session task, so these outcomes are
//! serialized: once an entry is removed, later responses with the same ID
//! find nothing and are dropped.
//!
//! IDs start at 1 and are never reused while an entry is alive. A new table
//! is created for every connection attempt, so numbering restarts and stale
//! responses from an earlier connection cannot match.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::RequestError;
use crate::messages::{fields, Message, Payload, RequestId};

/// Sending half handed to the table; resolved exactly once
pub type Completion = oneshot::Sender<Result<Payload, RequestError>>;

/// Creates a completion and the future the caller awaits
pub fn completion() -> (Completion, PendingResponse) {
    let (tx, rx) = oneshot::channel();
    (tx, PendingResponse { rx })
}

/// Future resolving to the peer's response payload
///
/// If the owning session disappears without resolving the request, this
/// resolves to `ConnectionLost`.
#[derive(Debug)]
pub struct PendingResponse {
    rx: oneshot::Receiver<Result<Payload, RequestError>>,
}

impl Future for PendingResponse {
    type Output = Result<Payload, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RequestError::ConnectionLost)))
    }
}

/// An outstanding request
#[derive(Debug)]
pub struct PendingRequest {
    pub deadline: Instant,
    completion: Completion,
    original: Message,
}

impl PendingRequest {
    fn complete(self, result: Result<Payload, RequestError>) {
        // the caller may have stopped waiting
        let _ = self.completion.send(result);
    }
}

/// Outstanding requests of one connection, keyed by request ID
#[derive(Debug)]
pub struct RequestTable {
    next_id: RequestId,
    timeout: Duration,
    pending: HashMap<RequestId, PendingRequest>,
}

impl RequestTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: 1,
            timeout,
            pending: HashMap::new(),
        }
    }

    /// Registers a request and returns the stamped message to transmit
    pub fn create(
        &mut self,
        payload: Payload,
        completion: Completion,
        now: Instant,
    ) -> (RequestId, Message) {
        let request_id = self.allocate_id();
        let message = Message::from_payload(payload).with(fields::REQUEST_ID, request_id);

        self.pending.insert(
            request_id,
            PendingRequest {
                deadline: now + self.timeout,
                completion,
                original: message.clone(),
            },
        );

        tracing::debug!(request_id, outstanding = self.pending.len(), "Request registered");

        (request_id, message)
    }

    fn allocate_id(&mut self) -> RequestId {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1).max(1);
            if !self.pending.contains_key(&id) {
                return id;
            }
        }
    }

    /// Completes the matching request with `payload`
    ///
    /// Returns false when nothing matched (unknown, already answered, or
    /// timed out); the response is then dropped.
    pub fn resolve(&mut self, response_id: RequestId, payload: Payload) -> bool {
        match self.pending.remove(&response_id) {
            Some(pending) => {
                tracing::debug!(request_id = response_id, "Request resolved");
                pending.complete(Ok(payload));
                true
            }
            None => {
                tracing::debug!(response_id, "Dropping unmatched response");
                false
            }
        }
    }

    /// Fails every request whose deadline is at or before `now`
    ///
    /// Returns the number of requests that timed out.
    pub fn sweep_timeouts(&mut self, now: Instant) -> usize {
        let expired: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for request_id in &expired {
            if let Some(pending) = self.pending.remove(request_id) {
                tracing::debug!(request_id, "Request timed out");
                let request = pending.original.clone().into_value();
                pending.complete(Err(RequestError::TimedOut { request }));
            }
        }

        expired.len()
    }

    /// Fails every outstanding request with `reason` and empties the table
    pub fn cancel_all(&mut self, reason: RequestError) -> usize {
        let count = self.pending.len();
        for (_, pending) in self.pending.drain() {
            pending.complete(Err(reason.clone()));
        }
        if count > 0 {
            tracing::debug!(count, reason = %reason, "Cancelled outstanding requests");
        }
        count
    }

    /// Fails a request that could not be issued; no entry is created
    pub fn reject_immediately(completion: Completion, reason: RequestError) {
        let _ = completion.send(Err(reason));
    }

    /// Earliest deadline among outstanding requests
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    pub fn contains(&self, request_id: RequestId) -> bool {
        self.pending.contains_key(&request_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
