//! Request id allocation and pending-request bookkeeping.
//!
//! The table is owned by the session task, so it needs no locking. Each
//! pending entry carries a caller-defined context that the session uses to
//! complete the request once the matching response (or ERROR) arrives.

use crate::error::RequestError;
use crate::message::{Id, MessageType, WampMessage};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// WAMP ids are drawn from [1, 2^53].
const MAX_REQUEST_ID: Id = 1 << 53;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Subscribe,
    Unsubscribe,
    Publish,
    Call,
    Register,
    Unregister,
}

impl RequestKind {
    pub fn request_type(self) -> MessageType {
        match self {
            RequestKind::Subscribe => MessageType::Subscribe,
            RequestKind::Unsubscribe => MessageType::Unsubscribe,
            RequestKind::Publish => MessageType::Publish,
            RequestKind::Call => MessageType::Call,
            RequestKind::Register => MessageType::Register,
            RequestKind::Unregister => MessageType::Unregister,
        }
    }

    pub fn ack_type(self) -> MessageType {
        match self {
            RequestKind::Subscribe => MessageType::Subscribed,
            RequestKind::Unsubscribe => MessageType::Unsubscribed,
            RequestKind::Publish => MessageType::Published,
            RequestKind::Call => MessageType::Result,
            RequestKind::Register => MessageType::Registered,
            RequestKind::Unregister => MessageType::Unregistered,
        }
    }

    fn accepts(self, response: &WampMessage) -> bool {
        match response {
            WampMessage::Error { request_type, .. } => *request_type == self.request_type().code(),
            other => other.message_type() == self.ack_type(),
        }
    }
}

#[derive(Debug)]
pub struct PendingRequest<T> {
    pub request_id: Id,
    pub issued_at: Instant,
    pub kind: RequestKind,
    pub context: T,
}

/// A pending entry taken out of the table together with the reason it ended.
#[derive(Debug)]
pub struct FailedRequest<T> {
    pub pending: PendingRequest<T>,
    pub error: RequestError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unmatched {
    /// No request with that id is pending.
    UnknownRequest,
    /// A request is pending under that id, but of another kind.
    KindMismatch { expected: MessageType },
}

#[derive(Debug)]
pub struct RequestTable<T> {
    last_id: Id,
    timeout: Duration,
    pending: HashMap<Id, PendingRequest<T>>,
}

impl<T> RequestTable<T> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            last_id: 0,
            timeout,
            pending: HashMap::new(),
        }
    }

    /// Next free request id. Ids only grow, wrap at 2^53 and skip any id still pending.
    pub fn next_request_id(&mut self) -> Id {
        loop {
            self.last_id = if self.last_id >= MAX_REQUEST_ID {
                1
            } else {
                self.last_id + 1
            };
            if !self.pending.contains_key(&self.last_id) {
                return self.last_id;
            }
        }
    }

    pub fn register(&mut self, request_id: Id, kind: RequestKind, context: T) {
        self.register_at(request_id, kind, context, Instant::now());
    }

    pub fn register_at(&mut self, request_id: Id, kind: RequestKind, context: T, issued_at: Instant) {
        self.pending.insert(
            request_id,
            PendingRequest {
                request_id,
                issued_at,
                kind,
                context,
            },
        );
    }

    /// Removes the entry answered by `response`. Responses of the wrong kind leave it pending.
    pub fn resolve(
        &mut self,
        request_id: Id,
        response: &WampMessage,
    ) -> Result<PendingRequest<T>, Unmatched> {
        let entry = self
            .pending
            .get(&request_id)
            .ok_or(Unmatched::UnknownRequest)?;
        if !entry.kind.accepts(response) {
            return Err(Unmatched::KindMismatch {
                expected: entry.kind.ack_type(),
            });
        }
        self.pending
            .remove(&request_id)
            .ok_or(Unmatched::UnknownRequest)
    }

    /// Removes a pending entry that will never get its response.
    pub fn fail(&mut self, request_id: Id, error: RequestError) -> Option<FailedRequest<T>> {
        let pending = self.pending.remove(&request_id)?;
        tracing::debug!(
            "Request {} ({:?}) failed: {}",
            request_id,
            pending.kind,
            error
        );
        Some(FailedRequest { pending, error })
    }

    /// Ids of entries older than the configured timeout, oldest request first.
    pub fn expired(&self, now: Instant) -> Vec<Id> {
        let mut ids: Vec<Id> = self
            .pending
            .values()
            .filter(|p| now.saturating_duration_since(p.issued_at) >= self.timeout)
            .map(|p| p.request_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn pending_ids(&self) -> Vec<Id> {
        let mut ids: Vec<Id> = self.pending.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn contains(&self, request_id: Id) -> bool {
        self.pending.contains_key(&request_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
