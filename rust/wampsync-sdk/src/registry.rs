//! Reference-counted topic subscriptions.
//!
//! Any number of [`Subscription`] handles may share one router subscription.
//! The registry counts holders per canonical topic and tells the session
//! when wire traffic is needed: SUBSCRIBE on the first holder, UNSUBSCRIBE
//! when the last one lets go. Handles can be linked into parent/child trees;
//! releasing a parent releases its children.

use crate::content::ContentIdentifier;
use crate::error::SubscriptionError;
use crate::message::{Dict, Id};
use crate::subscription::{HandleId, Subscription, SubscriptionEvent};
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

pub(crate) type SubscribeReply = oneshot::Sender<Result<Subscription, SubscriptionError>>;
pub(crate) type UnsubscribeReply = oneshot::Sender<Result<(), SubscriptionError>>;

/// A SUBSCRIBE the session must put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SubscribeRequest {
    pub key: String,
    pub topic: String,
    pub options: Dict,
}

/// An UNSUBSCRIBE the session must put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct UnsubscribeRequest {
    pub key: String,
    pub subscription_id: Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TopicState {
    Pending,
    Active { subscription_id: Id },
    Unsubscribing { subscription_id: Id },
}

struct TopicEntry {
    content: ContentIdentifier,
    state: TopicState,
    ref_count: usize,
    waiters: Vec<SubscribeReply>,
    closers: Vec<UnsubscribeReply>,
    events_tx: broadcast::Sender<SubscriptionEvent>,
    active_tx: watch::Sender<bool>,
}

struct HandleEntry {
    key: String,
    parent: Option<HandleId>,
    children: Vec<HandleId>,
}

pub(crate) struct SubscriptionRegistry {
    topics: HashMap<String, TopicEntry>,
    by_subscription: HashMap<Id, String>,
    handles: HashMap<HandleId, HandleEntry>,
    next_handle: HandleId,
    session_id: Id,
    event_buffer: usize,
    release_tx: mpsc::UnboundedSender<HandleId>,
}

impl SubscriptionRegistry {
    pub fn new(event_buffer: usize) -> (Self, mpsc::UnboundedReceiver<HandleId>) {
        let (release_tx, release_rx) = mpsc::unbounded_channel();
        let registry = Self {
            topics: HashMap::new(),
            by_subscription: HashMap::new(),
            handles: HashMap::new(),
            next_handle: 0,
            session_id: 0,
            event_buffer: event_buffer.max(1),
            release_tx,
        };
        (registry, release_rx)
    }

    pub fn set_session_id(&mut self, session_id: Id) {
        self.session_id = session_id;
    }

    /// Adds a holder for `content`. Returns the SUBSCRIBE to send on a 0 to 1 transition.
    pub fn acquire(
        &mut self,
        content: ContentIdentifier,
        reply: SubscribeReply,
    ) -> Option<SubscribeRequest> {
        let key = content.canonical_topic();
        let existing = self.topics.get_mut(&key).map(|entry| {
            entry.ref_count += 1;
            entry.state
        });
        match existing {
            Some(TopicState::Active { subscription_id }) => {
                let handle = self.grant(&key, subscription_id);
                // A dropped receiver hands the handle back; its Drop releases the share.
                let _ = reply.send(Ok(handle));
                return None;
            }
            Some(TopicState::Pending | TopicState::Unsubscribing { .. }) => {
                if let Some(entry) = self.topics.get_mut(&key) {
                    entry.waiters.push(reply);
                }
                return None;
            }
            None => {}
        }

        let (events_tx, _) = broadcast::channel(self.event_buffer);
        let (active_tx, _) = watch::channel(false);
        let request = SubscribeRequest {
            key: key.clone(),
            topic: content.topic.clone(),
            options: content.options.clone(),
        };
        self.topics.insert(
            key,
            TopicEntry {
                content,
                state: TopicState::Pending,
                ref_count: 1,
                waiters: vec![reply],
                closers: Vec::new(),
                events_tx,
                active_tx,
            },
        );
        Some(request)
    }

    /// Handles SUBSCRIBED. Returns an UNSUBSCRIBE when every waiter gave up meanwhile.
    pub fn on_subscribed(&mut self, key: &str, subscription_id: Id) -> Option<UnsubscribeRequest> {
        let waiters = {
            let entry = self.topics.get_mut(key)?;
            entry.state = TopicState::Active { subscription_id };
            let _ = entry.active_tx.send(true);
            std::mem::take(&mut entry.waiters)
        };
        self.by_subscription.insert(subscription_id, key.to_string());

        let mut cancelled = 0;
        for reply in waiters {
            if reply.is_closed() {
                cancelled += 1;
                continue;
            }
            let handle = self.grant(key, subscription_id);
            let _ = reply.send(Ok(handle));
        }

        let entry = self.topics.get_mut(key)?;
        entry.ref_count = entry.ref_count.saturating_sub(cancelled);
        if entry.ref_count == 0 {
            tracing::debug!("all waiters for {} cancelled, unsubscribing", key);
            return Some(Self::begin_unsubscribe(key, entry));
        }
        None
    }

    /// Handles an ERROR or timeout for SUBSCRIBE. The topic is forgotten so callers may retry.
    pub fn on_subscribe_failed(&mut self, key: &str, reason: &str) {
        let Some(entry) = self.topics.remove(key) else {
            return;
        };
        tracing::debug!("subscribe to {} failed: {}", key, reason);
        for reply in entry.waiters {
            let _ = reply.send(Err(SubscriptionError::SetupFailed {
                topic: entry.content.topic.clone(),
                reason: reason.to_string(),
            }));
        }
        for closer in entry.closers {
            let _ = closer.send(Ok(()));
        }
    }

    /// Releases a handle and its associated children.
    pub fn release(
        &mut self,
        handle_id: HandleId,
        reply: Option<UnsubscribeReply>,
    ) -> Vec<UnsubscribeRequest> {
        let mut requests = Vec::new();
        let mut reply = reply;
        let mut stack = vec![handle_id];

        while let Some(id) = stack.pop() {
            let Some(handle) = self.handles.remove(&id) else {
                continue;
            };
            if let Some(parent) = handle.parent.and_then(|p| self.handles.get_mut(&p)) {
                parent.children.retain(|c| *c != id);
            }
            stack.extend(handle.children.iter().copied());

            let Some(entry) = self.topics.get_mut(&handle.key) else {
                continue;
            };
            entry.ref_count = entry.ref_count.saturating_sub(1);
            if entry.ref_count > 0 {
                continue;
            }
            if let TopicState::Active { .. } = entry.state {
                let request = Self::begin_unsubscribe(&handle.key, entry);
                if id == handle_id {
                    if let Some(closer) = reply.take() {
                        entry.closers.push(closer);
                    }
                }
                requests.push(request);
            }
        }

        if let Some(reply) = reply {
            let _ = reply.send(Ok(()));
        }
        requests
    }

    fn begin_unsubscribe(key: &str, entry: &mut TopicEntry) -> UnsubscribeRequest {
        let subscription_id = match entry.state {
            TopicState::Active { subscription_id }
            | TopicState::Unsubscribing { subscription_id } => subscription_id,
            TopicState::Pending => 0,
        };
        entry.state = TopicState::Unsubscribing { subscription_id };
        let _ = entry.active_tx.send(false);
        UnsubscribeRequest {
            key: key.to_string(),
            subscription_id,
        }
    }

    /// Handles UNSUBSCRIBED. Holders that arrived meanwhile trigger a fresh SUBSCRIBE.
    pub fn on_unsubscribed(&mut self, key: &str) -> Option<SubscribeRequest> {
        self.finish_unsubscribe(key, None)
    }

    pub fn on_unsubscribe_failed(&mut self, key: &str, reason: &str) -> Option<SubscribeRequest> {
        tracing::warn!("unsubscribe from {} failed: {}", key, reason);
        self.finish_unsubscribe(key, Some(reason))
    }

    fn finish_unsubscribe(&mut self, key: &str, failure: Option<&str>) -> Option<SubscribeRequest> {
        let entry = self.topics.get_mut(key)?;
        let TopicState::Unsubscribing { subscription_id } = entry.state else {
            return None;
        };
        self.by_subscription.remove(&subscription_id);

        for closer in std::mem::take(&mut entry.closers) {
            let result = match failure {
                Some(reason) => Err(SubscriptionError::TeardownFailed {
                    topic: entry.content.topic.clone(),
                    reason: reason.to_string(),
                }),
                None => Ok(()),
            };
            let _ = closer.send(result);
        }

        if entry.ref_count > 0 {
            entry.state = TopicState::Pending;
            return Some(SubscribeRequest {
                key: key.to_string(),
                topic: entry.content.topic.clone(),
                options: entry.content.options.clone(),
            });
        }
        self.topics.remove(key);
        None
    }

    /// Handles a router-side revocation. Every handle of the topic sees its event stream end.
    pub fn revoke(&mut self, subscription_id: Id, reason: &str) -> bool {
        let Some(key) = self.by_subscription.remove(&subscription_id) else {
            return false;
        };
        let Some(entry) = self.topics.remove(&key) else {
            return false;
        };
        tracing::info!("subscription {} to {} revoked: {}", subscription_id, key, reason);
        let _ = entry.active_tx.send(false);
        for reply in entry.waiters {
            let _ = reply.send(Err(SubscriptionError::SetupFailed {
                topic: entry.content.topic.clone(),
                reason: reason.to_string(),
            }));
        }
        for closer in entry.closers {
            let _ = closer.send(Ok(()));
        }
        // Stale handles must not release shares of a later subscription to the same topic.
        self.handles.retain(|_, handle| handle.key != key);
        true
    }

    /// Links `child` under `parent`. Fails for unknown handles or when the link would form a loop.
    pub fn associate(&mut self, parent: HandleId, child: HandleId) -> bool {
        if parent == child || !self.handles.contains_key(&parent) || !self.handles.contains_key(&child) {
            return false;
        }
        let mut cursor = Some(parent);
        while let Some(id) = cursor {
            if id == child {
                return false;
            }
            cursor = self.handles.get(&id).and_then(|h| h.parent);
        }

        let previous = self.handles.get_mut(&child).and_then(|h| h.parent.replace(parent));
        if let Some(old) = previous.and_then(|p| self.handles.get_mut(&p)) {
            old.children.retain(|c| *c != child);
        }
        if let Some(entry) = self.handles.get_mut(&parent) {
            entry.children.push(child);
        }
        true
    }

    /// Delivers an EVENT to every handle of its topic.
    pub fn dispatch(&self, subscription_id: Id, event: SubscriptionEvent) -> bool {
        let Some(entry) = self
            .by_subscription
            .get(&subscription_id)
            .and_then(|key| self.topics.get(key))
        else {
            return false;
        };
        let _ = entry.events_tx.send(event);
        true
    }

    /// Drops every topic after the session is gone.
    pub fn clear(&mut self) {
        for (_, entry) in self.topics.drain() {
            let _ = entry.active_tx.send(false);
            for reply in entry.waiters {
                let _ = reply.send(Err(SubscriptionError::SessionClosed));
            }
            for closer in entry.closers {
                let _ = closer.send(Ok(()));
            }
        }
        self.by_subscription.clear();
        self.handles.clear();
    }

    fn grant(&mut self, key: &str, subscription_id: Id) -> Subscription {
        self.next_handle += 1;
        let handle_id = self.next_handle;
        self.handles.insert(
            handle_id,
            HandleEntry {
                key: key.to_string(),
                parent: None,
                children: Vec::new(),
            },
        );
        // Callers only grant for topics they just looked up.
        let (content, events, active) = match self.topics.get(key) {
            Some(entry) => (
                entry.content.clone(),
                entry.events_tx.subscribe(),
                entry.active_tx.subscribe(),
            ),
            None => {
                let (_, events) = broadcast::channel(1);
                let (_, active) = watch::channel(false);
                (ContentIdentifier::topic(key), events, active)
            }
        };
        Subscription {
            handle_id,
            content,
            session_id: self.session_id,
            subscription_id,
            events,
            active,
            release_tx: Some(self.release_tx.clone()),
        }
    }
}

#[cfg(test)]
impl SubscriptionRegistry {
    pub fn children(&self, handle_id: HandleId) -> Vec<HandleId> {
        self.handles
            .get(&handle_id)
            .map(|h| h.children.clone())
            .unwrap_or_default()
    }

    pub fn ref_count(&self, key: &str) -> usize {
        self.topics.get(key).map(|e| e.ref_count).unwrap_or(0)
    }

    pub fn is_active(&self, key: &str) -> bool {
        matches!(
            self.topics.get(key).map(|e| e.state),
            Some(TopicState::Active { .. })
        )
    }

    pub fn contains(&self, key: &str) -> bool {
        self.topics.contains_key(key)
    }
}
