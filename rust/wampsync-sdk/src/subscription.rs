use crate::content::ContentIdentifier;
use crate::message::{Dict, Id, Payload};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

pub type HandleId = u64;

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionEvent {
    pub publication_id: Id,
    pub details: Dict,
    pub payload: Payload,
}

/// One holder's share of a topic subscription.
///
/// Handles for the same topic share a single router subscription. Dropping a
/// handle releases its share; the last release sends UNSUBSCRIBE.
#[derive(Debug)]
pub struct Subscription {
    pub(crate) handle_id: HandleId,
    pub(crate) content: ContentIdentifier,
    pub(crate) session_id: Id,
    pub(crate) subscription_id: Id,
    pub(crate) events: broadcast::Receiver<SubscriptionEvent>,
    pub(crate) active: watch::Receiver<bool>,
    pub(crate) release_tx: Option<mpsc::UnboundedSender<HandleId>>,
}

impl Subscription {
    pub fn id(&self) -> HandleId {
        self.handle_id
    }

    pub fn content(&self) -> &ContentIdentifier {
        &self.content
    }

    pub fn topic(&self) -> &str {
        &self.content.topic
    }

    /// Session that acknowledged the subscription.
    pub fn session_id(&self) -> Id {
        self.session_id
    }

    pub fn subscription_id(&self) -> Id {
        self.subscription_id
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    pub fn active_changes(&self) -> watch::Receiver<bool> {
        self.active.clone()
    }

    /// Waits for the next event. Returns `None` once the topic is torn down.
    pub async fn next_event(&mut self) -> Option<SubscriptionEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        "subscription {} lagged, skipped {} events",
                        self.content.topic,
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Independent stream of this topic's events from now on.
    pub fn events(&self) -> impl Stream<Item = SubscriptionEvent> {
        BroadcastStream::new(self.events.resubscribe()).filter_map(
            |item: Result<SubscriptionEvent, BroadcastStreamRecvError>| item.ok(),
        )
    }

    /// Disarms the drop-time release so an explicit unsubscribe owns it.
    pub(crate) fn disarm(&mut self) {
        self.release_tx = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(tx) = self.release_tx.take() {
            let _ = tx.send(self.handle_id);
        }
    }
}
