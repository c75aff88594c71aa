use crate::builder::{build_sports, HierarchicalBuilder, SportBuilder};
use crate::content::{ContentIdentifier, ContentType};
use crate::entity::{AggregatorResponse, Entity, SportEntity};
use crate::error::SubscriptionError;
use crate::message::{Dict, Payload};
use crate::model::Sport;
use crate::session::Session;
use crate::store::{EntityStore, StoreOperation};
use crate::subscription::Subscription;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// Sports as one feed saw them at `version`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SportsSnapshot {
    pub version: u64,
    pub sports: Vec<Sport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedMode {
    /// Every emission carries all known sports.
    Snapshot,
    /// Every emission carries only the sports that message touched.
    Delta,
}

/// A sports topic decoded into snapshots.
///
/// Owns a private entity store fed by the initial dump and then by every
/// event on the subscription. Dropping the feed releases the subscription.
pub struct SportsFeed {
    subscription: Subscription,
    store: EntityStore,
    mode: FeedMode,
    initial: Option<SportsSnapshot>,
}

impl SportsFeed {
    /// Subscribes to `content` and, if it names one, fetches the initial dump.
    pub async fn open(
        session: &Session,
        content: ContentIdentifier,
    ) -> Result<Self, SubscriptionError> {
        let mode = match content.content_type {
            ContentType::LiveSports => FeedMode::Delta,
            ContentType::AllSports | ContentType::Custom => FeedMode::Snapshot,
        };
        let subscription = session.subscribe(content.clone()).await?;
        let mut feed = Self {
            subscription,
            store: EntityStore::new(),
            mode,
            initial: None,
        };

        if let Some(procedure) = &content.initial_dump {
            let mut kwargs = Dict::new();
            kwargs.insert("topic".to_string(), Value::String(content.topic.clone()));
            let result = session
                .call(procedure, Payload::with_kwargs(kwargs))
                .await
                .map_err(|e| SubscriptionError::SetupFailed {
                    topic: content.topic.clone(),
                    reason: format!("initial dump failed: {}", e),
                })?;
            feed.initial = feed.ingest(&result.payload);
        }

        tracing::info!("sports feed open on {}", content.topic);
        Ok(feed)
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Next snapshot, starting with the initial dump. `None` once the subscription ends.
    pub async fn next_snapshot(&mut self) -> Option<SportsSnapshot> {
        if let Some(snapshot) = self.initial.take() {
            return Some(snapshot);
        }
        loop {
            let event = self.subscription.next_event().await?;
            if let Some(snapshot) = self.ingest(&event.payload) {
                return Some(snapshot);
            }
        }
    }

    fn ingest(&mut self, payload: &Payload) -> Option<SportsSnapshot> {
        let response = match AggregatorResponse::from_payload(payload) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("{}: undecodable sports message: {}", self.subscription.topic(), e);
                return None;
            }
        };
        let applied = self.store.apply_response(&response);
        let sports = match self.mode {
            FeedMode::Snapshot => build_sports(&self.store),
            FeedMode::Delta => {
                let touched: HashSet<&str> = applied
                    .iter()
                    .filter(|u| u.raw_type == SportEntity::RAW_TYPE && u.operation != StoreOperation::Delete)
                    .map(|u| u.id.as_str())
                    .collect();
                self.store
                    .all::<SportEntity>()
                    .into_iter()
                    .filter(|sport| touched.contains(sport.id.as_str()))
                    .filter_map(|sport| SportBuilder::build(sport, &self.store))
                    .collect()
            }
        };
        Some(SportsSnapshot {
            version: response.version,
            sports,
        })
    }
}
