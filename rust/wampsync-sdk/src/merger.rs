//! Merges the mandatory all-sports baseline with the optional live delta.

use crate::config::MergerConfig;
use crate::content::ContentIdentifier;
use crate::error::MergeError;
use crate::feed::{SportsFeed, SportsSnapshot};
use crate::model::Sport;
use crate::session::Session;
use futures_util::Stream;
use pin_project_lite::pin_project;
use serde::Serialize;
use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedSportsView {
    pub version: u64,
    pub sports: Vec<Sport>,
}

#[derive(Debug, Clone)]
struct LiveOverlay {
    version: u64,
    sport: Sport,
}

/// Merge bookkeeping without any I/O.
///
/// The baseline decides which sports exist and in what order; live deltas
/// only replace the live counters of sports already present. The view's
/// version never decreases.
#[derive(Debug, Default)]
pub struct MergeState {
    baseline_version: Option<u64>,
    overlays: HashMap<String, LiveOverlay>,
    view: Option<MergedSportsView>,
}

impl MergeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> Option<&MergedSportsView> {
        self.view.as_ref()
    }

    pub fn apply_baseline(
        &mut self,
        snapshot: SportsSnapshot,
    ) -> Result<&MergedSportsView, MergeError> {
        let current = self.view.as_ref().map(|v| v.version);
        if let Some(current) = current {
            if snapshot.version < current {
                return Err(MergeError::StaleVersion {
                    current,
                    received: snapshot.version,
                });
            }
        }

        self.overlays.retain(|_, o| o.version >= snapshot.version);
        let mut version = snapshot.version;
        let mut sports = snapshot.sports;
        for sport in &mut sports {
            if let Some(overlay) = self.overlays.get(&sport.id) {
                sport.apply_live(&overlay.sport);
                version = version.max(overlay.version);
            }
        }

        self.baseline_version = Some(snapshot.version);
        Ok(&*self.view.insert(MergedSportsView { version, sports }))
    }

    /// Applies a live delta. Returns the new view when it changed.
    pub fn apply_live(&mut self, delta: SportsSnapshot) -> Option<&MergedSportsView> {
        let mut changed = false;
        for sport in delta.sports {
            if let Some(applied) = self.applied_version(&sport.id) {
                if delta.version < applied {
                    tracing::debug!(
                        "discarding live update v{} for sport {}, already at v{}",
                        delta.version,
                        sport.id,
                        applied
                    );
                    continue;
                }
            }
            if let Some(view) = self.view.as_mut() {
                if let Some(entry) = view.sports.iter_mut().find(|s| s.id == sport.id) {
                    entry.apply_live(&sport);
                    changed = true;
                }
            }
            self.overlays.insert(
                sport.id.clone(),
                LiveOverlay {
                    version: delta.version,
                    sport,
                },
            );
        }

        if !changed {
            return None;
        }
        let view = self.view.as_mut()?;
        view.version = view.version.max(delta.version);
        Some(&*view)
    }

    fn applied_version(&self, sport_id: &str) -> Option<u64> {
        self.overlays
            .get(sport_id)
            .map(|o| o.version)
            .or(self.baseline_version)
    }
}

pin_project! {
    /// Merged views in order. Ends after the first error.
    pub struct MergedSportsStream {
        #[pin]
        inner: ReceiverStream<Result<MergedSportsView, MergeError>>,
    }
}

impl Stream for MergedSportsStream {
    type Item = Result<MergedSportsView, MergeError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

pub struct FeedMerger;

impl FeedMerger {
    /// Opens both feeds on `session` and merges them in a background task.
    ///
    /// If the baseline cannot be opened the stream yields
    /// `MandatoryFeedUnavailable` and ends. A live feed that fails or closes
    /// only leaves the baseline running on its own. Dropping the stream stops
    /// the task and releases both subscriptions.
    pub fn spawn(
        session: Session,
        baseline: ContentIdentifier,
        live: Option<ContentIdentifier>,
        config: MergerConfig,
    ) -> MergedSportsStream {
        let (tx, rx) = mpsc::channel(config.output_buffer.max(1));
        tokio::spawn(run_merger(session, baseline, live, tx));
        MergedSportsStream {
            inner: ReceiverStream::new(rx),
        }
    }
}

type Output = mpsc::Sender<Result<MergedSportsView, MergeError>>;

async fn run_merger(
    session: Session,
    baseline: ContentIdentifier,
    live: Option<ContentIdentifier>,
    tx: Output,
) {
    let baseline_topic = baseline.topic.clone();
    let mut baseline_feed = match SportsFeed::open(&session, baseline).await {
        Ok(feed) => feed,
        Err(e) => {
            tracing::error!("baseline feed {} unavailable: {}", baseline_topic, e);
            let _ = tx
                .send(Err(MergeError::MandatoryFeedUnavailable(e.to_string())))
                .await;
            return;
        }
    };

    let mut live_feed = match live {
        Some(content) => {
            let topic = content.topic.clone();
            match SportsFeed::open(&session, content).await {
                Ok(feed) => {
                    session.associate(baseline_feed.subscription(), feed.subscription());
                    Some(feed)
                }
                Err(e) => {
                    tracing::warn!("live feed {} unavailable, merging baseline only: {}", topic, e);
                    None
                }
            }
        }
        None => None,
    };

    let mut state = MergeState::new();
    loop {
        tokio::select! {
            snapshot = baseline_feed.next_snapshot() => match snapshot {
                Some(snapshot) => match state.apply_baseline(snapshot) {
                    Ok(view) => {
                        if tx.send(Ok(view.clone())).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => tracing::warn!("ignoring baseline snapshot: {}", e),
                },
                None => {
                    tracing::error!("baseline feed {} closed", baseline_topic);
                    let _ = tx
                        .send(Err(MergeError::MandatoryFeedUnavailable(format!(
                            "{} closed",
                            baseline_topic
                        ))))
                        .await;
                    return;
                }
            },
            delta = next_live(&mut live_feed) => match delta {
                Some(delta) => {
                    if let Some(view) = state.apply_live(delta) {
                        if tx.send(Ok(view.clone())).await.is_err() {
                            return;
                        }
                    }
                }
                None => {
                    tracing::warn!("live feed closed, merging baseline only");
                    live_feed = None;
                }
            },
            _ = tx.closed() => {
                tracing::debug!("merged stream dropped, stopping merger");
                return;
            }
        }
    }
}

async fn next_live(feed: &mut Option<SportsFeed>) -> Option<SportsSnapshot> {
    match feed {
        Some(feed) => feed.next_snapshot().await,
        None => std::future::pending().await,
    }
}
