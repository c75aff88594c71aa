//! Prelude module for convenient imports.
//!
//! ```rust,ignore
//! use wampsync_sdk::prelude::*;
//! ```

pub use crate::{
    ContentIdentifier, Dict, EntityStore, FeedMerger, HierarchicalBuilder, MergeError,
    MergedSportsView, MergerConfig, Payload, Session, SessionConfig, SessionState,
    SportsFeed, SportsSnapshot, Subscription, TicketAuthenticator, TransportConfig,
    WampSyncError,
};

pub use futures_util::StreamExt;
