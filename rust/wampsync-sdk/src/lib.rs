//! # wampsync-sdk
//!
//! WAMP v2 client over WebSocket, plus a synchronization layer that keeps a
//! normalized sports catalogue up to date from aggregator feeds.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wampsync_sdk::prelude::*;
//!
//! let session = Session::connect_websocket(
//!     TransportConfig::new("wss://router.example.com/v2"),
//!     SessionConfig::new("www.example.com"),
//!     None,
//! );
//! session.established().await?;
//!
//! let mut merged = FeedMerger::spawn(
//!     session.clone(),
//!     ContentIdentifier::all_sports("4093", "en"),
//!     Some(ContentIdentifier::live_sports("4093", "en")),
//!     MergerConfig::default(),
//! );
//! while let Some(view) = merged.next().await {
//!     let view = view?;
//!     println!("v{}: {} sports", view.version, view.sports.len());
//! }
//! ```
//!
//! ## Layers
//!
//! - **Session** - handshake, request correlation, ref-counted subscriptions, RPC
//! - **Store** - flat entities keyed by type and id
//! - **Builders** - resolve flat entities into nested models
//! - **Merger** - baseline snapshot plus live deltas with a monotonic version

pub mod builder;
mod config;
mod connection;
mod content;
pub mod correlation;
pub mod entity;
mod error;
mod feed;
mod machine;
mod merger;
mod message;
pub mod model;
pub mod prelude;
mod registry;
mod rpc;
mod session;
mod store;
mod subscription;
pub mod transport;

pub use builder::{build_sports, BuildContext, HierarchicalBuilder};
pub use config::{
    MergerConfig, ReconnectPolicy, SessionConfig, TransportConfig, DEFAULT_AGENT, SUBPROTOCOL,
};
pub use content::{ContentIdentifier, ContentType, INITIAL_DUMP_PROCEDURE};
pub use entity::{AggregatorResponse, ChangeRecord, ChangeType, Entity, EntityRecord};
pub use error::{
    DecodeError, MergeError, ProtocolError, RequestError, SubscriptionError, TransportError,
    WampSyncError,
};
pub use feed::{SportsFeed, SportsSnapshot};
pub use machine::{Authenticator, SessionMachine, SessionState, TicketAuthenticator};
pub use merger::{FeedMerger, MergeState, MergedSportsStream, MergedSportsView};
pub use message::{parse_frame, Dict, Id, MessageType, Payload, WampMessage};
pub use rpc::{CallResult, Invocation, Registration, ERROR_CANCELED};
pub use session::Session;
pub use store::{EntityStore, StoreOperation, StoreUpdate};
pub use subscription::{HandleId, Subscription, SubscriptionEvent};
pub use transport::{Transport, TransportEvent, WebSocketTransport};

pub use serde_json::Value;
