//! Client-side telemetry channel subsystem.
//!
//! Buffers application log records into batches, flushes them to an
//! ingestion transport on a size/time schedule gated by an auth-token
//! timeline, and fans lifecycle events out to registered delegates. See
//! [`group::ChannelGroup`] and [`group::ChannelUnit`] for the public entry
//! points.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use telemetry_channel::auth::SharedAuthTokenContext;
//! use telemetry_channel::config::GroupConfig;
//! use telemetry_channel::group::ChannelGroup;
//! use telemetry_channel::ingestion::{shared, HttpIngestionClient};
//! use telemetry_channel::record::Log;
//! use telemetry_channel::store::InMemoryLogStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store: Arc<dyn telemetry_channel::LogStore> = Arc::new(InMemoryLogStore::new());
//!     let ingestion = shared(HttpIngestionClient::new("https://example.com/ingest"));
//!     let auth = Arc::new(SharedAuthTokenContext::new());
//!
//!     let group = ChannelGroup::builder(store, ingestion, auth).build();
//!     let unit = group.attach(GroupConfig::builder("events").build().unwrap());
//!     unit.enqueue(Log::new(bytes::Bytes::from_static(b"payload")), Default::default());
//! }
//! ```

pub mod auth;
pub mod config;
pub mod delegate;
pub mod error;
pub mod group;
pub mod ingestion;
pub mod pause;
pub mod record;
pub mod retry;
pub mod store;
mod unit;

pub use auth::{AuthTokenContext, AuthTokenWindow, SharedAuthTokenContext, StaticAuthTokenContext};
pub use config::{GroupConfig, GroupConfigBuilder, Priority};
pub use delegate::{Delegate, DelegateHandle};
pub use error::{ConfigError, DeliveryError, IngestionError, StoreError};
pub use group::{ChannelGroup, ChannelGroupBuilder, ChannelUnit};
pub use ingestion::{shared, HttpIngestionClient, IngestionClient, IngestionEvent};
pub use pause::{ingestion_pause_id, PauseId};
pub use record::{Device, Flags, Log};
pub use store::{InMemoryLogStore, LogStore};
pub use unit::{UnitLifecycle, UnitSnapshot};
