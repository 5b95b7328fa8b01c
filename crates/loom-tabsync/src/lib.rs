// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cross-tab session coordination for the Loom analytics SDK.
//!
//! Every tab a user has open for the same project agrees on one analytics
//! session. One tab is elected leader and is the only writer of the shared
//! session record; the others follow, report their activity, and take over
//! when the leader disappears.
//!
//! # Features
//!
//! - **Leader Election**: heartbeats, bounded election windows and
//!   earliest-start tie-breaks over a broadcast channel
//! - **Shared Session Record**: one canonical session per project, persisted
//!   in a key/value store shared by all tabs
//! - **Crash Recovery**: sessions of pages that died without tearing down
//!   are resumed a bounded number of times
//! - **Graceful Degradation**: storage or broadcast failures fall back to
//!   storage polling or tab-local state, never to errors
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use loom_tabsync::{BroadcastHub, MemoryStore, SessionClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryStore::new();
//!     let hub = BroadcastHub::new();
//!
//!     let client = SessionClient::builder()
//!         .project_id("proj_xxx")
//!         .store(Arc::new(store.clone()))
//!         .hub(hub.clone())
//!         .build()?;
//!
//!     client.init(&serde_json::json!({ "sessionTimeout": 1_800_000 }))?;
//!     client.start_driver().await?;
//!
//!     client.record_activity()?;
//!     println!("session: {:?}", client.session_id());
//!
//!     client.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod client;
mod clock;
mod coordinator;
mod election;
mod error;
mod lifecycle;
mod recovery;
mod registry;
mod runtime;
mod sink;
mod storage;
mod transport;
mod unload;

pub use client::{SessionClient, SessionClientBuilder};
pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use coordinator::{CoordinatorParts, TabCoordinator, TabPhase};
pub use election::LeaderElection;
pub use error::{Result, StorageError, TabSyncError, TransportError};
pub use lifecycle::{
	ActivityOutcome, CommitOutcome, SessionChange, SessionLifecycle, SyncOutcome,
};
pub use recovery::RecoveryManager;
pub use registry::TabRegistry;
pub use runtime::{SessionDriver, SharedCoordinator, DEFAULT_TICK_INTERVAL};
pub use sink::{EventSink, NoopSink, RecordingSink, SinkEvent};
pub use storage::{KeyValueStore, MemoryStore, SharedStorage};
pub use transport::{
	BroadcastChannel, BroadcastHub, NoopTransport, Transport, DEFAULT_CHANNEL_CAPACITY,
};
pub use unload::{TeardownSignal, UnloadCoordinator, VisibilityState};

// Re-export core types for convenience
pub use loom_tabsync_core::{
	ConfigError, CoordinationConfig, CoordinationMessage, EndReason, LeaderState, MessageBody,
	RecordError, RecoveryEntry, SessionId, SessionMetadata, SessionOptions, SessionRecord,
	SessionState, StorageKeys, TabId, TabRecord,
};
