// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for Loom cross-tab session coordination.
//!
//! This crate holds the data model shared by every tab of a project: the
//! session and tab records persisted in shared storage, the recovery
//! snapshots, the broadcast message set, the storage key scheme and the
//! configuration bounds. It performs no I/O; the runtime lives in
//! `loom-tabsync`.

pub mod config;
pub mod error;
pub mod ids;
pub mod keys;
pub mod message;
pub mod record;
pub mod state;

pub use config::{
	duration_ms, validate_session_timeout, CoordinationConfig, SessionOptions,
	DEFAULT_SESSION_TIMEOUT_MS, MAX_SESSION_TIMEOUT_MS, MIN_SESSION_TIMEOUT_MS,
};
pub use error::{ConfigError, RecordError};
pub use ids::{SessionId, TabId};
pub use keys::{StorageKeys, KEY_NAMESPACE};
pub use message::{CoordinationMessage, MessageBody};
pub use record::{claim_precedes, RecoveryEntry, SessionMetadata, SessionRecord, TabRecord};
pub use state::{EndReason, LeaderState, SessionState};
