// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the tab sync SDK.

use loom_tabsync_core::{ConfigError, RecordError};
use thiserror::Error;

/// Result type alias for tab sync operations.
pub type Result<T> = std::result::Result<T, TabSyncError>;

/// Errors surfaced to the host.
///
/// Only configuration problems and API misuse reach the caller; storage and
/// transport failures are absorbed by degrading to tab-local coordination.
#[derive(Debug, Error)]
pub enum TabSyncError {
	/// Invalid configuration; the SDK does not start.
	#[error("invalid configuration: {0}")]
	Config(#[from] ConfigError),

	/// An operation needs `init` to have succeeded first.
	#[error("session coordination is not initialized")]
	NotInitialized,

	/// `init` was called twice.
	#[error("session coordination is already initialized")]
	AlreadyInitialized,

	/// A record or message failed validation.
	#[error("record error: {0}")]
	Record(#[from] RecordError),
}

/// Failure of the underlying key/value store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
	/// The write would exceed the store's quota.
	#[error("storage quota exceeded ({used} of {quota} bytes)")]
	QuotaExceeded { used: usize, quota: usize },

	/// Storage is disabled or inaccessible.
	#[error("storage is unavailable")]
	Unavailable,
}

/// Failure of the broadcast primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
	/// The channel was closed by this tab.
	#[error("broadcast channel is closed")]
	Closed,

	/// The message could not be serialized.
	#[error("failed to encode message: {0}")]
	Encode(String),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_config_error_message_is_preserved() {
		let err: TabSyncError = ConfigError::SessionTimeoutOutOfRange {
			value: 15000.0,
			min: 30_000,
			max: 86_400_000,
		}
		.into();
		assert!(err.to_string().contains("sessionTimeout"));
	}

	#[test]
	fn test_quota_error_display() {
		let err = StorageError::QuotaExceeded { used: 10, quota: 8 };
		assert_eq!(err.to_string(), "storage quota exceeded (10 of 8 bytes)");
	}
}
