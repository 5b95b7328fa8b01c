// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared storage layer.
//!
//! [`KeyValueStore`] is the raw, synchronous, non-transactional store every
//! tab of a browser profile can see. [`SharedStorage`] is the project-scoped
//! view the rest of the crate uses: it adds JSON (de)serialization and turns
//! every failure into "absent" or `false` plus a warning, so storage problems
//! never abort session logic.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use loom_tabsync_core::StorageKeys;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::StorageError;

/// A synchronous key/value store shared between tabs.
///
/// Offers no atomicity beyond single-key writes.
pub trait KeyValueStore: Send + Sync {
	fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
	fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
	fn remove(&self, key: &str) -> Result<(), StorageError>;
	fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// In-memory [`KeyValueStore`]. Clones share the same entries.
///
/// Supports an optional byte quota (keys plus values) and a disabled switch,
/// matching the ways browser storage fails in practice.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
	inner: Arc<MemoryStoreInner>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
	entries: Mutex<BTreeMap<String, String>>,
	quota_bytes: Mutex<Option<usize>>,
	disabled: AtomicBool,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Creates a store that rejects writes once `quota_bytes` would be exceeded.
	pub fn with_quota(quota_bytes: usize) -> Self {
		let store = Self::default();
		store.set_quota(Some(quota_bytes));
		store
	}

	pub fn set_quota(&self, quota_bytes: Option<usize>) {
		*self.inner.quota_bytes.lock() = quota_bytes;
	}

	/// While disabled every operation fails with [`StorageError::Unavailable`].
	pub fn set_disabled(&self, disabled: bool) {
		self.inner.disabled.store(disabled, Ordering::SeqCst);
	}

	pub fn len(&self) -> usize {
		self.inner.entries.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.entries.lock().is_empty()
	}

	fn check_enabled(&self) -> Result<(), StorageError> {
		if self.inner.disabled.load(Ordering::SeqCst) {
			Err(StorageError::Unavailable)
		} else {
			Ok(())
		}
	}
}

impl KeyValueStore for MemoryStore {
	fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
		self.check_enabled()?;
		Ok(self.inner.entries.lock().get(key).cloned())
	}

	fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
		self.check_enabled()?;
		let mut entries = self.inner.entries.lock();

		if let Some(quota) = *self.inner.quota_bytes.lock() {
			let others: usize = entries
				.iter()
				.filter(|(k, _)| k.as_str() != key)
				.map(|(k, v)| k.len() + v.len())
				.sum();
			let used = others + key.len() + value.len();
			if used > quota {
				return Err(StorageError::QuotaExceeded { used, quota });
			}
		}

		entries.insert(key.to_string(), value.to_string());
		Ok(())
	}

	fn remove(&self, key: &str) -> Result<(), StorageError> {
		self.check_enabled()?;
		self.inner.entries.lock().remove(key);
		Ok(())
	}

	fn keys(&self) -> Result<Vec<String>, StorageError> {
		self.check_enabled()?;
		Ok(self.inner.entries.lock().keys().cloned().collect())
	}
}

/// Project-scoped, failure-absorbing view over a [`KeyValueStore`].
pub struct SharedStorage {
	store: Arc<dyn KeyValueStore>,
	keys: StorageKeys,
	degraded: AtomicBool,
}

impl SharedStorage {
	pub fn new(store: Arc<dyn KeyValueStore>, keys: StorageKeys) -> Self {
		Self {
			store,
			keys,
			degraded: AtomicBool::new(false),
		}
	}

	pub fn keys(&self) -> &StorageKeys {
		&self.keys
	}

	/// True when the most recent storage operation failed.
	pub fn is_degraded(&self) -> bool {
		self.degraded.load(Ordering::SeqCst)
	}

	/// Reads a value, keeping "absent" apart from "store unreadable".
	pub fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
		let result = self.store.get(key);
		if let Err(e) = &result {
			warn!(key, error = %e, "Storage read failed");
		}
		self.degraded.store(result.is_err(), Ordering::SeqCst);
		result
	}

	/// Reads a value; an unreadable store reads as absent.
	pub fn get(&self, key: &str) -> Option<String> {
		self.read(key).ok().flatten()
	}

	/// Writes a value, returning false (never an error) on failure.
	pub fn set(&self, key: &str, value: &str) -> bool {
		let ok = match self.store.set(key, value) {
			Ok(()) => true,
			Err(e) => {
				warn!(key, error = %e, "Storage write failed, continuing with tab-local state");
				false
			}
		};
		self.degraded.store(!ok, Ordering::SeqCst);
		ok
	}

	pub fn remove(&self, key: &str) -> bool {
		let ok = match self.store.remove(key) {
			Ok(()) => true,
			Err(e) => {
				warn!(key, error = %e, "Storage removal failed");
				false
			}
		};
		self.degraded.store(!ok, Ordering::SeqCst);
		ok
	}

	/// Returns every `(key, value)` whose key starts with `prefix`.
	///
	/// Only prefixes inside this project's namespace are scanned.
	pub fn scan_by_prefix(&self, prefix: &str) -> Vec<(String, String)> {
		if !prefix.starts_with(self.keys.prefix()) {
			warn!(prefix, namespace = %self.keys.prefix(), "Refusing to scan outside the project namespace");
			return Vec::new();
		}

		let keys = match self.store.keys() {
			Ok(keys) => keys,
			Err(e) => {
				warn!(prefix, error = %e, "Storage scan failed");
				return Vec::new();
			}
		};

		keys
			.into_iter()
			.filter(|k| k.starts_with(prefix))
			.filter_map(|k| self.get(&k).map(|v| (k, v)))
			.collect()
	}

	/// Reads and parses a JSON value. Unparsable data reads as absent.
	pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
		let raw = self.get(key)?;
		match serde_json::from_str(&raw) {
			Ok(value) => Some(value),
			Err(e) => {
				warn!(key, error = %e, "Ignoring unparsable stored value");
				None
			}
		}
	}

	/// Like [`SharedStorage::get_json`], but fails when the store itself is
	/// unreadable. Unparsable data still reads as absent.
	pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
		let Some(raw) = self.read(key)? else {
			return Ok(None);
		};
		match serde_json::from_str(&raw) {
			Ok(value) => Ok(Some(value)),
			Err(e) => {
				warn!(key, error = %e, "Ignoring unparsable stored value");
				Ok(None)
			}
		}
	}

	pub fn set_json<T: Serialize>(&self, key: &str, value: &T) -> bool {
		match serde_json::to_string(value) {
			Ok(raw) => self.set(key, &raw),
			Err(e) => {
				debug!(key, error = %e, "Failed to serialize value for storage");
				false
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde::Deserialize;

	#[derive(Debug, PartialEq, Serialize, Deserialize)]
	struct Sample {
		name: String,
		count: u32,
	}

	fn storage(store: &MemoryStore) -> SharedStorage {
		SharedStorage::new(
			Arc::new(store.clone()),
			StorageKeys::new("proj").unwrap(),
		)
	}

	#[test]
	fn test_json_roundtrip() {
		let store = MemoryStore::new();
		let storage = storage(&store);
		let sample = Sample {
			name: "a".to_string(),
			count: 2,
		};

		assert!(storage.set_json("tl:proj:sample", &sample));
		assert_eq!(storage.get_json::<Sample>("tl:proj:sample"), Some(sample));
	}

	#[test]
	fn test_corrupt_json_reads_as_absent() {
		let store = MemoryStore::new();
		store.set("tl:proj:sample", "{not json").unwrap();
		let storage = storage(&store);

		assert_eq!(storage.get_json::<Sample>("tl:proj:sample"), None);
	}

	#[test]
	fn test_quota_failure_returns_false() {
		let store = MemoryStore::with_quota(32);
		let storage = storage(&store);

		assert!(storage.set("tl:proj:a", "1"));
		assert!(!storage.is_degraded());
		assert!(!storage.set("tl:proj:b", &"x".repeat(64)));
		assert!(storage.is_degraded());
		assert_eq!(storage.get("tl:proj:b"), None);
	}

	#[test]
	fn test_quota_counts_replaced_value_once() {
		let store = MemoryStore::with_quota(20);
		assert!(store.set("k", "0123456789").is_ok());
		assert!(store.set("k", "9876543210").is_ok());
	}

	#[test]
	fn test_disabled_store_never_panics() {
		let store = MemoryStore::new();
		let storage = storage(&store);
		store.set_disabled(true);

		assert!(!storage.set("tl:proj:a", "1"));
		assert_eq!(storage.get("tl:proj:a"), None);
		assert!(!storage.remove("tl:proj:a"));
		assert!(storage.scan_by_prefix("tl:proj:").is_empty());
	}

	#[test]
	fn test_failed_read_is_not_absent() {
		let store = MemoryStore::new();
		let storage = storage(&store);
		storage.set_json("tl:proj:sample", &Sample { name: "a".to_string(), count: 1 });

		store.set_disabled(true);
		assert_eq!(storage.read("tl:proj:sample"), Err(StorageError::Unavailable));
		assert!(storage.read_json::<Sample>("tl:proj:sample").is_err());
		assert!(storage.is_degraded());

		store.set_disabled(false);
		assert_eq!(storage.read("tl:proj:missing"), Ok(None));
		assert!(!storage.is_degraded());
		assert!(storage.read_json::<Sample>("tl:proj:sample").unwrap().is_some());
	}

	#[test]
	fn test_scan_by_prefix() {
		let store = MemoryStore::new();
		let storage = storage(&store);
		storage.set("tl:proj:tab:1:info", "a");
		storage.set("tl:proj:tab:2:info", "b");
		storage.set("tl:proj:recovery", "c");
		storage.set("tl:other:tab:3:info", "d");

		let found = storage.scan_by_prefix("tl:proj:tab:");
		assert_eq!(found.len(), 2);
		assert!(found.iter().all(|(k, _)| k.starts_with("tl:proj:tab:")));
	}

	#[test]
	fn test_scan_outside_namespace_is_refused() {
		let store = MemoryStore::new();
		let storage = storage(&store);
		storage.set("tl:proj:a", "1");
		store.set("tl:other:a", "2").unwrap();

		assert!(storage.scan_by_prefix("tl:").is_empty());
		assert!(storage.scan_by_prefix("tl:other:").is_empty());
	}

	#[test]
	fn test_clones_share_entries() {
		let store = MemoryStore::new();
		let other = store.clone();
		store.set("k", "v").unwrap();
		assert_eq!(other.get("k").unwrap(), Some("v".to_string()));
		assert_eq!(other.len(), 1);
	}
}
