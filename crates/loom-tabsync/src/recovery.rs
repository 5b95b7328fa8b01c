// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Crash recovery.
//!
//! While a session runs, the leader keeps a [`RecoveryEntry`] for it under
//! `tl:{project}:recovery`. A clean end removes the entry, so whatever is left
//! at startup belongs to a page life that died without tearing down. Such a
//! session is resumed at most a bounded number of times and never after the
//! maximum session age.

use loom_tabsync_core::{CoordinationConfig, RecoveryEntry, SessionId, SessionRecord};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::storage::SharedStorage;

/// Reads, resumes and maintains recovery entries.
#[derive(Debug, Clone)]
pub struct RecoveryManager {
	max_age_ms: i64,
	max_attempts: u32,
	max_entries: usize,
}

impl RecoveryManager {
	pub fn new(config: &CoordinationConfig) -> Self {
		Self {
			max_age_ms: config.max_session_timeout_ms(),
			max_attempts: config.max_recovery_attempts,
			max_entries: config.max_recovery_entries.max(1),
		}
	}

	/// Loads the entry list, dropping anything unreadable.
	pub fn load(&self, storage: &SharedStorage) -> Vec<RecoveryEntry> {
		let key = storage.keys().recovery();
		let Some(raw) = storage.get(&key) else {
			return Vec::new();
		};

		let values = match serde_json::from_str::<Vec<Value>>(&raw) {
			Ok(values) => values,
			Err(e) => {
				warn!(error = %e, "Discarding unreadable recovery list");
				storage.remove(&key);
				return Vec::new();
			}
		};

		let total = values.len();
		let entries: Vec<RecoveryEntry> = values
			.into_iter()
			.filter_map(|v| serde_json::from_value(v).ok())
			.collect();
		if entries.len() < total {
			warn!(
				discarded = total - entries.len(),
				"Discarding corrupt recovery entries"
			);
		}
		entries
	}

	fn save(&self, storage: &SharedStorage, entries: &[RecoveryEntry]) -> bool {
		let key = storage.keys().recovery();
		if entries.is_empty() {
			storage.remove(&key)
		} else {
			storage.set_json(&key, &entries)
		}
	}

	/// Resumes the newest eligible entry, if any.
	///
	/// Only the resumed entry is kept; older sessions can never be resumed
	/// once a newer one has been. The resumed session keeps its id and start
	/// time, has `last_activity = now` and one more recovery attempt.
	pub fn recover(&self, storage: &SharedStorage, now: i64) -> Option<SessionRecord> {
		let entries = self.load(storage);
		if entries.is_empty() {
			return None;
		}

		let total = entries.len();
		let mut eligible: Vec<RecoveryEntry> = entries
			.into_iter()
			.filter(|e| e.is_eligible(now, self.max_age_ms, self.max_attempts))
			.collect();
		if eligible.len() < total {
			info!(
				discarded = total - eligible.len(),
				"Discarded expired or exhausted recovery entries"
			);
		}
		eligible.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

		let Some(newest) = eligible.first().cloned() else {
			self.save(storage, &[]);
			return None;
		};

		let mut record = newest.context;
		record.last_activity = now.max(record.start_time);
		record.last_heartbeat = now;
		record.recovery_attempts = newest.attempt.saturating_add(1);
		record.tab_count = 1;
		record.leader_tab_id = None;
		record.bump_version();

		if eligible.len() > 1 {
			debug!(
				discarded = eligible.len() - 1,
				"Discarded recovery entries older than the resumed session"
			);
		}
		self.save(storage, &[RecoveryEntry::new(record.clone(), now)]);

		info!(
			session_id = %record.session_id,
			attempt = record.recovery_attempts,
			"Recovered session"
		);
		Some(record)
	}

	/// Stores a fresh snapshot of `record`, newest first.
	pub fn refresh(&self, storage: &SharedStorage, record: &SessionRecord, now: i64) -> bool {
		let mut entries = self.load(storage);
		entries.retain(|e| e.session_id != record.session_id);
		entries.insert(0, RecoveryEntry::new(record.clone(), now));
		entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
		entries.truncate(self.max_entries);
		self.save(storage, &entries)
	}

	/// Drops the entry of a cleanly ended session.
	pub fn remove(&self, storage: &SharedStorage, session_id: SessionId) {
		let mut entries = self.load(storage);
		let before = entries.len();
		entries.retain(|e| e.session_id != session_id);
		if entries.len() != before {
			self.save(storage, &entries);
			debug!(session_id = %session_id, "Removed recovery entry");
		}
	}
}
