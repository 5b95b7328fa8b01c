// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Records persisted in shared storage.
//!
//! All timestamps are milliseconds since the Unix epoch, the unit every tab
//! agrees on. Field names serialize in camelCase so records written by other
//! SDK builds remain readable.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RecordError;
use crate::ids::{SessionId, TabId};

/// Informational context captured when a session starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_agent: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub page_url: Option<String>,
}

/// The canonical session shared by every tab of a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
	pub session_id: SessionId,
	pub start_time: i64,
	pub last_activity: i64,
	pub last_heartbeat: i64,
	#[serde(default)]
	pub tab_count: u32,
	#[serde(default)]
	pub recovery_attempts: u32,
	#[serde(default)]
	pub metadata: SessionMetadata,
	/// Tab that currently owns authoritative writes.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub leader_tab_id: Option<TabId>,
	/// Bumped on every authoritative write.
	#[serde(default)]
	pub version: u64,
}

impl SessionRecord {
	/// Creates a record for a brand-new session starting at `start_time`.
	pub fn new(start_time: i64, metadata: SessionMetadata) -> Self {
		Self {
			session_id: SessionId::new(),
			start_time,
			last_activity: start_time,
			last_heartbeat: start_time,
			tab_count: 1,
			recovery_attempts: 0,
			metadata,
			leader_tab_id: None,
			version: 1,
		}
	}

	/// Checks the record invariants.
	pub fn validate(&self) -> Result<(), RecordError> {
		if self.start_time <= 0 {
			return Err(RecordError::InvalidRecord(format!(
				"session {} has non-positive startTime {}",
				self.session_id, self.start_time
			)));
		}
		if self.last_activity < self.start_time {
			return Err(RecordError::InvalidRecord(format!(
				"session {} has lastActivity {} before startTime {}",
				self.session_id, self.last_activity, self.start_time
			)));
		}
		Ok(())
	}

	/// True when the session saw no activity for longer than `timeout_ms`.
	pub fn is_expired(&self, now: i64, timeout_ms: i64) -> bool {
		now.saturating_sub(self.last_activity) > timeout_ms
	}

	/// True when the record is well-formed and not expired.
	pub fn is_valid(&self, now: i64, timeout_ms: i64) -> bool {
		self.validate().is_ok() && !self.is_expired(now, timeout_ms)
	}

	/// Extends `last_activity` to `at`, never moving it backwards.
	///
	/// Returns true if the record changed.
	pub fn touch(&mut self, at: i64) -> bool {
		if at > self.last_activity {
			self.last_activity = at;
			true
		} else {
			false
		}
	}

	/// Marks an authoritative write.
	pub fn bump_version(&mut self) {
		self.version = self.version.saturating_add(1);
	}

	pub fn duration_ms(&self) -> i64 {
		self.last_activity.saturating_sub(self.start_time)
	}

	pub fn started_at(&self) -> Option<DateTime<Utc>> {
		Utc.timestamp_millis_opt(self.start_time).single()
	}
}

/// One open tab, as advertised in shared storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabRecord {
	pub id: TabId,
	pub is_leader: bool,
	pub start_time: i64,
	pub last_heartbeat: i64,
	/// Latest activity observed by this tab.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_activity: Option<i64>,
}

impl TabRecord {
	pub fn new(id: TabId, now: i64) -> Self {
		Self {
			id,
			is_leader: false,
			start_time: now,
			last_heartbeat: now,
			last_activity: None,
		}
	}

	/// True when the tab has not heartbeated within `stale_after_ms`.
	pub fn is_stale(&self, now: i64, stale_after_ms: i64) -> bool {
		now.saturating_sub(self.last_heartbeat) > stale_after_ms
	}

	/// Leadership precedence: the earlier `start_time` wins, ties go to the
	/// smaller tab id.
	pub fn precedes(&self, other: &TabRecord) -> bool {
		claim_precedes((self.start_time, self.id), (other.start_time, other.id))
	}
}

/// Compares two leadership claims given as `(start_time, tab_id)`.
pub fn claim_precedes(a: (i64, TabId), b: (i64, TabId)) -> bool {
	a < b
}

/// Snapshot of a session left behind for crash recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryEntry {
	pub session_id: SessionId,
	/// When the snapshot was queued.
	pub timestamp: i64,
	#[serde(default)]
	pub attempt: u32,
	pub context: SessionRecord,
}

impl RecoveryEntry {
	pub fn new(context: SessionRecord, now: i64) -> Self {
		Self {
			session_id: context.session_id,
			timestamp: now,
			attempt: context.recovery_attempts,
			context,
		}
	}

	pub fn age_ms(&self, now: i64) -> i64 {
		now.saturating_sub(self.timestamp)
	}

	/// An entry may be resumed only while it is younger than `max_age_ms`
	/// and has not used up its attempts.
	pub fn is_eligible(&self, now: i64, max_age_ms: i64, max_attempts: u32) -> bool {
		self.age_ms(now) <= max_age_ms
			&& self.attempt < max_attempts
			&& self.context.session_id == self.session_id
			&& self.context.validate().is_ok()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	const NOW: i64 = 1_700_000_000_000;

	#[test]
	fn test_new_session_record_invariants() {
		let record = SessionRecord::new(NOW, SessionMetadata::default());
		assert_eq!(record.start_time, NOW);
		assert_eq!(record.last_activity, NOW);
		assert!(record.validate().is_ok());
		assert!(record.session_id.to_string().len() >= 36);
	}

	#[test]
	fn test_touch_is_monotonic() {
		let mut record = SessionRecord::new(NOW, SessionMetadata::default());
		assert!(record.touch(NOW + 10));
		assert!(!record.touch(NOW + 5));
		assert_eq!(record.last_activity, NOW + 10);
	}

	#[test]
	fn test_expiry_boundary() {
		let record = SessionRecord::new(NOW, SessionMetadata::default());
		assert!(!record.is_expired(NOW + 30_000, 30_000));
		assert!(record.is_expired(NOW + 30_001, 30_000));
	}

	#[test]
	fn test_validate_rejects_activity_before_start() {
		let mut record = SessionRecord::new(NOW, SessionMetadata::default());
		record.last_activity = NOW - 1;
		assert!(record.validate().is_err());
	}

	#[test]
	fn test_session_record_json_is_camel_case() {
		let record = SessionRecord::new(NOW, SessionMetadata::default());
		let value = serde_json::to_value(&record).unwrap();
		assert!(value.get("sessionId").is_some());
		assert!(value.get("lastActivity").is_some());
		assert!(value.get("tabCount").is_some());
		assert!(value.get("recoveryAttempts").is_some());
	}

	#[test]
	fn test_session_record_tolerates_missing_optional_fields() {
		let id = SessionId::new();
		let json = format!(
			r#"{{"sessionId":"{id}","startTime":{NOW},"lastActivity":{NOW},"lastHeartbeat":{NOW}}}"#
		);
		let record: SessionRecord = serde_json::from_str(&json).unwrap();
		assert_eq!(record.tab_count, 0);
		assert_eq!(record.version, 0);
		assert!(record.leader_tab_id.is_none());
	}

	#[test]
	fn test_tab_precedence_prefers_earlier_start() {
		let a = TabRecord::new(TabId::new(), NOW);
		let b = TabRecord::new(TabId::new(), NOW + 1);
		assert!(a.precedes(&b));
		assert!(!b.precedes(&a));
	}

	#[test]
	fn test_tab_precedence_tie_breaks_on_id() {
		let a = TabRecord::new(TabId::new(), NOW);
		let b = TabRecord::new(TabId::new(), NOW);
		assert_ne!(a.precedes(&b), b.precedes(&a));
	}

	#[test]
	fn test_recovery_entry_eligibility() {
		let record = SessionRecord::new(NOW, SessionMetadata::default());
		let entry = RecoveryEntry::new(record, NOW);
		let day = 86_400_000;

		assert!(entry.is_eligible(NOW + day, day, 3));
		assert!(!entry.is_eligible(NOW + day + 1, day, 3));

		let exhausted = RecoveryEntry {
			attempt: 3,
			..entry.clone()
		};
		assert!(!exhausted.is_eligible(NOW, day, 3));
	}

	proptest! {
		#[test]
		fn touch_never_moves_backwards(offsets in proptest::collection::vec(-1_000i64..1_000, 1..50)) {
			let mut record = SessionRecord::new(NOW, SessionMetadata::default());
			let mut high = record.last_activity;
			for offset in offsets {
				record.touch(NOW + offset);
				prop_assert!(record.last_activity >= high);
				high = record.last_activity;
			}
			prop_assert!(record.validate().is_ok());
		}
	}
}
