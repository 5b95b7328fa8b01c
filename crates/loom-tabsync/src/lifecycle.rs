// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session lifecycle state machine.
//!
//! Owns this tab's view of the canonical [`SessionRecord`]:
//!
//! ```text
//! Idle ──activity──▶ Starting ──persisted──▶ Active ──timeout/unload/manual──▶ Ending ──▶ Ended
//!   │                                          ▲                                             │
//!   └──────────────adopt shared record─────────┘◀────────────next activity (new id)──────────┘
//! ```
//!
//! Followers only extend their local copy; the leader folds every tab's
//! activity into the shared record through [`SessionLifecycle::commit`].
//! When two tabs disagree on the session id, the record in storage wins.

use std::collections::HashSet;

use loom_tabsync_core::{
	EndReason, SessionId, SessionMetadata, SessionRecord, SessionState, TabId,
};
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::sink::EventSink;
use crate::storage::SharedStorage;

/// What an activity notification did to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
	/// The current session was extended.
	Extended,
	/// An existing session from another tab was joined.
	Adopted(SessionId),
	/// A brand-new session was created by this tab.
	Started(SessionRecord),
}

/// Result of [`SessionLifecycle::on_activity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityOutcome {
	/// A timed-out session this tab ended before handling the activity.
	pub ended: Option<SessionId>,
	pub change: SessionChange,
}

/// Result of reconciling with the shared record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
	Unchanged,
	/// Same session; local copy refreshed from storage.
	Refreshed,
	/// Switched to the session persisted by another tab.
	Adopted(SessionId),
	/// The shared record is gone; another tab ended the session.
	Vanished(SessionId),
	/// Storage could not be read; the local view was kept as is.
	Unavailable,
}

/// Result of a leader's periodic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
	NoSession,
	Committed(SessionRecord),
	/// The session saw no activity within the timeout and must end.
	Expired,
}

/// One tab's session state.
#[derive(Debug)]
pub struct SessionLifecycle {
	state: SessionState,
	record: Option<SessionRecord>,
	local_activity: Option<i64>,
	peer_activity: Option<i64>,
	ended: HashSet<SessionId>,
	/// Sessions this tab dropped in favour of the shared record.
	superseded: Vec<SessionId>,
	timeout_ms: i64,
	metadata: SessionMetadata,
}

impl SessionLifecycle {
	pub fn new(timeout_ms: i64, metadata: SessionMetadata) -> Self {
		Self {
			state: SessionState::Idle,
			record: None,
			local_activity: None,
			peer_activity: None,
			ended: HashSet::new(),
			superseded: Vec::new(),
			timeout_ms,
			metadata,
		}
	}

	pub fn state(&self) -> SessionState {
		self.state
	}

	pub fn session_id(&self) -> Option<SessionId> {
		self.record.as_ref().map(|r| r.session_id)
	}

	pub fn record(&self) -> Option<&SessionRecord> {
		self.record.as_ref()
	}

	pub fn timeout_ms(&self) -> i64 {
		self.timeout_ms
	}

	pub fn set_timeout_ms(&mut self, timeout_ms: i64) {
		self.timeout_ms = timeout_ms;
	}

	/// Latest activity seen on this tab.
	pub fn local_activity(&self) -> Option<i64> {
		self.local_activity
	}

	/// True if `session_id` was ended while this tab watched.
	pub fn has_ended(&self, session_id: &SessionId) -> bool {
		self.ended.contains(session_id)
	}

	/// Returns and forgets the sessions abandoned by adopting another one.
	pub fn take_superseded(&mut self) -> Vec<SessionId> {
		std::mem::take(&mut self.superseded)
	}

	/// Remembers activity reported by another tab.
	pub fn observe_activity(&mut self, at: i64) {
		self.peer_activity = Some(self.peer_activity.map_or(at, |p| p.max(at)));
	}

	/// Reads the shared record if it is well-formed, regardless of expiry.
	///
	/// Fails only when the store itself is unreadable; a missing or invalid
	/// record is `Ok(None)`.
	fn read_shared(&self, storage: &SharedStorage) -> Result<Option<SessionRecord>, StorageError> {
		let key = storage.keys().cross_tab_session();
		let Some(record) = storage.read_json::<SessionRecord>(&key)? else {
			return Ok(None);
		};
		match record.validate() {
			Ok(()) => Ok(Some(record)),
			Err(e) => {
				warn!(error = %e, "Ignoring invalid shared session record");
				Ok(None)
			}
		}
	}

	/// Whether `record` may be joined at `now`.
	fn is_joinable(&self, record: &SessionRecord, now: i64) -> bool {
		!self.ended.contains(&record.session_id) && !record.is_expired(now, self.timeout_ms)
	}

	/// The shared record, if it is valid, unexpired and was not ended here.
	pub fn load_shared(&self, storage: &SharedStorage, now: i64) -> Option<SessionRecord> {
		self
			.read_shared(storage)
			.ok()
			.flatten()
			.filter(|r| self.is_joinable(r, now))
	}

	/// Joins an existing session without emitting a start event.
	///
	/// A different session this tab was in is abandoned for good.
	pub fn adopt(&mut self, storage: &SharedStorage, record: SessionRecord) {
		let session_id = record.session_id;
		if let Some(previous) = self.session_id().filter(|id| *id != session_id) {
			self.ended.insert(previous);
			self.superseded.push(previous);
			info!(previous = %previous, session_id = %session_id, "Local session superseded by shared record");
		}
		self.mirror_legacy(storage, &record);
		self.record = Some(record);
		self.state = SessionState::Active;
		info!(session_id = %session_id, "Adopted existing session");
	}

	/// Persists a recovered session and joins it.
	pub fn install_recovered(&mut self, storage: &SharedStorage, record: SessionRecord) {
		let key = storage.keys().cross_tab_session();
		storage.set_json(&key, &record);
		self.adopt(storage, record);
	}

	/// Copies a still-valid legacy single-tab record into the cross-tab key.
	///
	/// Only runs when no cross-tab record exists at all.
	pub fn migrate_legacy(&self, storage: &SharedStorage, now: i64) -> Option<SessionRecord> {
		let keys = storage.keys();
		let cross_key = keys.cross_tab_session();
		if storage.get(&cross_key).is_some() {
			return None;
		}

		let legacy: SessionRecord = storage.get_json(&keys.session())?;
		if legacy.validate().is_err() || !self.is_joinable(&legacy, now) {
			debug!("Legacy session record is not resumable");
			return None;
		}

		storage.set_json(&cross_key, &legacy);
		info!(session_id = %legacy.session_id, "Migrated legacy session record");
		Some(legacy)
	}

	/// Creates and persists a brand-new session.
	pub fn start(
		&mut self,
		storage: &SharedStorage,
		sink: &dyn EventSink,
		at: i64,
		leader: Option<TabId>,
	) -> SessionRecord {
		self.state = SessionState::Starting;

		let mut record = SessionRecord::new(at, self.metadata.clone());
		record.leader_tab_id = leader;
		let persisted = storage.set_json(&storage.keys().cross_tab_session(), &record);
		self.mirror_legacy(storage, &record);

		self.record = Some(record.clone());
		self.state = SessionState::Active;
		info!(
			session_id = %record.session_id,
			start_time = record.start_time,
			persisted,
			"Session started"
		);
		sink.on_session_start(&record.session_id, record.start_time);
		record
	}

	/// Handles user activity stamped `at`, observed at `now`.
	///
	/// Expiry and joinability are judged at `now`; `at` only extends
	/// activity. In tab-local mode, or when storage cannot be read, only the
	/// local record counts.
	pub fn on_activity(
		&mut self,
		storage: &SharedStorage,
		sink: &dyn EventSink,
		at: i64,
		now: i64,
		tab_local: bool,
		leader: Option<TabId>,
	) -> ActivityOutcome {
		self.local_activity = Some(self.local_activity.map_or(at, |a| a.max(at)));
		let mut ended = None;

		if self.state.is_active() {
			let keep_local = if tab_local {
				true
			} else {
				match self.read_shared(storage) {
					Err(_) => true,
					Ok(Some(shared)) if Some(shared.session_id) == self.session_id() => {
						self.merge(&shared);
						true
					}
					Ok(Some(shared)) if self.is_joinable(&shared, now) => {
						let session_id = shared.session_id;
						self.adopt(storage, shared);
						self.touch(at);
						return ActivityOutcome {
							ended,
							change: SessionChange::Adopted(session_id),
						};
					}
					Ok(_) => {
						self.vanish();
						false
					}
				}
			};

			if keep_local {
				let expired = self
					.record
					.as_ref()
					.is_some_and(|r| r.is_expired(now, self.timeout_ms));
				if !expired {
					self.touch(at);
					return ActivityOutcome {
						ended,
						change: SessionChange::Extended,
					};
				}
				ended = self.end(storage, sink, EndReason::Timeout);
			}
		}

		if !tab_local {
			if let Some(shared) = self.load_shared(storage, now) {
				let session_id = shared.session_id;
				self.adopt(storage, shared);
				self.touch(at);
				return ActivityOutcome {
					ended,
					change: SessionChange::Adopted(session_id),
				};
			}
		}

		// Activity older than a whole timeout cannot open a live session.
		let start_at = if now.saturating_sub(at) > self.timeout_ms {
			now
		} else {
			at
		};
		let record = self.start(storage, sink, start_at, leader);
		ActivityOutcome {
			ended,
			change: SessionChange::Started(record),
		}
	}

	/// Reconciles the local view with the shared record.
	pub fn sync(&mut self, storage: &SharedStorage, now: i64, tab_local: bool) -> SyncOutcome {
		if tab_local {
			return SyncOutcome::Unchanged;
		}

		let active = self.state.is_active();
		let shared = match self.read_shared(storage) {
			Ok(shared) => shared,
			Err(_) => return SyncOutcome::Unavailable,
		};
		match shared {
			Some(shared) if active && Some(shared.session_id) == self.session_id() => {
				self.merge(&shared);
				SyncOutcome::Refreshed
			}
			Some(shared)
				if Some(shared.session_id) != self.session_id() && self.is_joinable(&shared, now) =>
			{
				let session_id = shared.session_id;
				self.adopt(storage, shared);
				SyncOutcome::Adopted(session_id)
			}
			// Only a successful read that finds no record means another tab ended it.
			None if active => match self.vanish() {
				Some(session_id) => SyncOutcome::Vanished(session_id),
				None => SyncOutcome::Unchanged,
			},
			_ => SyncOutcome::Unchanged,
		}
	}

	/// Leader-only: folds activity into the shared record and writes it.
	pub fn commit(
		&mut self,
		storage: &SharedStorage,
		now: i64,
		leader: TabId,
		tab_count: u32,
		peer_activity: Option<i64>,
		tab_local: bool,
	) -> CommitOutcome {
		if !self.state.is_active() {
			return CommitOutcome::NoSession;
		}

		if !tab_local {
			if let Ok(Some(shared)) = self.read_shared(storage) {
				if Some(shared.session_id) == self.session_id() {
					self.merge(&shared);
				} else if self.is_joinable(&shared, now) {
					self.adopt(storage, shared);
				}
			}
		}

		let local = self.local_activity;
		let peers = self.peer_activity.max(peer_activity);
		let timeout_ms = self.timeout_ms;
		let Some(record) = self.record.as_mut() else {
			return CommitOutcome::NoSession;
		};

		for at in [local, peers].into_iter().flatten() {
			record.touch(at);
		}
		if record.is_expired(now, timeout_ms) {
			return CommitOutcome::Expired;
		}

		record.last_heartbeat = now;
		record.tab_count = tab_count;
		record.leader_tab_id = Some(leader);
		record.bump_version();
		let record = record.clone();

		if !tab_local {
			storage.set_json(&storage.keys().cross_tab_session(), &record);
			self.mirror_legacy(storage, &record);
		}
		debug!(
			session_id = %record.session_id,
			version = record.version,
			tab_count,
			"Committed session record"
		);
		CommitOutcome::Committed(record)
	}

	/// Writes the in-memory session to storage unless storage already holds
	/// it or another joinable session.
	///
	/// Called when a tab-local tab regains storage.
	pub fn persist_local(&mut self, storage: &SharedStorage, now: i64) -> bool {
		if !self.state.is_active() {
			return false;
		}
		match self.read_shared(storage) {
			Err(_) => return false,
			Ok(Some(shared))
				if Some(shared.session_id) == self.session_id() || self.is_joinable(&shared, now) =>
			{
				return false;
			}
			Ok(_) => {}
		}
		let Some(record) = self.record.clone() else {
			return false;
		};

		let persisted = storage.set_json(&storage.keys().cross_tab_session(), &record);
		if persisted {
			self.mirror_legacy(storage, &record);
			info!(session_id = %record.session_id, "Persisted tab-local session");
		}
		persisted
	}

	/// Records `leader` as the owning tab of the current session.
	pub fn claim(&mut self, storage: &SharedStorage, leader: TabId) {
		self.write_owned(storage, |record| {
			record.leader_tab_id = Some(leader);
		});
	}

	/// Hands the session over on a clean leader exit.
	pub fn release(&mut self, storage: &SharedStorage, remaining_tabs: u32) {
		self.write_owned(storage, |record| {
			record.leader_tab_id = None;
			record.tab_count = remaining_tabs;
		});
	}

	fn write_owned(&mut self, storage: &SharedStorage, update: impl FnOnce(&mut SessionRecord)) {
		if !self.state.is_active() {
			return;
		}
		match self.read_shared(storage) {
			Err(_) => return,
			Ok(Some(shared)) => {
				if Some(shared.session_id) != self.session_id() {
					return;
				}
				self.merge(&shared);
			}
			Ok(None) => {}
		}
		let Some(record) = self.record.as_mut() else {
			return;
		};
		update(record);
		record.bump_version();
		let record = record.clone();
		storage.set_json(&storage.keys().cross_tab_session(), &record);
	}

	/// Terminates the current session and notifies the sink.
	///
	/// Removes the shared and legacy records unless they already belong to
	/// a different session, then requests a synchronous flush.
	pub fn end(
		&mut self,
		storage: &SharedStorage,
		sink: &dyn EventSink,
		reason: EndReason,
	) -> Option<SessionId> {
		if !self.state.is_active() {
			return None;
		}
		let record = self.record.take()?;
		self.state = SessionState::Ending;

		let session_id = record.session_id;
		let keys = storage.keys();
		remove_if_owned(storage, &keys.cross_tab_session(), session_id);
		remove_if_owned(storage, &keys.session(), session_id);

		self.ended.insert(session_id);
		self.state = SessionState::Ended;
		info!(
			session_id = %session_id,
			reason = %reason,
			duration_ms = record.duration_ms(),
			"Session ended"
		);
		sink.on_session_end(&session_id, reason);
		sink.request_synchronous_flush();
		Some(session_id)
	}

	/// Drops a session another tab ended, without notifying the sink.
	fn vanish(&mut self) -> Option<SessionId> {
		let record = self.record.take()?;
		self.ended.insert(record.session_id);
		self.state = SessionState::Ended;
		info!(session_id = %record.session_id, "Session ended by another tab");
		Some(record.session_id)
	}

	fn touch(&mut self, at: i64) {
		if let Some(record) = self.record.as_mut() {
			record.touch(at);
		}
	}

	fn merge(&mut self, shared: &SessionRecord) {
		let Some(record) = self.record.as_mut() else {
			return;
		};
		record.touch(shared.last_activity);
		record.last_heartbeat = record.last_heartbeat.max(shared.last_heartbeat);
		record.tab_count = shared.tab_count;
		record.recovery_attempts = shared.recovery_attempts;
		record.leader_tab_id = shared.leader_tab_id;
		if shared.version < record.version {
			debug!(
				session_id = %record.session_id,
				local = record.version,
				shared = shared.version,
				"Shared session record version regressed"
			);
		}
		record.version = record.version.max(shared.version);
	}

	fn mirror_legacy(&self, storage: &SharedStorage, record: &SessionRecord) {
		storage.set_json(&storage.keys().session(), record);
	}
}

/// Removes `key` unless it holds a readable record of a different session.
fn remove_if_owned(storage: &SharedStorage, key: &str, session_id: SessionId) {
	let owned_by_other = storage
		.get(key)
		.and_then(|raw| serde_json::from_str::<SessionRecord>(&raw).ok())
		.is_some_and(|r| r.session_id != session_id);
	if !owned_by_other {
		storage.remove(key);
	}
}
