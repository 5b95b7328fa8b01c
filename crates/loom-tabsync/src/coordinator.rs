// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-tab coordinator.
//!
//! A [`TabCoordinator`] owns one instance of every protocol component for a
//! single tab and drives them from three inputs: host activity, host teardown
//! signals, and periodic [`TabCoordinator::tick`]s. It never blocks and never
//! spawns; the caller decides how ticks are scheduled.
//!
//! Startup order:
//!
//! 1. Register this tab. If that write fails, storage is unusable and the tab
//!    runs tab-local: it leads itself and keeps its session in memory.
//! 2. Join a valid cross-tab session, else migrate a legacy record, else try
//!    crash recovery.
//! 3. Start an election. A live leader record ends it immediately.

use std::sync::Arc;

use loom_tabsync_core::{
	CoordinationConfig, CoordinationMessage, EndReason, LeaderState, MessageBody, SessionId,
	SessionMetadata, SessionOptions, SessionRecord, SessionState, TabId,
};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::election::LeaderElection;
use crate::error::{Result, TabSyncError};
use crate::lifecycle::{CommitOutcome, SessionChange, SessionLifecycle, SyncOutcome};
use crate::recovery::RecoveryManager;
use crate::registry::TabRegistry;
use crate::sink::EventSink;
use crate::storage::SharedStorage;
use crate::transport::Transport;
use crate::unload::{TeardownSignal, UnloadCoordinator, VisibilityState};

/// Where a tab is in its page life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabPhase {
	/// Built but not started.
	Created,
	Running,
	/// Torn down. New activity starts another page life.
	Closed,
}

/// Everything a coordinator needs, supplied by the host.
pub struct CoordinatorParts {
	pub tab_id: TabId,
	pub storage: SharedStorage,
	pub transport: Box<dyn Transport>,
	pub sink: Arc<dyn EventSink>,
	pub clock: Arc<dyn Clock>,
	pub config: CoordinationConfig,
	pub options: SessionOptions,
	pub metadata: SessionMetadata,
}

/// Coordinates one tab with every other tab of the same project.
pub struct TabCoordinator {
	tab_id: TabId,
	storage: SharedStorage,
	transport: Box<dyn Transport>,
	sink: Arc<dyn EventSink>,
	clock: Arc<dyn Clock>,
	config: CoordinationConfig,
	registry: TabRegistry,
	election: LeaderElection,
	lifecycle: SessionLifecycle,
	recovery: RecoveryManager,
	unload: UnloadCoordinator,
	phase: TabPhase,
	tab_local: bool,
	transport_failed: bool,
	next_heartbeat: i64,
}

impl TabCoordinator {
	pub fn new(parts: CoordinatorParts) -> Self {
		let CoordinatorParts {
			tab_id,
			storage,
			transport,
			sink,
			clock,
			config,
			options,
			metadata,
		} = parts;

		let now = clock.now_ms();
		Self {
			tab_id,
			registry: TabRegistry::new(tab_id, now, config.tab_stale_after_ms()),
			election: LeaderElection::new(),
			lifecycle: SessionLifecycle::new(options.session_timeout_ms(), metadata),
			recovery: RecoveryManager::new(&config),
			unload: UnloadCoordinator::new(config.hidden_teardown_delay_ms()),
			storage,
			transport,
			sink,
			clock,
			config,
			phase: TabPhase::Created,
			tab_local: false,
			transport_failed: false,
			next_heartbeat: now,
		}
	}

	/// Replaces the session options. Only allowed before [`TabCoordinator::start`].
	pub fn configure(&mut self, options: SessionOptions) -> Result<()> {
		if self.phase != TabPhase::Created {
			return Err(TabSyncError::AlreadyInitialized);
		}
		self.lifecycle.set_timeout_ms(options.session_timeout_ms());
		Ok(())
	}

	/// Registers the tab, joins or recovers a session and starts an election.
	pub fn start(&mut self) {
		if self.phase != TabPhase::Created {
			return;
		}
		let now = self.clock.now_ms();
		self.phase = TabPhase::Running;
		self.next_heartbeat = now.saturating_add(self.config.heartbeat_interval_ms());
		info!(
			tab_id = %self.tab_id,
			project_id = %self.storage.keys().project_id(),
			session_timeout_ms = self.lifecycle.timeout_ms(),
			transport = self.transport.is_supported(),
			"Starting tab coordination"
		);
		self.join(now);
	}

	fn join(&mut self, now: i64) {
		if !self.registry.register(&self.storage, now) {
			self.enter_tab_local();
			return;
		}
		self.tab_local = false;

		if let Some(record) = self.lifecycle.load_shared(&self.storage, now) {
			self.lifecycle.adopt(&self.storage, record);
		} else if let Some(record) = self.lifecycle.migrate_legacy(&self.storage, now) {
			self.lifecycle.adopt(&self.storage, record);
		} else if let Some(record) = self.recovery.recover(&self.storage, now) {
			self.lifecycle.install_recovered(&self.storage, record);
		}

		self.begin_election(now);
	}

	fn enter_tab_local(&mut self) {
		warn!(
			tab_id = %self.tab_id,
			"Shared storage unavailable, coordinating this tab on its own"
		);
		self.tab_local = true;
		self.election.claim();
		self.registry.set_leader(&self.storage, true);
	}

	/// Falls back to tab-local mode mid-session. The in-memory session is kept.
	fn degrade(&mut self, now: i64) {
		self.enter_tab_local();
		self.run_leader_duties(now);
	}

	/// Drops recovery entries of sessions this tab abandoned for another one.
	fn forget_superseded(&mut self) {
		for session_id in self.lifecycle.take_superseded() {
			if !self.tab_local {
				self.recovery.remove(&self.storage, session_id);
			}
		}
	}

	/// Advances timers and processes received messages.
	pub fn tick(&mut self) {
		if self.phase != TabPhase::Running {
			return;
		}
		let now = self.clock.now_ms();

		for message in self.transport.drain() {
			self.handle_message(message, now);
		}
		self.forget_superseded();

		if self.unload.hidden_teardown_due(now) {
			self.teardown(TeardownSignal::VisibilityHidden);
			return;
		}

		self.election_step(now);

		if now >= self.next_heartbeat {
			self.heartbeat(now);
			self.next_heartbeat = now.saturating_add(self.config.heartbeat_interval_ms());
		}
		self.forget_superseded();
	}

	/// Reports user activity at `timestamp` (epoch ms).
	pub fn notify_activity(&mut self, timestamp: i64) {
		let now = self.clock.now_ms();
		match self.phase {
			TabPhase::Created => {
				debug!(tab_id = %self.tab_id, "Ignoring activity before start");
				return;
			}
			TabPhase::Closed => self.revive(now),
			TabPhase::Running => {}
		}

		// Future stamps are clamped; expiry is always judged at `now`.
		let at = if timestamp > 0 { timestamp.min(now) } else { now };
		let leader = self.election.is_leader().then_some(self.tab_id);
		let outcome = self.lifecycle.on_activity(
			&self.storage,
			self.sink.as_ref(),
			at,
			now,
			self.tab_local,
			leader,
		);
		if !self.tab_local && self.storage.is_degraded() {
			self.enter_tab_local();
		}

		if let Some(ended) = outcome.ended {
			if !self.tab_local {
				self.recovery.remove(&self.storage, ended);
			}
		}

		if let SessionChange::Started(record) = outcome.change {
			self.publish(CoordinationMessage::session_start(
				self.tab_id,
				now,
				record.session_id,
				record.start_time,
			));
			if self.election.is_leader() && !self.tab_local {
				self.recovery.refresh(&self.storage, &record, now);
			}
		}
		self.forget_superseded();
	}

	/// Reacts to a host teardown signal. Returns false if teardown already ran.
	///
	/// Runs to completion synchronously: the last live tab ends the session,
	/// a departing leader hands the shared record over, and the sink is asked
	/// to flush before this returns.
	pub fn teardown(&mut self, signal: TeardownSignal) -> bool {
		if self.phase != TabPhase::Running || !self.unload.begin(signal) {
			return false;
		}
		let now = self.clock.now_ms();
		self.forget_superseded();
		let was_leader = self.election.is_leader();
		let remaining = if self.tab_local {
			0
		} else {
			self.registry.peers(&self.storage, now).len()
		};
		let session_id = self.lifecycle.session_id();

		let mut flushed = false;
		if remaining == 0 {
			flushed = self.end_with(signal.end_reason()).is_some();
		} else if was_leader {
			self
				.lifecycle
				.release(&self.storage, u32::try_from(remaining).unwrap_or(u32::MAX));
		}

		self.publish(CoordinationMessage::tab_closing(
			self.tab_id,
			now,
			session_id,
			was_leader,
		));
		self.registry.unregister(&self.storage);
		self.election.demote(None);
		if !flushed {
			self.sink.request_synchronous_flush();
		}
		self.transport.close();
		self.phase = TabPhase::Closed;

		info!(
			tab_id = %self.tab_id,
			signal = %signal,
			was_leader,
			remaining_tabs = remaining,
			"Tab torn down"
		);
		true
	}

	/// Updates page visibility; staying hidden past the delay tears down.
	pub fn set_visibility(&mut self, state: VisibilityState) {
		if self.phase == TabPhase::Running {
			let now = self.clock.now_ms();
			self.unload.set_visibility(state, now);
		}
	}

	/// Ends the current session with [`EndReason::Manual`]. The tab keeps
	/// running and the next activity starts a new session.
	pub fn end_session(&mut self) -> Option<SessionId> {
		if self.phase == TabPhase::Created {
			return None;
		}
		self.end_with(EndReason::Manual)
	}

	fn end_with(&mut self, reason: EndReason) -> Option<SessionId> {
		let ended = self
			.lifecycle
			.end(&self.storage, self.sink.as_ref(), reason)?;
		if !self.tab_local {
			self.recovery.remove(&self.storage, ended);
		}
		Some(ended)
	}

	fn revive(&mut self, now: i64) {
		info!(tab_id = %self.tab_id, "Tab active again after teardown");
		self.unload.rearm();
		self.transport.reopen();
		self.transport_failed = false;
		self.registry.reset(now);
		self.phase = TabPhase::Running;
		self.next_heartbeat = now.saturating_add(self.config.heartbeat_interval_ms());
		self.join(now);
	}

	fn heartbeat(&mut self, now: i64) {
		let written = self
			.registry
			.heartbeat(&self.storage, now, self.lifecycle.local_activity());

		if self.tab_local {
			if !written {
				self.run_leader_duties(now);
				return;
			}
			info!(tab_id = %self.tab_id, "Shared storage available again, rejoining");
			self.tab_local = false;
			self.lifecycle.persist_local(&self.storage, now);
			self.election.demote(None);
			self.registry.set_leader(&self.storage, false);
			self.begin_election(now);
		} else if !written {
			self.degrade(now);
			return;
		}

		self.publish_heartbeat(now);
		if self.lifecycle.sync(&self.storage, now, false) == SyncOutcome::Unavailable {
			self.degrade(now);
			return;
		}

		match self.election.state() {
			LeaderState::Follower => {
				if self.registry.find_leader(&self.storage, now).is_none() {
					info!(tab_id = %self.tab_id, "No live leader, starting election");
					self.begin_election(now);
				}
			}
			LeaderState::Leader => {
				if let Some(other) = self.registry.find_leader(&self.storage, now) {
					if LeaderElection::should_yield(
						(self.registry.start_time(), self.tab_id),
						(other.start_time, other.id),
					) {
						self.demote(other.id);
					}
				}
			}
			LeaderState::Electing => {}
		}

		if self.election.is_leader() {
			self.run_leader_duties(now);
		}
	}

	fn run_leader_duties(&mut self, now: i64) {
		let (tab_count, peer_activity) = if self.tab_local {
			(1, None)
		} else {
			self.registry.prune(&self.storage, now);
			let live = self.registry.live_tabs(&self.storage, now);
			let peer_activity = live
				.iter()
				.filter(|r| r.id != self.tab_id)
				.filter_map(|r| r.last_activity)
				.max();
			(u32::try_from(live.len()).unwrap_or(u32::MAX), peer_activity)
		};

		match self.lifecycle.commit(
			&self.storage,
			now,
			self.tab_id,
			tab_count,
			peer_activity,
			self.tab_local,
		) {
			CommitOutcome::Committed(record) => {
				if !self.tab_local {
					self.recovery.refresh(&self.storage, &record, now);
				}
			}
			CommitOutcome::Expired => {
				self.end_with(EndReason::Timeout);
			}
			CommitOutcome::NoSession => {}
		}
	}

	fn begin_election(&mut self, now: i64) {
		let window_ms = self.config.election_window_ms(fastrand::f64());
		if self.election.begin(now, window_ms) {
			self.publish(CoordinationMessage::election_request(
				self.tab_id,
				now,
				self.registry.start_time(),
			));
		}
		self.election_step(now);
	}

	fn election_step(&mut self, now: i64) {
		if !self.election.is_electing() {
			return;
		}
		if let Some(leader) = self.registry.find_leader(&self.storage, now) {
			self.follow(leader.id, now);
		} else if self.election.deadline_passed(now) {
			self.claim_leadership(now);
		}
	}

	fn follow(&mut self, leader: TabId, now: i64) {
		let was_electing = self.election.is_electing();
		self.election.observe_leader(leader);
		if was_electing {
			info!(tab_id = %self.tab_id, leader = %leader, "Following existing leader");
			self.lifecycle.sync(&self.storage, now, self.tab_local);
		}
	}

	fn claim_leadership(&mut self, now: i64) {
		self.election.claim();
		self.registry.set_leader(&self.storage, true);
		self.lifecycle.claim(&self.storage, self.tab_id);
		info!(
			tab_id = %self.tab_id,
			round = self.election.rounds(),
			"Claimed leadership"
		);
		self.publish_heartbeat(now);
	}

	fn demote(&mut self, leader: TabId) {
		self.election.demote(Some(leader));
		self.registry.set_leader(&self.storage, false);
		info!(tab_id = %self.tab_id, leader = %leader, "Yielding leadership to an earlier tab");
	}

	fn handle_message(&mut self, message: CoordinationMessage, now: i64) {
		if self.tab_local {
			return;
		}
		debug!(
			tab_id = %self.tab_id,
			from = %message.tab_id,
			message_type = message.message_type(),
			"Received coordination message"
		);

		match message.body {
			MessageBody::Heartbeat {
				is_leader,
				tab_start_time,
				last_activity,
			} => {
				self.registry.observe_alive(message.tab_id, message.timestamp);
				if let Some(at) = last_activity {
					self.lifecycle.observe_activity(at);
				}
				if is_leader {
					self.on_leader_seen(message.tab_id, tab_start_time, now);
				}
			}
			MessageBody::ElectionRequest { .. } => {
				if self.election.is_leader() {
					self.publish(CoordinationMessage::election_response(
						self.tab_id,
						now,
						self.lifecycle.session_id(),
						self.registry.start_time(),
					));
				}
			}
			MessageBody::ElectionResponse { tab_start_time } => {
				self.on_leader_seen(message.tab_id, tab_start_time, now);
			}
			MessageBody::SessionStart { .. } => {
				self.lifecycle.sync(&self.storage, now, false);
			}
			MessageBody::TabClosing { was_leader } => {
				self.registry.mark_departed(message.tab_id, now);
				if was_leader && self.election.state() == LeaderState::Follower {
					info!(
						tab_id = %self.tab_id,
						leader = %message.tab_id,
						"Leader closed, starting election"
					);
					self.begin_election(now);
				}
			}
		}
	}

	fn on_leader_seen(&mut self, leader: TabId, tab_start_time: i64, now: i64) {
		match self.election.state() {
			LeaderState::Leader => {
				if LeaderElection::should_yield(
					(self.registry.start_time(), self.tab_id),
					(tab_start_time, leader),
				) {
					self.demote(leader);
				}
			}
			LeaderState::Electing => self.follow(leader, now),
			LeaderState::Follower => self.election.observe_leader(leader),
		}
	}

	fn publish_heartbeat(&mut self, now: i64) {
		self.publish(CoordinationMessage::heartbeat(
			self.tab_id,
			now,
			self.lifecycle.session_id(),
			self.election.is_leader(),
			self.registry.start_time(),
			self.lifecycle.local_activity(),
		));
	}

	fn publish(&mut self, message: CoordinationMessage) {
		if self.transport_failed {
			return;
		}
		if let Err(e) = self.transport.publish(&message) {
			warn!(
				tab_id = %self.tab_id,
				message_type = message.message_type(),
				error = %e,
				"Broadcast failed, falling back to storage polling"
			);
			self.transport_failed = true;
		}
	}

	pub fn tab_id(&self) -> TabId {
		self.tab_id
	}

	pub fn phase(&self) -> TabPhase {
		self.phase
	}

	pub fn is_closed(&self) -> bool {
		self.phase == TabPhase::Closed
	}

	pub fn session_id(&self) -> Option<SessionId> {
		self.lifecycle.session_id()
	}

	pub fn session_state(&self) -> SessionState {
		self.lifecycle.state()
	}

	/// This tab's copy of the session record.
	pub fn session_record(&self) -> Option<SessionRecord> {
		self.lifecycle.record().cloned()
	}

	pub fn leader_state(&self) -> LeaderState {
		self.election.state()
	}

	pub fn is_leader(&self) -> bool {
		self.election.is_leader()
	}

	/// Number of live tabs, this one included while it is running.
	pub fn tab_count(&self) -> usize {
		if self.tab_local {
			return usize::from(self.phase == TabPhase::Running);
		}
		self
			.registry
			.live_tabs(&self.storage, self.clock.now_ms())
			.len()
	}

	/// True while shared storage is unusable and the tab coordinates alone.
	pub fn is_tab_local(&self) -> bool {
		self.tab_local
	}

	pub fn transport_failed(&self) -> bool {
		self.transport_failed
	}

	pub fn session_timeout_ms(&self) -> i64 {
		self.lifecycle.timeout_ms()
	}

	pub fn config(&self) -> &CoordinationConfig {
		&self.config
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::clock::ManualClock;
	use crate::sink::RecordingSink;
	use crate::storage::{KeyValueStore, MemoryStore};
	use crate::transport::{BroadcastHub, NoopTransport};
	use loom_tabsync_core::{StorageKeys, TabRecord};

	const NOW: i64 = 1_700_000_000_000;

	struct Tab {
		coordinator: TabCoordinator,
		sink: Arc<RecordingSink>,
	}

	fn tab(store: &MemoryStore, hub: &BroadcastHub, clock: &ManualClock) -> Tab {
		let keys = StorageKeys::new("proj").unwrap();
		let tab_id = TabId::new();
		let sink = Arc::new(RecordingSink::new());
		let transport = hub.open(&keys.broadcast_channel(), tab_id);
		let mut coordinator = TabCoordinator::new(CoordinatorParts {
			tab_id,
			storage: SharedStorage::new(Arc::new(store.clone()), keys),
			transport: Box::new(transport),
			sink: sink.clone(),
			clock: Arc::new(clock.clone()),
			config: CoordinationConfig::default(),
			options: SessionOptions::default(),
			metadata: SessionMetadata::default(),
		});
		coordinator.start();
		Tab { coordinator, sink }
	}

	fn run(tabs: &mut [&mut Tab], clock: &ManualClock, ms: i64) {
		let mut elapsed = 0;
		while elapsed < ms {
			clock.advance(100);
			elapsed += 100;
			for tab in tabs.iter_mut() {
				tab.coordinator.tick();
			}
		}
	}

	#[test]
	fn test_single_tab_becomes_leader() {
		let store = MemoryStore::new();
		let hub = BroadcastHub::new();
		let clock = ManualClock::new(NOW);
		let mut a = tab(&store, &hub, &clock);

		assert_eq!(a.coordinator.leader_state(), LeaderState::Electing);
		run(&mut [&mut a], &clock, 500);
		assert!(a.coordinator.is_leader());
	}

	#[test]
	fn test_configure_after_start_is_rejected() {
		let store = MemoryStore::new();
		let hub = BroadcastHub::new();
		let clock = ManualClock::new(NOW);
		let mut a = tab(&store, &hub, &clock);

		assert!(matches!(
			a.coordinator.configure(SessionOptions::default()),
			Err(TabSyncError::AlreadyInitialized)
		));
	}

	#[test]
	fn test_second_tab_follows_existing_leader() {
		let store = MemoryStore::new();
		let hub = BroadcastHub::new();
		let clock = ManualClock::new(NOW);
		let mut a = tab(&store, &hub, &clock);
		run(&mut [&mut a], &clock, 500);

		let mut b = tab(&store, &hub, &clock);
		assert_eq!(b.coordinator.leader_state(), LeaderState::Follower);
		run(&mut [&mut a, &mut b], &clock, 2_000);
		assert!(a.coordinator.is_leader());
		assert!(!b.coordinator.is_leader());
	}

	#[test]
	fn test_leader_answers_election_request() {
		let store = MemoryStore::new();
		let hub = BroadcastHub::new();
		let clock = ManualClock::new(NOW);
		let keys = StorageKeys::new("proj").unwrap();
		let mut a = tab(&store, &hub, &clock);
		run(&mut [&mut a], &clock, 500);

		let observer_id = TabId::new();
		let mut observer = hub.open(&keys.broadcast_channel(), observer_id);
		hub.publish_raw(
			&keys.broadcast_channel(),
			CoordinationMessage::election_request(observer_id, NOW, NOW)
				.encode()
				.unwrap(),
		);
		a.coordinator.tick();

		let responses: Vec<_> = observer
			.drain()
			.into_iter()
			.filter(|m| m.message_type() == "election_response")
			.collect();
		assert_eq!(responses.len(), 1);
		assert_eq!(responses[0].tab_id, a.coordinator.tab_id());
	}

	#[test]
	fn test_activity_before_start_is_ignored() {
		let store = MemoryStore::new();
		let keys = StorageKeys::new("proj").unwrap();
		let clock = ManualClock::new(NOW);
		let sink = Arc::new(RecordingSink::new());
		let mut coordinator = TabCoordinator::new(CoordinatorParts {
			tab_id: TabId::new(),
			storage: SharedStorage::new(Arc::new(store.clone()), keys),
			transport: Box::new(NoopTransport),
			sink: sink.clone(),
			clock: Arc::new(clock.clone()),
			config: CoordinationConfig::default(),
			options: SessionOptions::default(),
			metadata: SessionMetadata::default(),
		});

		coordinator.notify_activity(NOW);
		assert!(coordinator.session_id().is_none());
		assert!(sink.events().is_empty());
		assert!(store.is_empty());
	}

	#[test]
	fn test_teardown_of_last_tab_ends_session() {
		let store = MemoryStore::new();
		let hub = BroadcastHub::new();
		let clock = ManualClock::new(NOW);
		let mut a = tab(&store, &hub, &clock);
		run(&mut [&mut a], &clock, 500);
		a.coordinator.notify_activity(clock.now_ms());
		let id = a.coordinator.session_id().unwrap();

		assert!(a.coordinator.teardown(TeardownSignal::BeforeUnload));
		assert!(!a.coordinator.teardown(TeardownSignal::PageHide));

		assert!(a.coordinator.is_closed());
		assert_eq!(a.sink.ends(), vec![(id, EndReason::PageUnload)]);
		assert_eq!(a.sink.flush_count(), 1);
		assert!(store.is_empty());
	}

	#[test]
	fn test_hidden_page_tears_down_after_delay() {
		let store = MemoryStore::new();
		let hub = BroadcastHub::new();
		let clock = ManualClock::new(NOW);
		let mut a = tab(&store, &hub, &clock);
		a.coordinator.notify_activity(NOW);

		a.coordinator.set_visibility(VisibilityState::Hidden);
		run(&mut [&mut a], &clock, 29_000);
		assert!(!a.coordinator.is_closed());

		run(&mut [&mut a], &clock, 1_500);
		assert!(a.coordinator.is_closed());
		assert_eq!(a.sink.ends().len(), 1);
	}

	#[test]
	fn test_activity_after_teardown_revives_tab() {
		let store = MemoryStore::new();
		let hub = BroadcastHub::new();
		let clock = ManualClock::new(NOW);
		let mut a = tab(&store, &hub, &clock);
		a.coordinator.notify_activity(NOW);
		let first = a.coordinator.session_id().unwrap();
		let tab_id = a.coordinator.tab_id();
		a.coordinator.teardown(TeardownSignal::PageHide);

		clock.advance(1_000);
		a.coordinator.notify_activity(clock.now_ms());
		assert_eq!(a.coordinator.phase(), TabPhase::Running);
		assert_eq!(a.coordinator.tab_id(), tab_id);
		assert_ne!(a.coordinator.session_id(), Some(first));
		assert!(a.coordinator.teardown(TeardownSignal::PageHide));
	}

	#[test]
	fn test_end_session_is_manual_and_tab_keeps_running() {
		let store = MemoryStore::new();
		let hub = BroadcastHub::new();
		let clock = ManualClock::new(NOW);
		let mut a = tab(&store, &hub, &clock);
		a.coordinator.notify_activity(NOW);
		let id = a.coordinator.session_id().unwrap();

		assert_eq!(a.coordinator.end_session(), Some(id));
		assert_eq!(a.sink.ends(), vec![(id, EndReason::Manual)]);
		assert_eq!(a.coordinator.phase(), TabPhase::Running);
		assert_eq!(a.coordinator.session_state(), SessionState::Ended);
	}

	fn shared_version(store: &MemoryStore) -> u64 {
		let keys = StorageKeys::new("proj").unwrap();
		let raw = store.get(&keys.cross_tab_session()).unwrap().unwrap();
		serde_json::from_str::<SessionRecord>(&raw).unwrap().version
	}

	#[test]
	fn test_leader_yields_to_earlier_leader_record() {
		let store = MemoryStore::new();
		let hub = BroadcastHub::new();
		let clock = ManualClock::new(NOW);
		let keys = StorageKeys::new("proj").unwrap();
		let mut a = tab(&store, &hub, &clock);
		run(&mut [&mut a], &clock, 500);
		a.coordinator.notify_activity(clock.now_ms());
		assert!(a.coordinator.is_leader());

		let rival = TabRecord {
			id: TabId::new(),
			is_leader: true,
			start_time: NOW - 10_000,
			last_heartbeat: clock.now_ms(),
			last_activity: None,
		};
		store
			.set(&keys.tab_info(&rival.id), &serde_json::to_string(&rival).unwrap())
			.unwrap();

		run(&mut [&mut a], &clock, 1_000);
		assert!(!a.coordinator.is_leader());
		assert_eq!(a.coordinator.leader_state(), LeaderState::Follower);

		let version = shared_version(&store);
		run(&mut [&mut a], &clock, 2_000);
		assert_eq!(shared_version(&store), version);
		assert!(!a.coordinator.is_leader());
	}

	#[test]
	fn test_leader_yields_to_earlier_leader_heartbeat() {
		let store = MemoryStore::new();
		let hub = BroadcastHub::new();
		let clock = ManualClock::new(NOW);
		let keys = StorageKeys::new("proj").unwrap();
		let mut a = tab(&store, &hub, &clock);
		run(&mut [&mut a], &clock, 500);
		assert!(a.coordinator.is_leader());

		let rival = TabId::new();
		hub.publish_raw(
			&keys.broadcast_channel(),
			CoordinationMessage::heartbeat(rival, clock.now_ms(), None, true, NOW - 10_000, None)
				.encode()
				.unwrap(),
		);
		a.coordinator.tick();
		assert!(!a.coordinator.is_leader());
		assert_eq!(a.coordinator.leader_state(), LeaderState::Follower);
	}

	#[test]
	fn test_leader_keeps_role_against_later_leader_heartbeat() {
		let store = MemoryStore::new();
		let hub = BroadcastHub::new();
		let clock = ManualClock::new(NOW);
		let keys = StorageKeys::new("proj").unwrap();
		let mut a = tab(&store, &hub, &clock);
		run(&mut [&mut a], &clock, 500);

		hub.publish_raw(
			&keys.broadcast_channel(),
			CoordinationMessage::heartbeat(TabId::new(), clock.now_ms(), None, true, NOW + 1, None)
				.encode()
				.unwrap(),
		);
		a.coordinator.tick();
		assert!(a.coordinator.is_leader());
	}

	#[test]
	fn test_storage_failure_mid_session_keeps_session() {
		let store = MemoryStore::new();
		let hub = BroadcastHub::new();
		let clock = ManualClock::new(NOW);
		let mut a = tab(&store, &hub, &clock);
		run(&mut [&mut a], &clock, 500);
		a.coordinator.notify_activity(clock.now_ms());
		let id = a.coordinator.session_id().unwrap();

		store.set_disabled(true);
		run(&mut [&mut a], &clock, 2_000);
		assert!(a.coordinator.is_tab_local());
		assert_eq!(a.coordinator.session_id(), Some(id));
		assert_eq!(a.coordinator.session_state(), SessionState::Active);

		a.coordinator.notify_activity(clock.now_ms());
		assert_eq!(a.coordinator.session_id(), Some(id));
		assert_eq!(a.sink.starts(), vec![id]);
		assert!(a.sink.ends().is_empty());
	}

	#[test]
	fn test_failed_read_on_activity_enters_tab_local() {
		let store = MemoryStore::new();
		let hub = BroadcastHub::new();
		let clock = ManualClock::new(NOW);
		let mut a = tab(&store, &hub, &clock);
		run(&mut [&mut a], &clock, 500);
		a.coordinator.notify_activity(clock.now_ms());
		let id = a.coordinator.session_id().unwrap();

		store.set_disabled(true);
		a.coordinator.notify_activity(clock.now_ms());
		assert!(a.coordinator.is_tab_local());
		assert_eq!(a.coordinator.session_id(), Some(id));
	}

	#[test]
	fn test_future_activity_stamp_is_clamped() {
		let store = MemoryStore::new();
		let hub = BroadcastHub::new();
		let clock = ManualClock::new(NOW);
		let mut a = tab(&store, &hub, &clock);
		a.coordinator.notify_activity(NOW + 60_000);

		let record = a.coordinator.session_record().unwrap();
		assert_eq!(record.start_time, NOW);
		assert_eq!(record.last_activity, NOW);
	}
}
