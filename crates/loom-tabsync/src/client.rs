// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session client for one tab.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use loom_tabsync_core::{
	ConfigError, CoordinationConfig, LeaderState, SessionId, SessionMetadata, SessionOptions,
	SessionRecord, SessionState, StorageKeys, TabId,
};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::coordinator::{CoordinatorParts, TabCoordinator};
use crate::error::{Result, TabSyncError};
use crate::runtime::{SessionDriver, SharedCoordinator, DEFAULT_TICK_INTERVAL};
use crate::sink::{EventSink, NoopSink};
use crate::storage::{KeyValueStore, MemoryStore, SharedStorage};
use crate::transport::{BroadcastHub, NoopTransport, Transport};
use crate::unload::{TeardownSignal, VisibilityState};

/// Builder for constructing a [`SessionClient`].
pub struct SessionClientBuilder {
	project_id: Option<String>,
	store: Option<Arc<dyn KeyValueStore>>,
	hub: Option<BroadcastHub>,
	transport: Option<Box<dyn Transport>>,
	sink: Option<Arc<dyn EventSink>>,
	clock: Option<Arc<dyn Clock>>,
	tab_id: Option<TabId>,
	metadata: SessionMetadata,
	config: CoordinationConfig,
	tick_interval: Duration,
}

impl SessionClientBuilder {
	/// Creates a new builder with default settings.
	pub fn new() -> Self {
		Self {
			project_id: None,
			store: None,
			hub: None,
			transport: None,
			sink: None,
			clock: None,
			tab_id: None,
			metadata: SessionMetadata::default(),
			config: CoordinationConfig::default(),
			tick_interval: DEFAULT_TICK_INTERVAL,
		}
	}

	/// Sets the project ID. Tabs only coordinate within one project.
	pub fn project_id(mut self, id: impl Into<String>) -> Self {
		self.project_id = Some(id.into());
		self
	}

	/// Sets the shared key/value store.
	///
	/// Defaults to a private [`MemoryStore`], which leaves the tab alone.
	pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
		self.store = Some(store);
		self
	}

	/// Joins the project's channel on `hub`.
	pub fn hub(mut self, hub: BroadcastHub) -> Self {
		self.hub = Some(hub);
		self
	}

	/// Uses a host-provided transport instead of a hub channel.
	pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
		self.transport = Some(transport);
		self
	}

	/// Sets the receiver of session start/end events.
	pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
		self.sink = Some(sink);
		self
	}

	/// Sets the time source. Defaults to [`SystemClock`].
	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);
		self
	}

	/// Uses a fixed tab id instead of a random one.
	pub fn tab_id(mut self, tab_id: TabId) -> Self {
		self.tab_id = Some(tab_id);
		self
	}

	pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.metadata.user_agent = Some(user_agent.into());
		self
	}

	pub fn page_url(mut self, page_url: impl Into<String>) -> Self {
		self.metadata.page_url = Some(page_url.into());
		self
	}

	/// Replaces all coordination timings at once.
	pub fn coordination_config(mut self, config: CoordinationConfig) -> Self {
		self.config = config;
		self
	}

	pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
		self.config.heartbeat_interval = interval;
		self
	}

	pub fn tab_stale_after(mut self, stale_after: Duration) -> Self {
		self.config.tab_stale_after = stale_after;
		self
	}

	pub fn election_window(mut self, window: Duration, jitter: Duration) -> Self {
		self.config.election_window = window;
		self.config.election_jitter = jitter;
		self
	}

	pub fn hidden_teardown_delay(mut self, delay: Duration) -> Self {
		self.config.hidden_teardown_delay = delay;
		self
	}

	/// Sets how often the background driver ticks.
	pub fn tick_interval(mut self, interval: Duration) -> Self {
		self.tick_interval = interval;
		self
	}

	/// Builds the client. Nothing touches storage until [`SessionClient::init`].
	pub fn build(self) -> Result<SessionClient> {
		let project_id = self.project_id.ok_or(ConfigError::MissingProjectId)?;
		let keys = StorageKeys::new(project_id)?;
		self.config.validate()?;
		if self.tick_interval.is_zero() {
			return Err(
				ConfigError::InvalidTiming("tick interval must be positive".to_string()).into(),
			);
		}

		let tab_id = self.tab_id.unwrap_or_default();
		let store = self
			.store
			.unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn KeyValueStore>);
		let transport: Box<dyn Transport> = match (self.transport, self.hub) {
			(Some(transport), _) => transport,
			(None, Some(hub)) => Box::new(hub.open(&keys.broadcast_channel(), tab_id)),
			(None, None) => Box::new(NoopTransport),
		};
		let clock = self
			.clock
			.unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);

		let coordinator = TabCoordinator::new(CoordinatorParts {
			tab_id,
			storage: SharedStorage::new(store, keys),
			transport,
			sink: self
				.sink
				.unwrap_or_else(|| Arc::new(NoopSink) as Arc<dyn EventSink>),
			clock: Arc::clone(&clock),
			config: self.config,
			options: SessionOptions::default(),
			metadata: self.metadata,
		});

		Ok(SessionClient {
			inner: Arc::new(SessionClientInner {
				tab_id,
				coordinator: Arc::new(Mutex::new(coordinator)),
				clock,
				initialized: AtomicBool::new(false),
				tick_interval: self.tick_interval,
				driver: tokio::sync::Mutex::new(SessionDriver::new()),
			}),
		})
	}
}

impl Default for SessionClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Session coordination for one tab.
///
/// Cheap to clone; clones share the same tab.
#[derive(Clone)]
pub struct SessionClient {
	inner: Arc<SessionClientInner>,
}

struct SessionClientInner {
	tab_id: TabId,
	coordinator: SharedCoordinator,
	clock: Arc<dyn Clock>,
	initialized: AtomicBool,
	tick_interval: Duration,
	driver: tokio::sync::Mutex<SessionDriver>,
}

impl SessionClient {
	/// Creates a new builder.
	pub fn builder() -> SessionClientBuilder {
		SessionClientBuilder::new()
	}

	/// Initializes from the SDK's `{ sessionTimeout?: number }` options.
	///
	/// Invalid options fail without touching storage; the client stays
	/// uninitialized.
	pub fn init(&self, options: &Value) -> Result<()> {
		let options = SessionOptions::from_value(options).map_err(|e| {
			warn!(tab_id = %self.inner.tab_id, error = %e, "Rejected session options");
			TabSyncError::from(e)
		})?;
		self.init_with(options)
	}

	/// Initializes from already validated options.
	pub fn init_with(&self, options: SessionOptions) -> Result<()> {
		let mut coordinator = self.inner.coordinator.lock();
		if self.inner.initialized.load(Ordering::SeqCst) {
			return Err(TabSyncError::AlreadyInitialized);
		}
		coordinator.configure(options)?;
		coordinator.start();
		self.inner.initialized.store(true, Ordering::SeqCst);
		info!(
			tab_id = %self.inner.tab_id,
			session_timeout_ms = options.session_timeout_ms(),
			"Session coordination initialized"
		);
		Ok(())
	}

	pub fn is_initialized(&self) -> bool {
		self.inner.initialized.load(Ordering::SeqCst)
	}

	fn ensure_initialized(&self) -> Result<()> {
		if self.is_initialized() {
			Ok(())
		} else {
			Err(TabSyncError::NotInitialized)
		}
	}

	/// Reports user activity at `timestamp` (epoch ms).
	pub fn notify_activity(&self, timestamp: i64) -> Result<()> {
		self.ensure_initialized()?;
		self.inner.coordinator.lock().notify_activity(timestamp);
		Ok(())
	}

	/// Reports user activity now.
	pub fn record_activity(&self) -> Result<()> {
		self.notify_activity(self.inner.clock.now_ms())
	}

	/// Runs one coordination step. Only needed without a running driver.
	pub fn tick(&self) -> Result<()> {
		self.ensure_initialized()?;
		self.inner.coordinator.lock().tick();
		Ok(())
	}

	/// Handles a page teardown signal. Returns false if teardown already ran.
	pub fn handle_teardown(&self, signal: TeardownSignal) -> Result<bool> {
		self.ensure_initialized()?;
		Ok(self.inner.coordinator.lock().teardown(signal))
	}

	pub fn set_visibility(&self, state: VisibilityState) -> Result<()> {
		self.ensure_initialized()?;
		self.inner.coordinator.lock().set_visibility(state);
		Ok(())
	}

	/// Ends the current session for every tab.
	pub fn end_session(&self) -> Result<Option<SessionId>> {
		self.ensure_initialized()?;
		Ok(self.inner.coordinator.lock().end_session())
	}

	pub fn tab_id(&self) -> TabId {
		self.inner.tab_id
	}

	pub fn session_id(&self) -> Option<SessionId> {
		self.inner.coordinator.lock().session_id()
	}

	pub fn session_state(&self) -> SessionState {
		self.inner.coordinator.lock().session_state()
	}

	pub fn session_record(&self) -> Option<SessionRecord> {
		self.inner.coordinator.lock().session_record()
	}

	pub fn leader_state(&self) -> LeaderState {
		self.inner.coordinator.lock().leader_state()
	}

	pub fn is_leader(&self) -> bool {
		self.inner.coordinator.lock().is_leader()
	}

	pub fn tab_count(&self) -> usize {
		self.inner.coordinator.lock().tab_count()
	}

	/// Starts ticking in the background.
	///
	/// The driver stops by itself once the tab is torn down; call this again
	/// if the tab comes back to life.
	pub async fn start_driver(&self) -> Result<()> {
		self.ensure_initialized()?;
		let mut driver = self.inner.driver.lock().await;
		driver
			.start(Arc::clone(&self.inner.coordinator), self.inner.tick_interval)
			.await;
		Ok(())
	}

	pub async fn is_driver_running(&self) -> bool {
		self.inner.driver.lock().await.is_running()
	}

	/// Stops the driver and tears the tab down.
	pub async fn shutdown(&self) -> Result<()> {
		self.inner.driver.lock().await.stop().await;
		if self.is_initialized() {
			self.inner.coordinator.lock().teardown(TeardownSignal::Manual);
		}
		info!(tab_id = %self.inner.tab_id, "Session client shut down");
		Ok(())
	}
}
