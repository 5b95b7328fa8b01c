// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Outbound session lifecycle notifications.

use loom_tabsync_core::{EndReason, SessionId};
use parking_lot::Mutex;

/// Receives session lifecycle events from a tab.
///
/// Called synchronously from inside the coordinator; implementations must not
/// block. `request_synchronous_flush` is the coupling point to the event
/// pipeline: queued telemetry should be handed off before the page goes away.
pub trait EventSink: Send + Sync {
	fn on_session_start(&self, session_id: &SessionId, start_time: i64);
	fn on_session_end(&self, session_id: &SessionId, reason: EndReason);
	fn request_synchronous_flush(&self);
}

/// Sink that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
	fn on_session_start(&self, _session_id: &SessionId, _start_time: i64) {}
	fn on_session_end(&self, _session_id: &SessionId, _reason: EndReason) {}
	fn request_synchronous_flush(&self) {}
}

/// An event observed by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
	SessionStart {
		session_id: SessionId,
		start_time: i64,
	},
	SessionEnd {
		session_id: SessionId,
		reason: EndReason,
	},
	Flush,
}

/// Sink that keeps every event in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
	events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn events(&self) -> Vec<SinkEvent> {
		self.events.lock().clone()
	}

	pub fn starts(&self) -> Vec<SessionId> {
		self
			.events
			.lock()
			.iter()
			.filter_map(|e| match e {
				SinkEvent::SessionStart { session_id, .. } => Some(*session_id),
				_ => None,
			})
			.collect()
	}

	pub fn ends(&self) -> Vec<(SessionId, EndReason)> {
		self
			.events
			.lock()
			.iter()
			.filter_map(|e| match e {
				SinkEvent::SessionEnd { session_id, reason } => Some((*session_id, *reason)),
				_ => None,
			})
			.collect()
	}

	pub fn flush_count(&self) -> usize {
		self
			.events
			.lock()
			.iter()
			.filter(|e| matches!(e, SinkEvent::Flush))
			.count()
	}

	pub fn clear(&self) {
		self.events.lock().clear();
	}
}

impl EventSink for RecordingSink {
	fn on_session_start(&self, session_id: &SessionId, start_time: i64) {
		self.events.lock().push(SinkEvent::SessionStart {
			session_id: *session_id,
			start_time,
		});
	}

	fn on_session_end(&self, session_id: &SessionId, reason: EndReason) {
		self.events.lock().push(SinkEvent::SessionEnd {
			session_id: *session_id,
			reason,
		});
	}

	fn request_synchronous_flush(&self) {
		self.events.lock().push(SinkEvent::Flush);
	}
}
