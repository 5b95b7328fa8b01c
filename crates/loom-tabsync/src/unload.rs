// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Page teardown signals.

use loom_tabsync_core::EndReason;
use tracing::debug;

/// A host signal that the page is going away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeardownSignal {
	/// The page is about to navigate away.
	BeforeUnload,
	/// The page is being hidden for good or put into the back/forward cache.
	PageHide,
	/// The page stayed hidden past the configured delay.
	VisibilityHidden,
	/// The host asked for teardown through the API.
	Manual,
}

impl TeardownSignal {
	pub fn as_str(&self) -> &'static str {
		match self {
			TeardownSignal::BeforeUnload => "beforeunload",
			TeardownSignal::PageHide => "pagehide",
			TeardownSignal::VisibilityHidden => "visibility_hidden",
			TeardownSignal::Manual => "manual",
		}
	}

	/// The reason reported if this teardown ends the session.
	pub fn end_reason(&self) -> EndReason {
		match self {
			TeardownSignal::Manual => EndReason::Manual,
			_ => EndReason::PageUnload,
		}
	}
}

impl std::fmt::Display for TeardownSignal {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Page visibility as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
	Visible,
	Hidden,
}

/// One-shot teardown guard plus the hidden-page timer.
#[derive(Debug)]
pub struct UnloadCoordinator {
	torn_down: bool,
	last_signal: Option<TeardownSignal>,
	visibility: VisibilityState,
	hidden_deadline: Option<i64>,
	hidden_delay_ms: i64,
}

impl UnloadCoordinator {
	pub fn new(hidden_delay_ms: i64) -> Self {
		Self {
			torn_down: false,
			last_signal: None,
			visibility: VisibilityState::Visible,
			hidden_deadline: None,
			hidden_delay_ms,
		}
	}

	pub fn is_torn_down(&self) -> bool {
		self.torn_down
	}

	pub fn last_signal(&self) -> Option<TeardownSignal> {
		self.last_signal
	}

	pub fn visibility(&self) -> VisibilityState {
		self.visibility
	}

	pub fn hidden_deadline(&self) -> Option<i64> {
		self.hidden_deadline
	}

	/// Hidden arms the teardown deadline, visible disarms it.
	pub fn set_visibility(&mut self, state: VisibilityState, now: i64) {
		self.visibility = state;
		match state {
			VisibilityState::Hidden => {
				if self.hidden_deadline.is_none() && !self.torn_down {
					self.hidden_deadline = Some(now.saturating_add(self.hidden_delay_ms));
					debug!(delay_ms = self.hidden_delay_ms, "Page hidden, teardown armed");
				}
			}
			VisibilityState::Visible => {
				if self.hidden_deadline.take().is_some() {
					debug!("Page visible again, teardown disarmed");
				}
			}
		}
	}

	/// True when the page has been hidden past the delay.
	pub fn hidden_teardown_due(&self, now: i64) -> bool {
		!self.torn_down && self.hidden_deadline.is_some_and(|d| now >= d)
	}

	/// Claims the one-shot teardown. Returns false if it already ran.
	pub fn begin(&mut self, signal: TeardownSignal) -> bool {
		if self.torn_down {
			debug!(signal = %signal, "Teardown already ran, ignoring signal");
			return false;
		}
		self.torn_down = true;
		self.last_signal = Some(signal);
		self.hidden_deadline = None;
		true
	}

	/// Allows one more teardown, for a page that came back to life.
	pub fn rearm(&mut self) {
		self.torn_down = false;
		self.last_signal = None;
		self.visibility = VisibilityState::Visible;
	}
}
