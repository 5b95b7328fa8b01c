// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Leader election state machine.
//!
//! ```text
//! Follower ──leader lost──▶ Electing ──window elapsed──▶ Leader
//!     ▲                        │                           │
//!     └──────leader seen───────┘◀──earlier leader seen─────┘
//! ```
//!
//! This type only tracks state and deadlines. The coordinator feeds it
//! observations from storage and broadcast and performs the resulting writes.

use loom_tabsync_core::{claim_precedes, LeaderState, TabId};
use tracing::debug;

/// Per-tab election state.
#[derive(Debug, Clone)]
pub struct LeaderElection {
	state: LeaderState,
	deadline: Option<i64>,
	known_leader: Option<TabId>,
	rounds: u64,
}

impl LeaderElection {
	pub fn new() -> Self {
		Self {
			state: LeaderState::Follower,
			deadline: None,
			known_leader: None,
			rounds: 0,
		}
	}

	pub fn state(&self) -> LeaderState {
		self.state
	}

	pub fn is_leader(&self) -> bool {
		self.state == LeaderState::Leader
	}

	pub fn is_electing(&self) -> bool {
		self.state == LeaderState::Electing
	}

	pub fn deadline(&self) -> Option<i64> {
		self.deadline
	}

	/// The last leader this tab followed, if any.
	pub fn known_leader(&self) -> Option<TabId> {
		self.known_leader
	}

	/// Number of elections this tab has started.
	pub fn rounds(&self) -> u64 {
		self.rounds
	}

	/// Enters `Electing` with a deadline `window_ms` from `now`.
	///
	/// Returns false if an election is already running; its deadline is kept
	/// so repeated triggers cannot postpone the claim forever.
	pub fn begin(&mut self, now: i64, window_ms: i64) -> bool {
		if self.is_electing() {
			return false;
		}
		self.state = LeaderState::Electing;
		self.deadline = Some(now.saturating_add(window_ms));
		self.known_leader = None;
		self.rounds += 1;
		debug!(round = self.rounds, window_ms, "Election started");
		true
	}

	/// True once the election window has elapsed without a leader.
	pub fn deadline_passed(&self, now: i64) -> bool {
		self.is_electing() && self.deadline.is_some_and(|d| now >= d)
	}

	/// Records another tab acting as leader.
	///
	/// An electing tab becomes a follower. A leader is not affected here; use
	/// [`LeaderElection::should_yield`] to settle a double claim.
	pub fn observe_leader(&mut self, leader: TabId) {
		match self.state {
			LeaderState::Electing | LeaderState::Follower => {
				self.state = LeaderState::Follower;
				self.deadline = None;
				self.known_leader = Some(leader);
			}
			LeaderState::Leader => {}
		}
	}

	/// Takes leadership.
	pub fn claim(&mut self) {
		self.state = LeaderState::Leader;
		self.deadline = None;
		self.known_leader = None;
	}

	/// Gives up leadership, optionally in favour of a known leader.
	pub fn demote(&mut self, leader: Option<TabId>) {
		self.state = LeaderState::Follower;
		self.deadline = None;
		self.known_leader = leader;
	}

	/// Whether a leader with claim `own` must step down for `other`.
	///
	/// Claims are `(tab_start_time, tab_id)`; the earlier start wins and ties
	/// go to the smaller id.
	pub fn should_yield(own: (i64, TabId), other: (i64, TabId)) -> bool {
		other.1 != own.1 && claim_precedes(other, own)
	}
}

impl Default for LeaderElection {
	fn default() -> Self {
		Self::new()
	}
}
