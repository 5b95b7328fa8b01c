// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-tab state machine states and session end reasons.

use serde::{Deserialize, Serialize};

/// Session lifecycle state as seen by one tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
	/// No session has been observed yet.
	Idle,
	/// A new session is being created and persisted.
	Starting,
	/// A session is running.
	Active,
	/// The session is being terminated.
	Ending,
	/// The session was terminated; the next activity starts a new one.
	Ended,
}

impl SessionState {
	pub fn is_active(&self) -> bool {
		matches!(self, SessionState::Active)
	}
}

impl std::fmt::Display for SessionState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SessionState::Idle => write!(f, "idle"),
			SessionState::Starting => write!(f, "starting"),
			SessionState::Active => write!(f, "active"),
			SessionState::Ending => write!(f, "ending"),
			SessionState::Ended => write!(f, "ended"),
		}
	}
}

/// Leadership state of one tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderState {
	Follower,
	Electing,
	Leader,
}

impl std::fmt::Display for LeaderState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			LeaderState::Follower => write!(f, "follower"),
			LeaderState::Electing => write!(f, "electing"),
			LeaderState::Leader => write!(f, "leader"),
		}
	}
}

/// Why a session ended. Reported to the event sink with `session_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
	/// No activity for longer than the session timeout.
	Timeout,
	/// The last open tab was torn down.
	PageUnload,
	/// The host explicitly ended the session.
	Manual,
}

impl EndReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			EndReason::Timeout => "timeout",
			EndReason::PageUnload => "page_unload",
			EndReason::Manual => "manual",
		}
	}
}

impl std::fmt::Display for EndReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for EndReason {
	type Err = crate::error::RecordError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"timeout" => Ok(EndReason::Timeout),
			"page_unload" => Ok(EndReason::PageUnload),
			"manual" => Ok(EndReason::Manual),
			_ => Err(crate::error::RecordError::InvalidRecord(format!(
				"unknown end reason: {s}"
			))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_end_reason_tags() {
		assert_eq!(EndReason::Timeout.to_string(), "timeout");
		assert_eq!(EndReason::PageUnload.to_string(), "page_unload");
		assert_eq!(EndReason::Manual.to_string(), "manual");
		assert_eq!(
			"page_unload".parse::<EndReason>().unwrap(),
			EndReason::PageUnload
		);
		assert!("crash".parse::<EndReason>().is_err());
	}

	#[test]
	fn test_end_reason_serde_matches_display() {
		let json = serde_json::to_string(&EndReason::PageUnload).unwrap();
		assert_eq!(json, "\"page_unload\"");
	}

	#[test]
	fn test_only_active_is_active() {
		assert!(SessionState::Active.is_active());
		assert!(!SessionState::Ended.is_active());
		assert!(!SessionState::Idle.is_active());
	}
}
