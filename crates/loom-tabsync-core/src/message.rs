// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Broadcast messages exchanged between tabs.
//!
//! Messages are never persisted. On the wire they are flat JSON objects:
//!
//! ```json
//! {"type":"heartbeat","tabId":"…","timestamp":1700000000000,"sessionId":"…",
//!  "isLeader":true,"tabStartTime":1699999990000}
//! ```
//!
//! Every payload received from the channel goes through [`CoordinationMessage::decode`];
//! unknown types and malformed payloads are rejected there and never reach the
//! protocol.

use serde::{Deserialize, Serialize};

use crate::error::RecordError;
use crate::ids::{SessionId, TabId};

/// A message broadcast by one tab to every other tab of the same project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinationMessage {
	pub tab_id: TabId,
	pub timestamp: i64,
	#[serde(default)]
	pub session_id: Option<SessionId>,
	#[serde(flatten)]
	pub body: MessageBody,
}

/// Type-specific part of a [`CoordinationMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
	tag = "type",
	rename_all = "snake_case",
	rename_all_fields = "camelCase"
)]
pub enum MessageBody {
	/// Periodic liveness signal.
	Heartbeat {
		is_leader: bool,
		tab_start_time: i64,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		last_activity: Option<i64>,
	},
	/// A tab is looking for the current leader.
	ElectionRequest { tab_start_time: i64 },
	/// The current leader answering an election request.
	ElectionResponse { tab_start_time: i64 },
	/// A tab created a new session.
	SessionStart { start_time: i64 },
	/// A tab is closing cleanly.
	TabClosing { was_leader: bool },
}

impl MessageBody {
	/// Returns the wire name of the message type.
	pub fn message_type(&self) -> &'static str {
		match self {
			MessageBody::Heartbeat { .. } => "heartbeat",
			MessageBody::ElectionRequest { .. } => "election_request",
			MessageBody::ElectionResponse { .. } => "election_response",
			MessageBody::SessionStart { .. } => "session_start",
			MessageBody::TabClosing { .. } => "tab_closing",
		}
	}
}

impl CoordinationMessage {
	pub fn heartbeat(
		tab_id: TabId,
		timestamp: i64,
		session_id: Option<SessionId>,
		is_leader: bool,
		tab_start_time: i64,
		last_activity: Option<i64>,
	) -> Self {
		Self {
			tab_id,
			timestamp,
			session_id,
			body: MessageBody::Heartbeat {
				is_leader,
				tab_start_time,
				last_activity,
			},
		}
	}

	pub fn election_request(tab_id: TabId, timestamp: i64, tab_start_time: i64) -> Self {
		Self {
			tab_id,
			timestamp,
			session_id: None,
			body: MessageBody::ElectionRequest { tab_start_time },
		}
	}

	pub fn election_response(
		tab_id: TabId,
		timestamp: i64,
		session_id: Option<SessionId>,
		tab_start_time: i64,
	) -> Self {
		Self {
			tab_id,
			timestamp,
			session_id,
			body: MessageBody::ElectionResponse { tab_start_time },
		}
	}

	pub fn session_start(
		tab_id: TabId,
		timestamp: i64,
		session_id: SessionId,
		start_time: i64,
	) -> Self {
		Self {
			tab_id,
			timestamp,
			session_id: Some(session_id),
			body: MessageBody::SessionStart { start_time },
		}
	}

	pub fn tab_closing(
		tab_id: TabId,
		timestamp: i64,
		session_id: Option<SessionId>,
		was_leader: bool,
	) -> Self {
		Self {
			tab_id,
			timestamp,
			session_id,
			body: MessageBody::TabClosing { was_leader },
		}
	}

	pub fn message_type(&self) -> &'static str {
		self.body.message_type()
	}

	/// Serializes the message for the broadcast channel.
	pub fn encode(&self) -> Result<String, RecordError> {
		Ok(serde_json::to_string(self)?)
	}

	/// Parses and validates a payload received from the broadcast channel.
	pub fn decode(raw: &str) -> Result<Self, RecordError> {
		let message: CoordinationMessage = serde_json::from_str(raw)?;
		message.validate()?;
		Ok(message)
	}

	/// Checks the semantic constraints JSON parsing cannot express.
	pub fn validate(&self) -> Result<(), RecordError> {
		if self.timestamp <= 0 {
			return Err(RecordError::InvalidMessage(format!(
				"{} has non-positive timestamp {}",
				self.message_type(),
				self.timestamp
			)));
		}

		match &self.body {
			MessageBody::Heartbeat {
				tab_start_time,
				last_activity,
				..
			} => {
				check_time(self.message_type(), "tabStartTime", *tab_start_time)?;
				if let Some(at) = last_activity {
					check_time(self.message_type(), "lastActivity", *at)?;
				}
			}
			MessageBody::ElectionRequest { tab_start_time }
			| MessageBody::ElectionResponse { tab_start_time } => {
				check_time(self.message_type(), "tabStartTime", *tab_start_time)?;
			}
			MessageBody::SessionStart { start_time } => {
				check_time(self.message_type(), "startTime", *start_time)?;
				if self.session_id.is_none() {
					return Err(RecordError::InvalidMessage(
						"session_start without sessionId".to_string(),
					));
				}
			}
			MessageBody::TabClosing { .. } => {}
		}

		Ok(())
	}
}

fn check_time(message_type: &str, field: &str, value: i64) -> Result<(), RecordError> {
	if value <= 0 {
		return Err(RecordError::InvalidMessage(format!(
			"{message_type} has non-positive {field} {value}"
		)));
	}
	Ok(())
}
