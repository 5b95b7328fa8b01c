// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the tab sync core.

use thiserror::Error;

/// Errors raised while validating configuration handed over by the init layer.
///
/// These are the only errors that are fatal: the SDK does not start when one
/// of them is returned.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// `sessionTimeout` was present but not a finite number.
	#[error("sessionTimeout must be a number, got {found}")]
	SessionTimeoutNotANumber { found: &'static str },

	/// `sessionTimeout` was a number outside the accepted bounds.
	#[error("sessionTimeout must be between {min} and {max} ms, got {value}")]
	SessionTimeoutOutOfRange { value: f64, min: i64, max: i64 },

	/// The options value itself was not an object.
	#[error("session options must be an object, got {found}")]
	InvalidOptions { found: &'static str },

	/// No project ID was supplied.
	#[error("project ID is required")]
	MissingProjectId,

	/// The project ID cannot be used as a storage namespace.
	#[error("invalid project ID '{0}': must be non-empty and contain no ':' or whitespace")]
	InvalidProjectId(String),

	/// Coordination timings violate their required ordering.
	#[error("invalid coordination timing: {0}")]
	InvalidTiming(String),
}

/// Errors for persisted records, identifiers and broadcast messages.
#[derive(Debug, Error)]
pub enum RecordError {
	/// A string could not be parsed as a UUID.
	#[error("invalid id: {0}")]
	InvalidId(String),

	/// A UUID had a version other than 4.
	#[error("unsupported UUID version {found} for {id}, expected 4")]
	UnsupportedIdVersion { id: String, found: usize },

	/// A record violates one of its invariants.
	#[error("invalid record: {0}")]
	InvalidRecord(String),

	/// A broadcast message was well-formed JSON but semantically invalid.
	#[error("invalid coordination message: {0}")]
	InvalidMessage(String),

	/// JSON (de)serialization failed.
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// Returns the JavaScript-style type name of a JSON value, for error messages.
pub fn json_type_name(value: &serde_json::Value) -> &'static str {
	match value {
		serde_json::Value::Null => "null",
		serde_json::Value::Bool(_) => "boolean",
		serde_json::Value::Number(_) => "number",
		serde_json::Value::String(_) => "string",
		serde_json::Value::Array(_) => "array",
		serde_json::Value::Object(_) => "object",
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_out_of_range_message_mentions_session_timeout() {
		let err = ConfigError::SessionTimeoutOutOfRange {
			value: 15000.0,
			min: 30_000,
			max: 86_400_000,
		};
		let msg = err.to_string();
		assert!(msg.contains("sessionTimeout"));
		assert!(msg.contains("15000"));
	}

	#[test]
	fn test_json_type_names() {
		assert_eq!(json_type_name(&json!(null)), "null");
		assert_eq!(json_type_name(&json!("x")), "string");
		assert_eq!(json_type_name(&json!(1)), "number");
		assert_eq!(json_type_name(&json!([])), "array");
		assert_eq!(json_type_name(&json!({})), "object");
		assert_eq!(json_type_name(&json!(true)), "boolean");
	}
}
