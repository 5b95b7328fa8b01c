// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session options and coordination timings.

use std::time::Duration;

use serde_json::Value;

use crate::error::{json_type_name, ConfigError};

/// Smallest accepted session timeout (30 seconds).
pub const MIN_SESSION_TIMEOUT_MS: i64 = 30_000;
/// Largest accepted session timeout (24 hours).
pub const MAX_SESSION_TIMEOUT_MS: i64 = 86_400_000;
/// Session timeout used when the init layer does not provide one (15 minutes).
pub const DEFAULT_SESSION_TIMEOUT_MS: i64 = 900_000;

/// Options consumed from the SDK init layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
	session_timeout_ms: i64,
}

impl SessionOptions {
	/// Creates options with an explicit timeout, validating its range.
	pub fn new(session_timeout_ms: i64) -> Result<Self, ConfigError> {
		validate_session_timeout(session_timeout_ms as f64)?;
		Ok(Self { session_timeout_ms })
	}

	/// Parses the init layer's `{ sessionTimeout?: number }` object.
	///
	/// A missing `sessionTimeout` falls back to the default. Any present value
	/// that is not a finite number within bounds is rejected; nothing is
	/// clamped. Fractional milliseconds are truncated.
	pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
		let object = match value {
			Value::Object(map) => map,
			other => {
				return Err(ConfigError::InvalidOptions {
					found: json_type_name(other),
				})
			}
		};

		match object.get("sessionTimeout") {
			None => Ok(Self::default()),
			Some(Value::Number(n)) => {
				let ms = n.as_f64().ok_or(ConfigError::SessionTimeoutNotANumber {
					found: "number",
				})?;
				validate_session_timeout(ms)?;
				Ok(Self {
					session_timeout_ms: ms.trunc() as i64,
				})
			}
			Some(other) => Err(ConfigError::SessionTimeoutNotANumber {
				found: json_type_name(other),
			}),
		}
	}

	pub fn session_timeout_ms(&self) -> i64 {
		self.session_timeout_ms
	}

	pub fn session_timeout(&self) -> Duration {
		Duration::from_millis(self.session_timeout_ms as u64)
	}
}

impl Default for SessionOptions {
	fn default() -> Self {
		Self {
			session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
		}
	}
}

/// Checks a timeout in milliseconds against the accepted bounds.
pub fn validate_session_timeout(ms: f64) -> Result<(), ConfigError> {
	if !ms.is_finite() {
		return Err(ConfigError::SessionTimeoutNotANumber { found: "NaN" });
	}
	if ms < MIN_SESSION_TIMEOUT_MS as f64 || ms > MAX_SESSION_TIMEOUT_MS as f64 {
		return Err(ConfigError::SessionTimeoutOutOfRange {
			value: ms,
			min: MIN_SESSION_TIMEOUT_MS,
			max: MAX_SESSION_TIMEOUT_MS,
		});
	}
	Ok(())
}

/// Timers and bounds of the coordination protocol.
///
/// The absolute values are tunable; `validate` only enforces the orderings the
/// protocol depends on (heartbeats well inside the staleness threshold, the
/// election window shorter than it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinationConfig {
	/// How often a tab refreshes its record and broadcasts a heartbeat.
	pub heartbeat_interval: Duration,
	/// A tab whose heartbeat is older than this is considered dead.
	pub tab_stale_after: Duration,
	/// How long an electing tab waits for an existing leader.
	pub election_window: Duration,
	/// Random extra wait added to each election window.
	pub election_jitter: Duration,
	/// How long a hidden page stays hidden before it is torn down.
	pub hidden_teardown_delay: Duration,
	/// Recovery entries older than this are never resumed.
	pub max_session_timeout: Duration,
	/// Resumptions allowed per session before its entry is discarded.
	pub max_recovery_attempts: u32,
	/// Recovery entries kept in storage.
	pub max_recovery_entries: usize,
}

impl Default for CoordinationConfig {
	fn default() -> Self {
		Self {
			heartbeat_interval: Duration::from_millis(1_000),
			tab_stale_after: Duration::from_millis(5_000),
			election_window: Duration::from_millis(300),
			election_jitter: Duration::from_millis(150),
			hidden_teardown_delay: Duration::from_secs(30),
			max_session_timeout: Duration::from_millis(MAX_SESSION_TIMEOUT_MS as u64),
			max_recovery_attempts: 3,
			max_recovery_entries: 5,
		}
	}
}

impl CoordinationConfig {
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.heartbeat_interval.is_zero() {
			return Err(ConfigError::InvalidTiming(
				"heartbeat interval must be positive".to_string(),
			));
		}
		if self.heartbeat_interval * 2 > self.tab_stale_after {
			return Err(ConfigError::InvalidTiming(format!(
				"heartbeat interval {:?} must be at most half the staleness threshold {:?}",
				self.heartbeat_interval, self.tab_stale_after
			)));
		}
		if self.election_window.is_zero() {
			return Err(ConfigError::InvalidTiming(
				"election window must be positive".to_string(),
			));
		}
		if self.election_window + self.election_jitter >= self.tab_stale_after {
			return Err(ConfigError::InvalidTiming(format!(
				"election window {:?} plus jitter {:?} must be shorter than the staleness threshold {:?}",
				self.election_window, self.election_jitter, self.tab_stale_after
			)));
		}
		if self.max_recovery_attempts == 0 {
			return Err(ConfigError::InvalidTiming(
				"max recovery attempts must be at least 1".to_string(),
			));
		}
		let max_ms = duration_ms(self.max_session_timeout);
		if !(MIN_SESSION_TIMEOUT_MS..=MAX_SESSION_TIMEOUT_MS).contains(&max_ms) {
			return Err(ConfigError::InvalidTiming(format!(
				"max session timeout {max_ms} ms is outside [{MIN_SESSION_TIMEOUT_MS}, {MAX_SESSION_TIMEOUT_MS}]"
			)));
		}
		Ok(())
	}

	pub fn heartbeat_interval_ms(&self) -> i64 {
		duration_ms(self.heartbeat_interval)
	}

	pub fn tab_stale_after_ms(&self) -> i64 {
		duration_ms(self.tab_stale_after)
	}

	pub fn hidden_teardown_delay_ms(&self) -> i64 {
		duration_ms(self.hidden_teardown_delay)
	}

	pub fn max_session_timeout_ms(&self) -> i64 {
		duration_ms(self.max_session_timeout)
	}

	/// Picks the length of one election window, jitter included.
	pub fn election_window_ms(&self, jitter_sample: f64) -> i64 {
		let jitter = duration_ms(self.election_jitter) as f64 * jitter_sample.clamp(0.0, 1.0);
		duration_ms(self.election_window) + jitter as i64
	}
}

/// Converts a duration to whole milliseconds, saturating at `i64::MAX`.
pub fn duration_ms(duration: Duration) -> i64 {
	i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use serde_json::json;

	#[test]
	fn test_default_timeout() {
		let options = SessionOptions::from_value(&json!({})).unwrap();
		assert_eq!(options.session_timeout_ms(), DEFAULT_SESSION_TIMEOUT_MS);
		assert_eq!(SessionOptions::default().session_timeout_ms(), 900_000);
	}

	#[test]
	fn test_accepts_bounds_inclusive() {
		assert!(SessionOptions::from_value(&json!({ "sessionTimeout": 30_000 })).is_ok());
		assert!(SessionOptions::from_value(&json!({ "sessionTimeout": 86_400_000 })).is_ok());
		assert!(SessionOptions::from_value(&json!({ "sessionTimeout": 900_000 })).is_ok());
	}

	#[test]
	fn test_rejects_too_short() {
		let err = SessionOptions::from_value(&json!({ "sessionTimeout": 15_000 })).unwrap_err();
		assert!(matches!(err, ConfigError::SessionTimeoutOutOfRange { .. }));
		let msg = err.to_string();
		assert!(msg.contains("sessionTimeout") || msg.contains("timeout"));
	}

	#[test]
	fn test_rejects_too_long() {
		let err = SessionOptions::from_value(&json!({ "sessionTimeout": 86_400_001 })).unwrap_err();
		assert!(matches!(err, ConfigError::SessionTimeoutOutOfRange { .. }));
	}

	#[test]
	fn test_rejects_non_numbers() {
		for value in [json!("900000"), json!(true), json!(null), json!([900000]), json!({})] {
			let err =
				SessionOptions::from_value(&json!({ "sessionTimeout": value.clone() })).unwrap_err();
			assert!(
				matches!(err, ConfigError::SessionTimeoutNotANumber { .. }),
				"unexpected error for {value}: {err}"
			);
		}
	}

	#[test]
	fn test_rejects_non_object_options() {
		let err = SessionOptions::from_value(&json!(900000)).unwrap_err();
		assert!(matches!(err, ConfigError::InvalidOptions { found: "number" }));
	}

	#[test]
	fn test_truncates_fractional_milliseconds() {
		let options = SessionOptions::from_value(&json!({ "sessionTimeout": 60_000.75 })).unwrap();
		assert_eq!(options.session_timeout_ms(), 60_000);
	}

	#[test]
	fn test_rejects_nan() {
		assert!(validate_session_timeout(f64::NAN).is_err());
		assert!(validate_session_timeout(f64::INFINITY).is_err());
	}

	#[test]
	fn test_default_coordination_config_is_valid() {
		assert!(CoordinationConfig::default().validate().is_ok());
	}

	#[test]
	fn test_heartbeat_must_be_well_inside_staleness() {
		let config = CoordinationConfig {
			heartbeat_interval: Duration::from_millis(3_000),
			tab_stale_after: Duration::from_millis(5_000),
			..Default::default()
		};
		assert!(matches!(config.validate(), Err(ConfigError::InvalidTiming(_))));
	}

	#[test]
	fn test_election_window_must_be_shorter_than_staleness() {
		let config = CoordinationConfig {
			election_window: Duration::from_millis(5_000),
			..Default::default()
		};
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_election_window_jitter() {
		let config = CoordinationConfig::default();
		assert_eq!(config.election_window_ms(0.0), 300);
		assert_eq!(config.election_window_ms(1.0), 450);
		assert_eq!(config.election_window_ms(7.0), 450);
	}

	proptest! {
		#[test]
		fn out_of_range_timeouts_are_rejected(ms in prop_oneof![0i64..MIN_SESSION_TIMEOUT_MS, (MAX_SESSION_TIMEOUT_MS + 1)..i64::MAX / 2]) {
			prop_assert!(SessionOptions::new(ms).is_err());
			let value = json!({ "sessionTimeout": ms });
			prop_assert!(SessionOptions::from_value(&value).is_err());
		}

		#[test]
		fn in_range_timeouts_are_kept_exactly(ms in MIN_SESSION_TIMEOUT_MS..=MAX_SESSION_TIMEOUT_MS) {
			let options = SessionOptions::from_value(&json!({ "sessionTimeout": ms })).unwrap();
			prop_assert_eq!(options.session_timeout_ms(), ms);
		}
	}
}
