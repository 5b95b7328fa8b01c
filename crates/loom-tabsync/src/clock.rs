// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Time sources.
//!
//! Every timestamp written to shared storage is wall-clock milliseconds since
//! the Unix epoch, so tabs can compare each other's heartbeats.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;

/// Source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync {
	fn now_ms(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now_ms(&self) -> i64 {
		Utc::now().timestamp_millis()
	}
}

/// A clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
	now: Arc<AtomicI64>,
}

impl ManualClock {
	pub fn new(start_ms: i64) -> Self {
		Self {
			now: Arc::new(AtomicI64::new(start_ms)),
		}
	}

	pub fn set(&self, now_ms: i64) {
		self.now.store(now_ms, Ordering::SeqCst);
	}

	pub fn advance(&self, delta_ms: i64) {
		self.now.fetch_add(delta_ms, Ordering::SeqCst);
	}
}

impl Clock for ManualClock {
	fn now_ms(&self) -> i64 {
		self.now.load(Ordering::SeqCst)
	}
}

/// Epoch time derived from tokio's clock.
///
/// Anchored to a fixed origin, then advanced by `tokio::time::Instant`, so
/// it follows paused/advanced time in tokio tests.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
	origin_ms: i64,
	started: tokio::time::Instant,
}

impl TokioClock {
	/// Anchors to the current wall-clock time.
	pub fn new() -> Self {
		Self::with_origin(Utc::now().timestamp_millis())
	}

	pub fn with_origin(origin_ms: i64) -> Self {
		Self {
			origin_ms,
			started: tokio::time::Instant::now(),
		}
	}
}

impl Default for TokioClock {
	fn default() -> Self {
		Self::new()
	}
}

impl Clock for TokioClock {
	fn now_ms(&self) -> i64 {
		let elapsed = i64::try_from(self.started.elapsed().as_millis()).unwrap_or(i64::MAX);
		self.origin_ms.saturating_add(elapsed)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[test]
	fn test_manual_clock_is_shared_between_clones() {
		let clock = ManualClock::new(1_000);
		let other = clock.clone();
		clock.advance(500);
		assert_eq!(other.now_ms(), 1_500);
		other.set(10);
		assert_eq!(clock.now_ms(), 10);
	}

	#[test]
	fn test_system_clock_is_epoch_millis() {
		// 2020-01-01
		assert!(SystemClock.now_ms() > 1_577_836_800_000);
	}

	#[tokio::test(start_paused = true)]
	async fn test_tokio_clock_follows_paused_time() {
		let clock = TokioClock::with_origin(1_000_000);
		assert_eq!(clock.now_ms(), 1_000_000);
		tokio::time::advance(Duration::from_millis(250)).await;
		assert_eq!(clock.now_ms(), 1_000_250);
	}
}
