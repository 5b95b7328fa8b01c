// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background driver that ticks a coordinator on a tokio interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::coordinator::TabCoordinator;

/// A coordinator shared between the client handle and the driver task.
pub type SharedCoordinator = Arc<Mutex<TabCoordinator>>;

/// Default interval between coordinator ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Runs [`TabCoordinator::tick`] periodically in a background task.
///
/// The task stops on [`SessionDriver::stop`] or once the tab has been torn
/// down.
#[derive(Debug, Default)]
pub struct SessionDriver {
	running: Arc<AtomicBool>,
	task_handle: Option<JoinHandle<()>>,
	shutdown_tx: Option<mpsc::Sender<()>>,
}

impl SessionDriver {
	pub fn new() -> Self {
		Self::default()
	}

	/// Spawns the tick loop. A loop that is already running is stopped first.
	///
	/// Must be called from within a tokio runtime.
	pub async fn start(&mut self, coordinator: SharedCoordinator, tick_interval: Duration) {
		self.stop().await;

		let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
		self.shutdown_tx = Some(shutdown_tx);
		self.running.store(true, Ordering::SeqCst);

		let running = Arc::clone(&self.running);
		let handle = tokio::spawn(async move {
			run_driver_loop(coordinator, tick_interval, shutdown_rx).await;
			running.store(false, Ordering::SeqCst);
		});
		self.task_handle = Some(handle);
	}

	/// Stops the tick loop and waits for it to finish.
	pub async fn stop(&mut self) {
		if let Some(tx) = self.shutdown_tx.take() {
			let _ = tx.send(()).await;
		}
		if let Some(handle) = self.task_handle.take() {
			let _ = handle.await;
		}
		self.running.store(false, Ordering::SeqCst);
	}

	pub fn is_running(&self) -> bool {
		self.running.load(Ordering::SeqCst)
	}
}

async fn run_driver_loop(
	coordinator: SharedCoordinator,
	tick_interval: Duration,
	mut shutdown_rx: mpsc::Receiver<()>,
) {
	let tab_id = coordinator.lock().tab_id();
	let mut ticker = tokio::time::interval(tick_interval);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	info!(
		tab_id = %tab_id,
		tick_interval_ms = tick_interval.as_millis() as u64,
		"Starting session driver"
	);

	loop {
		tokio::select! {
			_ = ticker.tick() => {
				let closed = {
					let mut coordinator = coordinator.lock();
					coordinator.tick();
					coordinator.is_closed()
				};
				if closed {
					debug!(tab_id = %tab_id, "Tab closed");
					break;
				}
			}
			_ = shutdown_rx.recv() => {
				debug!(tab_id = %tab_id, "Session driver received shutdown signal");
				break;
			}
		}
	}

	info!(tab_id = %tab_id, "Session driver stopped");
}
