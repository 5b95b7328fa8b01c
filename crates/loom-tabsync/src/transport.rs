// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Broadcast transport between tabs.
//!
//! A [`Transport`] delivers [`CoordinationMessage`]s to every other tab of the
//! same project. Delivery is best-effort: the protocol converges through
//! storage polling alone, broadcasting only makes it faster. Hosts without a
//! broadcast primitive use [`NoopTransport`].

use std::collections::HashMap;
use std::sync::Arc;

use loom_tabsync_core::{CoordinationMessage, TabId};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::{debug, warn};

use crate::error::TransportError;

/// Default number of undelivered messages a channel buffers per subscriber.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// A pub/sub channel shared by the tabs of one project.
///
/// The subscription is established when the transport is opened; received
/// messages are pulled with [`Transport::drain`], which never returns this
/// tab's own messages.
pub trait Transport: Send {
	/// Sends a message to every other subscribed tab.
	fn publish(&mut self, message: &CoordinationMessage) -> Result<(), TransportError>;

	/// Returns every valid message received since the last call, in send order.
	fn drain(&mut self) -> Vec<CoordinationMessage>;

	/// Releases the subscription. Further publishes fail.
	fn close(&mut self);

	/// Subscribes again after [`Transport::close`]. Messages sent while
	/// closed are not delivered.
	fn reopen(&mut self) {}

	/// False when the host has no broadcast primitive.
	fn is_supported(&self) -> bool;
}

/// Transport for hosts without a broadcast primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransport;

impl Transport for NoopTransport {
	fn publish(&mut self, _message: &CoordinationMessage) -> Result<(), TransportError> {
		Ok(())
	}

	fn drain(&mut self) -> Vec<CoordinationMessage> {
		Vec::new()
	}

	fn close(&mut self) {}

	fn is_supported(&self) -> bool {
		false
	}
}

/// In-process rendezvous point for named broadcast channels.
///
/// Tabs that open the same channel name see each other's messages; other
/// names are fully isolated. Clones share the same channels.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
	channels: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
	capacity: usize,
}

impl BroadcastHub {
	pub fn new() -> Self {
		Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
	}

	pub fn with_capacity(capacity: usize) -> Self {
		Self {
			channels: Arc::new(Mutex::new(HashMap::new())),
			capacity: capacity.max(1),
		}
	}

	fn sender(&self, channel: &str) -> broadcast::Sender<String> {
		self
			.channels
			.lock()
			.entry(channel.to_string())
			.or_insert_with(|| broadcast::channel(self.capacity).0)
			.clone()
	}

	/// Subscribes `tab_id` to `channel`.
	pub fn open(&self, channel: &str, tab_id: TabId) -> BroadcastChannel {
		let sender = self.sender(channel);
		let receiver = sender.subscribe();
		debug!(channel, tab_id = %tab_id, "Opened broadcast channel");
		BroadcastChannel {
			name: channel.to_string(),
			tab_id,
			sender,
			receiver: Some(receiver),
		}
	}

	/// Injects a raw payload, e.g. one bridged from a host's native channel.
	///
	/// The payload is validated by each receiver like any other message.
	/// Returns the number of subscribers it reached.
	pub fn publish_raw(&self, channel: &str, raw: impl Into<String>) -> usize {
		self.sender(channel).send(raw.into()).unwrap_or(0)
	}

	pub fn subscriber_count(&self, channel: &str) -> usize {
		self
			.channels
			.lock()
			.get(channel)
			.map(|s| s.receiver_count())
			.unwrap_or(0)
	}
}

impl Default for BroadcastHub {
	fn default() -> Self {
		Self::new()
	}
}

/// One tab's subscription to a [`BroadcastHub`] channel.
pub struct BroadcastChannel {
	name: String,
	tab_id: TabId,
	sender: broadcast::Sender<String>,
	receiver: Option<broadcast::Receiver<String>>,
}

impl BroadcastChannel {
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn is_closed(&self) -> bool {
		self.receiver.is_none()
	}
}

impl Transport for BroadcastChannel {
	fn publish(&mut self, message: &CoordinationMessage) -> Result<(), TransportError> {
		if self.receiver.is_none() {
			return Err(TransportError::Closed);
		}
		let raw = message
			.encode()
			.map_err(|e| TransportError::Encode(e.to_string()))?;
		// Only fails when nobody is subscribed, which is not an error here.
		let _ = self.sender.send(raw);
		Ok(())
	}

	fn drain(&mut self) -> Vec<CoordinationMessage> {
		let Some(receiver) = self.receiver.as_mut() else {
			return Vec::new();
		};

		let mut messages = Vec::new();
		loop {
			match receiver.try_recv() {
				Ok(raw) => match CoordinationMessage::decode(&raw) {
					Ok(message) if message.tab_id == self.tab_id => {}
					Ok(message) => messages.push(message),
					Err(e) => {
						debug!(channel = %self.name, error = %e, "Dropping malformed broadcast message");
					}
				},
				Err(TryRecvError::Lagged(skipped)) => {
					warn!(channel = %self.name, skipped, "Broadcast receiver lagged, messages dropped");
				}
				Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
			}
		}
		messages
	}

	fn close(&mut self) {
		if self.receiver.take().is_some() {
			debug!(channel = %self.name, tab_id = %self.tab_id, "Closed broadcast channel");
		}
	}

	fn reopen(&mut self) {
		if self.receiver.is_none() {
			self.receiver = Some(self.sender.subscribe());
			debug!(channel = %self.name, tab_id = %self.tab_id, "Reopened broadcast channel");
		}
	}

	fn is_supported(&self) -> bool {
		true
	}
}
