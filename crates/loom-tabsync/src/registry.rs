// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tab registry.
//!
//! Each tab advertises itself with a [`TabRecord`] under
//! `tl:{project}:tab:{id}:info` and refreshes it on every heartbeat. Peers
//! treat a record whose heartbeat is older than the staleness threshold as a
//! dead tab and prune it.

use std::collections::HashMap;

use loom_tabsync_core::{TabId, TabRecord};
use tracing::{debug, info};

use crate::storage::SharedStorage;

/// This tab's identity plus its view of the other tabs.
#[derive(Debug)]
pub struct TabRegistry {
	record: TabRecord,
	registered: bool,
	/// Tabs that announced `tab_closing`, with when we heard it.
	departed: HashMap<TabId, i64>,
	stale_after_ms: i64,
}

impl TabRegistry {
	pub fn new(tab_id: TabId, now: i64, stale_after_ms: i64) -> Self {
		Self {
			record: TabRecord::new(tab_id, now),
			registered: false,
			departed: HashMap::new(),
			stale_after_ms,
		}
	}

	pub fn tab_id(&self) -> TabId {
		self.record.id
	}

	pub fn start_time(&self) -> i64 {
		self.record.start_time
	}

	pub fn record(&self) -> &TabRecord {
		&self.record
	}

	pub fn is_registered(&self) -> bool {
		self.registered
	}

	/// Persists this tab's record. Returns false if the write failed.
	pub fn register(&mut self, storage: &SharedStorage, now: i64) -> bool {
		self.record.last_heartbeat = now;
		self.registered = self.write(storage);
		if self.registered {
			info!(tab_id = %self.record.id, "Registered tab");
		}
		self.registered
	}

	/// Refreshes this tab's record.
	///
	/// Rewrites the whole record, so a tab that peers pruned while it was
	/// suspended comes back on its next heartbeat.
	pub fn heartbeat(
		&mut self,
		storage: &SharedStorage,
		now: i64,
		last_activity: Option<i64>,
	) -> bool {
		self.record.last_heartbeat = now;
		if last_activity.is_some() {
			self.record.last_activity = last_activity;
		}
		self.registered = self.write(storage);
		self.registered
	}

	pub fn set_leader(&mut self, storage: &SharedStorage, is_leader: bool) -> bool {
		self.record.is_leader = is_leader;
		self.write(storage)
	}

	/// Removes this tab's record.
	pub fn unregister(&mut self, storage: &SharedStorage) -> bool {
		self.record.is_leader = false;
		self.registered = false;
		let key = storage.keys().tab_info(&self.record.id);
		let removed = storage.remove(&key);
		debug!(tab_id = %self.record.id, removed, "Unregistered tab");
		removed
	}

	/// Restarts this tab's page life under the same id.
	pub fn reset(&mut self, now: i64) {
		self.record = TabRecord::new(self.record.id, now);
		self.registered = false;
	}

	fn write(&self, storage: &SharedStorage) -> bool {
		let key = storage.keys().tab_info(&self.record.id);
		storage.set_json(&key, &self.record)
	}

	/// Excludes `tab_id` from the live set until it heartbeats again.
	pub fn mark_departed(&mut self, tab_id: TabId, now: i64) {
		if tab_id != self.record.id {
			self.departed.insert(tab_id, now);
		}
	}

	/// A departed tab that heartbeats after its announcement is alive again.
	pub fn observe_alive(&mut self, tab_id: TabId, heartbeat_at: i64) {
		if let Some(&departed_at) = self.departed.get(&tab_id) {
			if heartbeat_at > departed_at {
				self.departed.remove(&tab_id);
			}
		}
	}

	fn is_departed(&self, record: &TabRecord) -> bool {
		self
			.departed
			.get(&record.id)
			.is_some_and(|&at| record.last_heartbeat <= at)
	}

	/// Reads every well-formed tab record of the project, stale ones included.
	pub fn scan(&self, storage: &SharedStorage) -> Vec<TabRecord> {
		let keys = storage.keys();
		storage
			.scan_by_prefix(&keys.tab_prefix())
			.into_iter()
			.filter_map(|(key, raw)| {
				let id = keys.parse_tab_key(&key)?;
				let record: TabRecord = serde_json::from_str(&raw).ok()?;
				(record.id == id).then_some(record)
			})
			.collect()
	}

	/// Tabs with a fresh heartbeat that have not announced their departure,
	/// ordered by leadership precedence.
	///
	/// This tab is always included while registered, using its in-memory
	/// record.
	pub fn live_tabs(&self, storage: &SharedStorage, now: i64) -> Vec<TabRecord> {
		let mut live: Vec<TabRecord> = self
			.scan(storage)
			.into_iter()
			.filter(|r| r.id != self.record.id)
			.filter(|r| !r.is_stale(now, self.stale_after_ms) && !self.is_departed(r))
			.collect();
		if self.registered {
			live.push(self.record.clone());
		}
		live.sort_by_key(|r| (r.start_time, r.id));
		live
	}

	/// Live tabs other than this one.
	pub fn peers(&self, storage: &SharedStorage, now: i64) -> Vec<TabRecord> {
		let mut peers = self.live_tabs(storage, now);
		peers.retain(|r| r.id != self.record.id);
		peers
	}

	/// The live leader other than this tab with the highest precedence.
	pub fn find_leader(&self, storage: &SharedStorage, now: i64) -> Option<TabRecord> {
		self.peers(storage, now).into_iter().find(|r| r.is_leader)
	}

	/// Removes stale and unreadable tab records. Returns how many were removed.
	pub fn prune(&mut self, storage: &SharedStorage, now: i64) -> usize {
		let keys = storage.keys();
		let mut removed = 0;

		for (key, raw) in storage.scan_by_prefix(&keys.tab_prefix()) {
			let Some(id) = keys.parse_tab_key(&key) else {
				continue;
			};
			if id == self.record.id {
				continue;
			}

			let prune = match serde_json::from_str::<TabRecord>(&raw) {
				Ok(record) => {
					record.id != id
						|| record.is_stale(now, self.stale_after_ms)
						|| self.is_departed(&record)
				}
				Err(_) => true,
			};
			if prune && storage.remove(&key) {
				debug!(tab_id = %id, "Pruned tab record");
				removed += 1;
			}
		}

		let forget_before = now.saturating_sub(self.stale_after_ms.saturating_mul(2));
		self.departed.retain(|_, at| *at >= forget_before);

		if removed > 0 {
			info!(removed, "Pruned stale tabs");
		}
		removed
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::storage::MemoryStore;
	use crate::KeyValueStore;
	use loom_tabsync_core::StorageKeys;

	const NOW: i64 = 1_700_000_000_000;
	const STALE: i64 = 5_000;

	fn storage(store: &MemoryStore) -> SharedStorage {
		SharedStorage::new(Arc::new(store.clone()), StorageKeys::new("proj").unwrap())
	}

	#[test]
	fn test_register_writes_record() {
		let store = MemoryStore::new();
		let storage = storage(&store);
		let mut registry = TabRegistry::new(TabId::new(), NOW, STALE);

		assert!(registry.register(&storage, NOW));
		assert!(registry.is_registered());

		let scanned = registry.scan(&storage);
		assert_eq!(scanned.len(), 1);
		assert_eq!(scanned[0].id, registry.tab_id());
	}

	#[test]
	fn test_register_fails_on_disabled_storage() {
		let store = MemoryStore::new();
		store.set_disabled(true);
		let storage = storage(&store);
		let mut registry = TabRegistry::new(TabId::new(), NOW, STALE);

		assert!(!registry.register(&storage, NOW));
		assert!(!registry.is_registered());
	}

	#[test]
	fn test_live_tabs_excludes_stale_and_departed() {
		let store = MemoryStore::new();
		let storage = storage(&store);
		let mut a = TabRegistry::new(TabId::new(), NOW, STALE);
		let mut b = TabRegistry::new(TabId::new(), NOW, STALE);
		let mut c = TabRegistry::new(TabId::new(), NOW, STALE);
		a.register(&storage, NOW);
		b.register(&storage, NOW);
		c.register(&storage, NOW);

		// c stops heartbeating, b announces departure.
		a.heartbeat(&storage, NOW + 6_000, None);
		b.heartbeat(&storage, NOW + 6_000, None);
		a.mark_departed(b.tab_id(), NOW + 6_000);

		let live = a.live_tabs(&storage, NOW + 6_000);
		assert_eq!(live.len(), 1);
		assert_eq!(live[0].id, a.tab_id());
	}

	#[test]
	fn test_departed_tab_returns_after_new_heartbeat() {
		let store = MemoryStore::new();
		let storage = storage(&store);
		let mut a = TabRegistry::new(TabId::new(), NOW, STALE);
		let mut b = TabRegistry::new(TabId::new(), NOW, STALE);
		a.register(&storage, NOW);
		b.register(&storage, NOW);

		a.mark_departed(b.tab_id(), NOW + 10);
		assert_eq!(a.peers(&storage, NOW + 10).len(), 0);

		b.heartbeat(&storage, NOW + 20, None);
		a.observe_alive(b.tab_id(), NOW + 20);
		assert_eq!(a.peers(&storage, NOW + 20).len(), 1);
	}

	#[test]
	fn test_live_tabs_ordered_by_precedence() {
		let store = MemoryStore::new();
		let storage = storage(&store);
		let mut late = TabRegistry::new(TabId::new(), NOW + 100, STALE);
		let mut early = TabRegistry::new(TabId::new(), NOW, STALE);
		late.register(&storage, NOW + 100);
		early.register(&storage, NOW + 100);

		let live = late.live_tabs(&storage, NOW + 100);
		assert_eq!(live[0].id, early.tab_id());
		assert_eq!(live[1].id, late.tab_id());
	}

	#[test]
	fn test_find_leader_ignores_self() {
		let store = MemoryStore::new();
		let storage = storage(&store);
		let mut a = TabRegistry::new(TabId::new(), NOW, STALE);
		let mut b = TabRegistry::new(TabId::new(), NOW, STALE);
		a.register(&storage, NOW);
		b.register(&storage, NOW);

		a.set_leader(&storage, true);
		assert!(a.find_leader(&storage, NOW).is_none());
		assert_eq!(b.find_leader(&storage, NOW).map(|r| r.id), Some(a.tab_id()));
	}

	#[test]
	fn test_prune_removes_stale_and_corrupt_records() {
		let store = MemoryStore::new();
		let storage = storage(&store);
		let mut a = TabRegistry::new(TabId::new(), NOW, STALE);
		let mut dead = TabRegistry::new(TabId::new(), NOW, STALE);
		a.register(&storage, NOW);
		dead.register(&storage, NOW);
		let garbage = storage.keys().tab_info(&TabId::new());
		store.set(&garbage, "{oops").unwrap();

		a.heartbeat(&storage, NOW + 6_000, None);
		assert_eq!(a.prune(&storage, NOW + 6_000), 2);
		assert_eq!(a.scan(&storage).len(), 1);
	}

	#[test]
	fn test_pruned_tab_reappears_on_heartbeat() {
		let store = MemoryStore::new();
		let storage = storage(&store);
		let mut a = TabRegistry::new(TabId::new(), NOW, STALE);
		let mut sleeper = TabRegistry::new(TabId::new(), NOW, STALE);
		a.register(&storage, NOW);
		sleeper.register(&storage, NOW);

		a.heartbeat(&storage, NOW + 6_000, None);
		a.prune(&storage, NOW + 6_000);
		assert_eq!(a.peers(&storage, NOW + 6_000).len(), 0);

		sleeper.heartbeat(&storage, NOW + 6_100, Some(NOW + 6_100));
		let peers = a.peers(&storage, NOW + 6_100);
		assert_eq!(peers.len(), 1);
		assert_eq!(peers[0].last_activity, Some(NOW + 6_100));
	}

	#[test]
	fn test_unregister_removes_record() {
		let store = MemoryStore::new();
		let storage = storage(&store);
		let mut a = TabRegistry::new(TabId::new(), NOW, STALE);
		a.register(&storage, NOW);

		assert!(a.unregister(&storage));
		assert!(a.scan(&storage).is_empty());
		assert!(a.live_tabs(&storage, NOW).is_empty());
	}
}
