// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Project-scoped storage keys and broadcast channel name.
//!
//! | Key | Contents |
//! |-----|----------|
//! | `tl:{project}:session` | legacy single-tab session view |
//! | `tl:{project}:cross_tab_session` | canonical [`SessionRecord`](crate::SessionRecord) |
//! | `tl:{project}:tab:{tab}:info` | one [`TabRecord`](crate::TabRecord) per open tab |
//! | `tl:{project}:recovery` | list of [`RecoveryEntry`](crate::RecoveryEntry) |
//!
//! The broadcast channel is `tl:{project}:broadcast`.

use crate::error::ConfigError;
use crate::ids::TabId;

/// Namespace shared by every key this SDK writes.
pub const KEY_NAMESPACE: &str = "tl";

/// Builds the storage keys for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
	project_id: String,
	prefix: String,
}

impl StorageKeys {
	pub fn new(project_id: impl Into<String>) -> Result<Self, ConfigError> {
		let project_id = project_id.into();
		if project_id.is_empty() {
			return Err(ConfigError::MissingProjectId);
		}
		if project_id.contains(':') || project_id.chars().any(char::is_whitespace) {
			return Err(ConfigError::InvalidProjectId(project_id));
		}

		let prefix = format!("{KEY_NAMESPACE}:{project_id}:");
		Ok(Self { project_id, prefix })
	}

	pub fn project_id(&self) -> &str {
		&self.project_id
	}

	/// Prefix of every key belonging to this project.
	pub fn prefix(&self) -> &str {
		&self.prefix
	}

	pub fn session(&self) -> String {
		format!("{}session", self.prefix)
	}

	pub fn cross_tab_session(&self) -> String {
		format!("{}cross_tab_session", self.prefix)
	}

	pub fn recovery(&self) -> String {
		format!("{}recovery", self.prefix)
	}

	pub fn tab_prefix(&self) -> String {
		format!("{}tab:", self.prefix)
	}

	pub fn tab_info(&self, tab_id: &TabId) -> String {
		format!("{}tab:{tab_id}:info", self.prefix)
	}

	/// Extracts the tab id from a `tab:{id}:info` key of this project.
	pub fn parse_tab_key(&self, key: &str) -> Option<TabId> {
		key.strip_prefix(&self.tab_prefix())?
			.strip_suffix(":info")?
			.parse()
			.ok()
	}

	pub fn broadcast_channel(&self) -> String {
		format!("{}broadcast", self.prefix)
	}
}
