// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Identifiers for sessions and tabs.
//!
//! Both are random (version 4) UUIDs. Parsing rejects any other UUID version,
//! so a corrupted or foreign record can never smuggle an unexpected id into
//! the shared session state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RecordError;

macro_rules! v4_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(Uuid);

		impl $name {
			/// Generates a fresh random identifier.
			#[must_use]
			pub fn new() -> Self {
				Self(Uuid::new_v4())
			}

			/// Wraps an existing UUID, rejecting versions other than 4.
			pub fn from_uuid(uuid: Uuid) -> Result<Self, RecordError> {
				match uuid.get_version_num() {
					4 => Ok(Self(uuid)),
					found => Err(RecordError::UnsupportedIdVersion {
						id: uuid.to_string(),
						found,
					}),
				}
			}

			#[must_use]
			pub fn as_uuid(&self) -> &Uuid {
				&self.0
			}
		}

		impl Default for $name {
			fn default() -> Self {
				Self::new()
			}
		}

		impl std::fmt::Display for $name {
			fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
				write!(f, "{}", self.0.hyphenated())
			}
		}

		impl std::str::FromStr for $name {
			type Err = RecordError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				let uuid = Uuid::parse_str(s).map_err(|_| RecordError::InvalidId(s.to_string()))?;
				Self::from_uuid(uuid)
			}
		}

		impl TryFrom<String> for $name {
			type Error = RecordError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				value.parse()
			}
		}

		impl From<$name> for String {
			fn from(id: $name) -> Self {
				id.to_string()
			}
		}
	};
}

v4_id!(
	/// Identifier of a logical session shared by every tab of a project.
	SessionId
);

v4_id!(
	/// Identifier of a single tab, generated once per tab lifetime.
	TabId
);
