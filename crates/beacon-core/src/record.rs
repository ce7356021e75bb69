// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

/// A single serialized telemetry event.
///
/// The delivery pipeline never looks inside a record. It has no identity
/// beyond its position in the queue and is only removed from local storage
/// once the collector has acknowledged it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventRecord(String);

impl EventRecord {
	pub fn new(serialized: impl Into<String>) -> Self {
		Self(serialized.into())
	}

	/// Serialized size in bytes.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn into_string(self) -> String {
		self.0
	}
}

impl From<String> for EventRecord {
	fn from(s: String) -> Self {
		Self(s)
	}
}

impl From<&str> for EventRecord {
	fn from(s: &str) -> Self {
		Self(s.to_string())
	}
}

impl AsRef<str> for EventRecord {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

impl std::fmt::Display for EventRecord {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}
