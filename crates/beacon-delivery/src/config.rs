// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Delivery client configuration.
//!
//! Values are layered, lowest precedence first: built-in defaults, an
//! optional TOML file, then `BEACON_DELIVERY_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::store::DEFAULT_MAX_STORAGE_SIZE;

pub const DEFAULT_MAX_SUBMISSION_SIZE: u64 = 100 * 1024;
pub const DEFAULT_MAX_SUBMISSIONS_ALLOWED: usize = 3;
pub const DEFAULT_ENQUEUE_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_SUBMISSION_QUEUE_CAPACITY: usize = 100;
const DEFAULT_MIN_FORCED_SUBMISSION_INTERVAL_SECS: u64 = 60;
const DEFAULT_DIAGNOSTICS_WAIT_MS: u64 = 10_000;

const ENV_PREFIX: &str = "BEACON_DELIVERY_";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file {path}: {source}")]
	FileRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("invalid value {value:?} for {key}: {reason}")]
	InvalidValue {
		key: String,
		value: String,
		reason: String,
	},
}

/// Finalized delivery settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
	/// Maximum cumulative record bytes in one submission.
	pub max_submission_size: u64,
	/// Maximum submissions per delivery cycle.
	pub max_submissions_allowed: usize,
	/// Ceiling on the backing file size.
	pub max_storage_size: u64,
	pub enqueue_queue_capacity: usize,
	pub submission_queue_capacity: usize,
	/// Deliver over metered networks.
	pub allow_wan_delivery: bool,
	pub min_forced_submission_interval: Duration,
	/// Upper bound on how long `batched_events` waits for pending writes.
	pub diagnostics_wait: Duration,
}

impl Default for DeliveryConfig {
	fn default() -> Self {
		Self {
			max_submission_size: DEFAULT_MAX_SUBMISSION_SIZE,
			max_submissions_allowed: DEFAULT_MAX_SUBMISSIONS_ALLOWED,
			max_storage_size: DEFAULT_MAX_STORAGE_SIZE,
			enqueue_queue_capacity: DEFAULT_ENQUEUE_QUEUE_CAPACITY,
			submission_queue_capacity: DEFAULT_SUBMISSION_QUEUE_CAPACITY,
			allow_wan_delivery: true,
			min_forced_submission_interval: Duration::from_secs(
				DEFAULT_MIN_FORCED_SUBMISSION_INTERVAL_SECS,
			),
			diagnostics_wait: Duration::from_millis(DEFAULT_DIAGNOSTICS_WAIT_MS),
		}
	}
}

impl DeliveryConfig {
	/// Loads defaults, then `path` if given and present, then the environment.
	pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
		let mut layer = DeliveryConfigLayer::default();
		if let Some(path) = path {
			layer.merge(DeliveryConfigLayer::from_toml_file(path)?);
		}
		layer.merge(DeliveryConfigLayer::from_env()?);
		layer.finalize()
	}
}

/// Partial configuration; `None` means "not set at this layer".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeliveryConfigLayer {
	pub max_submission_size: Option<u64>,
	pub max_submissions_allowed: Option<usize>,
	pub max_storage_size: Option<u64>,
	pub enqueue_queue_capacity: Option<usize>,
	pub submission_queue_capacity: Option<usize>,
	pub allow_wan_delivery: Option<bool>,
	pub min_forced_submission_interval_secs: Option<u64>,
	pub diagnostics_wait_ms: Option<u64>,
}

impl DeliveryConfigLayer {
	pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
		if !path.exists() {
			debug!(path = %path.display(), "config file not found, skipping");
			return Ok(Self::default());
		}

		let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
			path: path.to_path_buf(),
			source: e,
		})?;

		Self::from_toml_str(&content).map_err(|e| ConfigError::TomlParse {
			path: path.to_path_buf(),
			source: e,
		})
	}

	pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
		toml::from_str(content)
	}

	/// Reads `BEACON_DELIVERY_<FIELD>` variables.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Builds a layer from an arbitrary variable lookup.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
		let get = |field: &str| {
			let key = format!("{ENV_PREFIX}{field}");
			lookup(&key)
				.filter(|v| !v.trim().is_empty())
				.map(|v| (key, v))
		};

		Ok(Self {
			max_submission_size: parse_opt(get("MAX_SUBMISSION_SIZE"))?,
			max_submissions_allowed: parse_opt(get("MAX_SUBMISSIONS_ALLOWED"))?,
			max_storage_size: parse_opt(get("MAX_STORAGE_SIZE"))?,
			enqueue_queue_capacity: parse_opt(get("ENQUEUE_QUEUE_CAPACITY"))?,
			submission_queue_capacity: parse_opt(get("SUBMISSION_QUEUE_CAPACITY"))?,
			allow_wan_delivery: parse_bool_opt(get("ALLOW_WAN"))?,
			min_forced_submission_interval_secs: parse_opt(get(
				"MIN_FORCED_SUBMISSION_INTERVAL_SECS",
			))?,
			diagnostics_wait_ms: parse_opt(get("DIAGNOSTICS_WAIT_MS"))?,
		})
	}

	pub fn merge(&mut self, other: Self) {
		if other.max_submission_size.is_some() {
			self.max_submission_size = other.max_submission_size;
		}
		if other.max_submissions_allowed.is_some() {
			self.max_submissions_allowed = other.max_submissions_allowed;
		}
		if other.max_storage_size.is_some() {
			self.max_storage_size = other.max_storage_size;
		}
		if other.enqueue_queue_capacity.is_some() {
			self.enqueue_queue_capacity = other.enqueue_queue_capacity;
		}
		if other.submission_queue_capacity.is_some() {
			self.submission_queue_capacity = other.submission_queue_capacity;
		}
		if other.allow_wan_delivery.is_some() {
			self.allow_wan_delivery = other.allow_wan_delivery;
		}
		if other.min_forced_submission_interval_secs.is_some() {
			self.min_forced_submission_interval_secs = other.min_forced_submission_interval_secs;
		}
		if other.diagnostics_wait_ms.is_some() {
			self.diagnostics_wait_ms = other.diagnostics_wait_ms;
		}
	}

	pub fn finalize(self) -> Result<DeliveryConfig, ConfigError> {
		let defaults = DeliveryConfig::default();

		let config = DeliveryConfig {
			max_submission_size: self
				.max_submission_size
				.unwrap_or(defaults.max_submission_size),
			max_submissions_allowed: self
				.max_submissions_allowed
				.unwrap_or(defaults.max_submissions_allowed),
			max_storage_size: self.max_storage_size.unwrap_or(defaults.max_storage_size),
			enqueue_queue_capacity: self
				.enqueue_queue_capacity
				.unwrap_or(defaults.enqueue_queue_capacity),
			submission_queue_capacity: self
				.submission_queue_capacity
				.unwrap_or(defaults.submission_queue_capacity),
			allow_wan_delivery: self.allow_wan_delivery.unwrap_or(defaults.allow_wan_delivery),
			min_forced_submission_interval: self
				.min_forced_submission_interval_secs
				.map(Duration::from_secs)
				.unwrap_or(defaults.min_forced_submission_interval),
			diagnostics_wait: self
				.diagnostics_wait_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.diagnostics_wait),
		};

		require_nonzero("max_submission_size", config.max_submission_size)?;
		require_nonzero("max_submissions_allowed", config.max_submissions_allowed as u64)?;
		require_nonzero("max_storage_size", config.max_storage_size)?;
		require_nonzero("enqueue_queue_capacity", config.enqueue_queue_capacity as u64)?;
		require_nonzero(
			"submission_queue_capacity",
			config.submission_queue_capacity as u64,
		)?;

		Ok(config)
	}
}

fn require_nonzero(key: &str, value: u64) -> Result<(), ConfigError> {
	if value == 0 {
		return Err(ConfigError::InvalidValue {
			key: key.to_string(),
			value: "0".to_string(),
			reason: "must be greater than zero".to_string(),
		});
	}
	Ok(())
}

fn parse_opt<T>(entry: Option<(String, String)>) -> Result<Option<T>, ConfigError>
where
	T: std::str::FromStr,
	T::Err: std::fmt::Display,
{
	entry
		.map(|(key, value)| {
			value
				.trim()
				.parse::<T>()
				.map_err(|e| ConfigError::InvalidValue {
					key,
					value: value.clone(),
					reason: e.to_string(),
				})
		})
		.transpose()
}

fn parse_bool_opt(entry: Option<(String, String)>) -> Result<Option<bool>, ConfigError> {
	entry
		.map(|(key, value)| match value.trim().to_ascii_lowercase().as_str() {
			"1" | "true" | "yes" | "on" => Ok(true),
			"0" | "false" | "no" | "off" => Ok(false),
			_ => Err(ConfigError::InvalidValue {
				key,
				value,
				reason: "expected a boolean".to_string(),
			}),
		})
		.transpose()
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;
	use tempfile::TempDir;

	fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map: HashMap<String, String> = vars
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect();
		move |name| map.get(name).cloned()
	}

	#[test]
	fn defaults_match_documented_values() {
		let config = DeliveryConfig::default();
		assert_eq!(config.max_submission_size, 102_400);
		assert_eq!(config.max_submissions_allowed, 3);
		assert_eq!(config.max_storage_size, 5 * 1024 * 1024);
		assert_eq!(config.enqueue_queue_capacity, 1000);
		assert_eq!(config.submission_queue_capacity, 100);
		assert!(config.allow_wan_delivery);
	}

	#[test]
	fn empty_layer_finalizes_to_defaults() {
		let config = DeliveryConfigLayer::default().finalize().unwrap();
		assert_eq!(config, DeliveryConfig::default());
	}

	#[test]
	fn env_overrides_file() {
		let mut layer = DeliveryConfigLayer::from_toml_str(
			r#"
max_submission_size = 2048
max_submissions_allowed = 5
"#,
		)
		.unwrap();
		layer.merge(
			DeliveryConfigLayer::from_lookup(lookup(&[
				("BEACON_DELIVERY_MAX_SUBMISSION_SIZE", "4096"),
				("BEACON_DELIVERY_ALLOW_WAN", "false"),
			]))
			.unwrap(),
		);

		let config = layer.finalize().unwrap();
		assert_eq!(config.max_submission_size, 4096);
		assert_eq!(config.max_submissions_allowed, 5);
		assert!(!config.allow_wan_delivery);
	}

	#[test]
	fn unparseable_env_value_is_rejected() {
		let err = DeliveryConfigLayer::from_lookup(lookup(&[(
			"BEACON_DELIVERY_MAX_STORAGE_SIZE",
			"lots",
		)]))
		.unwrap_err();
		assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "BEACON_DELIVERY_MAX_STORAGE_SIZE"));
	}

	#[test]
	fn blank_env_value_is_ignored() {
		let layer =
			DeliveryConfigLayer::from_lookup(lookup(&[("BEACON_DELIVERY_MAX_STORAGE_SIZE", "  ")]))
				.unwrap();
		assert_eq!(layer.max_storage_size, None);
	}

	#[test]
	fn zero_capacity_is_rejected() {
		let layer = DeliveryConfigLayer {
			enqueue_queue_capacity: Some(0),
			..Default::default()
		};
		assert!(matches!(
			layer.finalize(),
			Err(ConfigError::InvalidValue { .. })
		));
	}

	#[test]
	fn missing_file_is_skipped() {
		let tmp = TempDir::new().unwrap();
		let layer = DeliveryConfigLayer::from_toml_file(&tmp.path().join("absent.toml")).unwrap();
		assert_eq!(layer, DeliveryConfigLayer::default());
	}

	#[test]
	fn malformed_file_reports_path() {
		let tmp = TempDir::new().unwrap();
		let path = tmp.path().join("delivery.toml");
		std::fs::write(&path, "max_submission_size = \"big\"").unwrap();

		let err = DeliveryConfigLayer::from_toml_file(&path).unwrap_err();
		assert!(matches!(err, ConfigError::TomlParse { .. }));
		assert!(err.to_string().contains("delivery.toml"));
	}

	#[test]
	fn durations_are_read_in_their_units() {
		let layer = DeliveryConfigLayer {
			min_forced_submission_interval_secs: Some(5),
			diagnostics_wait_ms: Some(250),
			..Default::default()
		};
		let config = layer.finalize().unwrap();
		assert_eq!(config.min_forced_submission_interval, Duration::from_secs(5));
		assert_eq!(config.diagnostics_wait, Duration::from_millis(250));
	}
}
