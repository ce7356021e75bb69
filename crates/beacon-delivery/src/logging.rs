// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tracing subscriber setup for binaries embedding the delivery client.
//!
//! The library itself only emits events; installing a subscriber is left to
//! the host. This helper covers the common case.

use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum LoggingError {
	#[error("unknown log format: {0}")]
	UnknownFormat(String),

	#[error("failed to install tracing subscriber: {0}")]
	Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
	#[default]
	Text,
	Json,
}

impl FromStr for LogFormat {
	type Err = LoggingError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"text" | "pretty" => Ok(LogFormat::Text),
			"json" => Ok(LogFormat::Json),
			other => Err(LoggingError::UnknownFormat(other.to_string())),
		}
	}
}

/// Installs a global subscriber writing to stdout.
///
/// `RUST_LOG` takes precedence over `default_directive`, e.g.
/// `"beacon_delivery=debug"`. Fails if a global subscriber is already set.
pub fn init_logging(format: LogFormat, default_directive: &str) -> Result<(), LoggingError> {
	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(default_directive));

	let registry = tracing_subscriber::registry().with(filter);
	match format {
		LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
		LogFormat::Json => registry
			.with(tracing_subscriber::fmt::layer().json())
			.try_init()?,
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_formats() {
		assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
		assert_eq!(" Pretty ".parse::<LogFormat>().unwrap(), LogFormat::Text);
		assert!(matches!(
			"xml".parse::<LogFormat>(),
			Err(LoggingError::UnknownFormat(f)) if f == "xml"
		));
	}

	#[test]
	fn second_init_fails() {
		// Either this call or an earlier one in the same process wins.
		let _ = init_logging(LogFormat::Text, "info");
		assert!(init_logging(LogFormat::Json, "info").is_err());
	}
}
