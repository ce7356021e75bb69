// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the delivery client.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the event store.
///
/// Only compaction surfaces these; `put` absorbs its failures and reports
/// them as a `false` return.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("IO error on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

impl StoreError {
	pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		StoreError::Io {
			path: path.into(),
			source,
		}
	}
}

/// Errors raised while constructing or tearing down a delivery client.
#[derive(Debug, Error)]
pub enum DeliveryError {
	/// A lane worker thread or its runtime could not be started.
	#[error("failed to start {lane} lane: {source}")]
	LaneSpawn {
		lane: &'static str,
		#[source]
		source: std::io::Error,
	},

	/// No transport was supplied to the builder.
	#[error("an events transport is required")]
	MissingTransport,

	/// No event store was supplied and no default location could be found.
	#[error("could not determine a data directory for the event store")]
	NoDataDir,

	#[error("invalid collector base URL")]
	InvalidBaseUrl,

	#[error("collector app ID is required")]
	MissingAppId,

	#[error("failed to build HTTP client: {0}")]
	HttpClient(#[from] reqwest::Error),
}

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;
