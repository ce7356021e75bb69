// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The boundary between the delivery client and the remote collector.

mod http;

use async_trait::async_trait;
use beacon_core::{EventRecord, NetworkType, TransportError};

pub use http::{HttpEventsTransport, HttpEventsTransportBuilder};

/// Sends one batch of records to the collector.
///
/// Returning `Ok` acknowledges the whole batch. Errors must be classified
/// (see [`beacon_core::RetryableError`]) so the client knows whether to
/// keep the batch for a later cycle.
#[async_trait]
pub trait EventsTransport: Send + Sync {
	async fn put_events(
		&self,
		batch: &[EventRecord],
		network: NetworkType,
	) -> Result<(), TransportError>;
}
