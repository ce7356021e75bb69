// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable buffering and batched delivery of analytics events.
//!
//! Events are appended to a file-backed FIFO ([`EventStore`]) on a dedicated
//! enqueue lane and shipped to a collector in size-bounded batches on a
//! separate submission lane. A batch is removed from the store only once the
//! collector has settled it: acknowledged, or rejected for good.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use beacon_delivery::{DeliveryClient, DeliveryConfig, EventStore, HttpEventsTransport};
//!
//! let config = DeliveryConfig::load(None)?;
//! let transport = HttpEventsTransport::builder()
//!     .base_url("https://collector.example.com")
//!     .app_id("my-app")
//!     .build()?;
//!
//! let client = DeliveryClient::builder()
//!     .store(EventStore::from_xdg(config.max_storage_size)?)
//!     .config(config)
//!     .transport(Arc::new(transport))
//!     .build()?;
//!
//! client.enqueue_event_for_delivery(r#"{"event_type":"_session.start"}"#);
//! client.attempt_delivery();
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod lane;
pub mod logging;
pub mod policy;
pub mod store;
pub mod transport;

pub use beacon_core::{
	AlwaysOnline, ConnectivityProbe, EventRecord, NetworkType, RetryableError, StaticConnectivity,
	TransportError,
};
pub use client::{
	DeliveryClient, DeliveryClientBuilder, DeliveryHandle, DeliveryOutcome, DeliveryReport,
};
pub use config::{ConfigError, DeliveryConfig, DeliveryConfigLayer};
pub use error::{DeliveryError, Result, StoreError};
pub use lane::{Lane, LaneHandle};
pub use logging::{init_logging, LogFormat, LoggingError};
pub use policy::{
	ConnectivityPolicy, DefaultPolicyFactory, DeliveryPolicy, PolicyFactory, SharedPolicy,
	SubmissionTimePolicy,
};
pub use store::{EventIterator, EventStore, DEFAULT_MAX_STORAGE_SIZE};
pub use transport::{EventsTransport, HttpEventsTransport, HttpEventsTransportBuilder};
