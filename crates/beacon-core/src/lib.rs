// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types shared between event producers, transports and the beacon
//! delivery client.
//!
//! This crate provides:
//! - [`EventRecord`]: one opaque serialized telemetry event
//! - [`NetworkType`] and [`ConnectivityProbe`]: read-only connectivity inputs
//! - [`TransportError`]: the classified failure returned by a transport

mod error;
mod network;
mod record;

pub use error::{RetryableError, TransportError, NON_RETRYABLE_ERROR_CODES};
pub use network::{AlwaysOnline, ConnectivityProbe, NetworkType, StaticConnectivity};
pub use record::EventRecord;
