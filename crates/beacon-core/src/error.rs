// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Classified transport failures.

use thiserror::Error;

/// Service error codes that mark a client-side defect in the request itself.
///
/// Resending the identical payload can never succeed for these.
pub const NON_RETRYABLE_ERROR_CODES: &[&str] = &[
	"ValidationException",
	"SerializationException",
	"BadRequestException",
];

/// Trait for errors that can tell whether the same request may succeed later.
pub trait RetryableError {
	fn is_retryable(&self) -> bool;
}

/// Errors returned by an events transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
	/// The collector rejected the request.
	#[error("service error ({status}, {error_code}): {message}")]
	Service {
		/// HTTP status code.
		status: u16,
		/// Machine-readable error code, e.g. `ValidationException`.
		error_code: String,
		message: String,
	},

	/// The request never reached the collector or the connection dropped.
	#[error("network error: {0}")]
	Network(String),

	/// The request timed out.
	#[error("request timed out")]
	Timeout,

	/// The batch could not be encoded into a request body.
	#[error("encoding error: {0}")]
	Encoding(String),
}

impl TransportError {
	pub fn service(status: u16, error_code: impl Into<String>, message: impl Into<String>) -> Self {
		TransportError::Service {
			status,
			error_code: error_code.into(),
			message: message.into(),
		}
	}

	/// The machine-readable error code, if the collector returned one.
	pub fn error_code(&self) -> Option<&str> {
		match self {
			TransportError::Service { error_code, .. } => Some(error_code),
			_ => None,
		}
	}

	pub fn status(&self) -> Option<u16> {
		match self {
			TransportError::Service { status, .. } => Some(*status),
			_ => None,
		}
	}
}

impl RetryableError for TransportError {
	fn is_retryable(&self) -> bool {
		match self {
			TransportError::Service { error_code, .. } => {
				!NON_RETRYABLE_ERROR_CODES.contains(&error_code.as_str())
			}
			TransportError::Network(_) | TransportError::Timeout => true,
			TransportError::Encoding(_) => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn client_defect_codes_are_not_retryable() {
		for code in NON_RETRYABLE_ERROR_CODES {
			let err = TransportError::service(400, *code, "bad");
			assert!(!err.is_retryable(), "{code} should not be retryable");
		}
	}

	#[test]
	fn throttling_and_server_errors_are_retryable() {
		let throttled = TransportError::service(429, "ThrottlingException", "slow down");
		assert!(throttled.is_retryable());

		let internal = TransportError::service(500, "InternalFailure", "oops");
		assert!(internal.is_retryable());
	}

	#[test]
	fn network_failures_are_retryable() {
		assert!(TransportError::Network("connection reset".to_string()).is_retryable());
		assert!(TransportError::Timeout.is_retryable());
	}

	#[test]
	fn encoding_failure_is_not_retryable() {
		assert!(!TransportError::Encoding("not json".to_string()).is_retryable());
	}

	#[test]
	fn accessors_expose_service_fields() {
		let err = TransportError::service(400, "ValidationException", "missing field");
		assert_eq!(err.status(), Some(400));
		assert_eq!(err.error_code(), Some("ValidationException"));
		assert_eq!(TransportError::Timeout.error_code(), None);
	}

	proptest! {
		#[test]
		fn unknown_codes_are_retryable(code in "[A-Z][a-zA-Z]{3,20}Error") {
			let err = TransportError::service(503, code, "unavailable");
			prop_assert!(err.is_retryable());
		}
	}
}
