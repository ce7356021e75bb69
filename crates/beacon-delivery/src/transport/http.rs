// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP transport posting batches to a collector endpoint.

use std::time::Duration;

use async_trait::async_trait;
use beacon_core::{EventRecord, NetworkType, TransportError};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::EventsTransport;
use crate::error::{DeliveryError, Result};

/// Header carrying the collector's machine-readable error code.
const ERROR_TYPE_HEADER: &str = "x-amzn-ErrorType";
/// Header telling the collector which network the batch was sent over.
const NETWORK_TYPE_HEADER: &str = "x-beacon-network-type";

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ErrorBody {
	#[serde(alias = "__type", alias = "Code")]
	code: Option<String>,
	#[serde(alias = "Message")]
	message: Option<String>,
}

/// Builder for [`HttpEventsTransport`].
pub struct HttpEventsTransportBuilder {
	base_url: Option<String>,
	app_id: Option<String>,
	auth_token: Option<String>,
	request_timeout: Duration,
}

impl HttpEventsTransportBuilder {
	pub fn new() -> Self {
		Self {
			base_url: None,
			app_id: None,
			auth_token: None,
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
		}
	}

	/// Sets the collector base URL.
	///
	/// Example: `https://collector.example.com`
	pub fn base_url(mut self, url: impl Into<String>) -> Self {
		self.base_url = Some(url.into());
		self
	}

	/// Sets the application the events belong to.
	pub fn app_id(mut self, id: impl Into<String>) -> Self {
		self.app_id = Some(id.into());
		self
	}

	/// Sets the bearer token sent with every request.
	pub fn auth_token(mut self, token: impl Into<String>) -> Self {
		self.auth_token = Some(token.into());
		self
	}

	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;
		self
	}

	pub fn build(self) -> Result<HttpEventsTransport> {
		let base_url = self
			.base_url
			.filter(|u| u.starts_with("http://") || u.starts_with("https://"))
			.ok_or(DeliveryError::InvalidBaseUrl)?;
		let app_id = self
			.app_id
			.filter(|id| !id.is_empty())
			.ok_or(DeliveryError::MissingAppId)?;

		let base_url = base_url.trim_end_matches('/');
		let events_url = format!("{base_url}/v1/apps/{app_id}/events");

		let client = Client::builder().timeout(self.request_timeout).build()?;

		debug!(events_url = %events_url, "events transport initialized");

		Ok(HttpEventsTransport {
			client,
			events_url,
			auth_token: self.auth_token,
		})
	}
}

impl Default for HttpEventsTransportBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Posts batches as `{"events": [...]}` to `{base_url}/v1/apps/{app_id}/events`.
pub struct HttpEventsTransport {
	client: Client,
	events_url: String,
	auth_token: Option<String>,
}

impl HttpEventsTransport {
	pub fn builder() -> HttpEventsTransportBuilder {
		HttpEventsTransportBuilder::new()
	}

	pub fn events_url(&self) -> &str {
		&self.events_url
	}
}

#[async_trait]
impl EventsTransport for HttpEventsTransport {
	async fn put_events(
		&self,
		batch: &[EventRecord],
		network: NetworkType,
	) -> std::result::Result<(), TransportError> {
		let mut events = Vec::with_capacity(batch.len());
		let mut last_error = None;
		for record in batch {
			match serde_json::from_str::<serde_json::Value>(record.as_str()) {
				Ok(event) => events.push(event),
				Err(e) => {
					warn!(bytes = record.len(), error = %e, "skipping event that is not valid JSON");
					last_error = Some(e);
				}
			}
		}
		if events.is_empty() {
			if let Some(e) = last_error {
				return Err(TransportError::Encoding(e.to_string()));
			}
		}
		let body = serde_json::json!({ "events": events });

		let mut request = self
			.client
			.post(&self.events_url)
			.header(NETWORK_TYPE_HEADER, network.as_str())
			.json(&body);
		if let Some(token) = &self.auth_token {
			request = request.bearer_auth(token);
		}

		let response = request.send().await.map_err(classify_request_error)?;

		let status = response.status();
		if status.is_success() {
			debug!(events = batch.len(), "events batch accepted");
			return Ok(());
		}

		let header_code = response
			.headers()
			.get(ERROR_TYPE_HEADER)
			.and_then(|v| v.to_str().ok())
			.map(normalize_error_code);
		let text = response.text().await.unwrap_or_default();
		let parsed = serde_json::from_str::<ErrorBody>(&text).ok();

		let status = status.as_u16();
		let error_code = header_code
			.or_else(|| parsed.as_ref().and_then(|b| b.code.as_deref().map(normalize_error_code)))
			.unwrap_or_else(|| fallback_error_code(status));
		let message = parsed.and_then(|b| b.message).unwrap_or(text);

		warn!(status, error_code = %error_code, "collector rejected events batch");
		Err(TransportError::Service {
			status,
			error_code,
			message,
		})
	}
}

fn classify_request_error(e: reqwest::Error) -> TransportError {
	if e.is_timeout() {
		TransportError::Timeout
	} else {
		TransportError::Network(e.to_string())
	}
}

/// Strips a namespace prefix or URI suffix, e.g.
/// `aws.protocols#ValidationException:http://...` becomes `ValidationException`.
fn normalize_error_code(raw: &str) -> String {
	let code = raw.split(':').next().unwrap_or(raw);
	let code = code.rsplit('#').next().unwrap_or(code);
	code.trim().to_string()
}

fn fallback_error_code(status: u16) -> String {
	match status {
		400 => "BadRequestException".to_string(),
		_ => format!("Http{status}"),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use beacon_core::RetryableError;
	use wiremock::matchers::{body_json, header, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn batch() -> Vec<EventRecord> {
		vec![
			EventRecord::from(r#"{"event_type":"_session.start"}"#),
			EventRecord::from(r#"{"event_type":"purchase","value":3}"#),
		]
	}

	async fn transport(server: &MockServer) -> HttpEventsTransport {
		HttpEventsTransport::builder()
			.base_url(server.uri())
			.app_id("app-123")
			.auth_token("secret-token")
			.build()
			.unwrap()
	}

	#[tokio::test]
	async fn posts_events_envelope() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/v1/apps/app-123/events"))
			.and(header("authorization", "Bearer secret-token"))
			.and(header("x-beacon-network-type", "mobile"))
			.and(body_json(serde_json::json!({
				"events": [
					{"event_type": "_session.start"},
					{"event_type": "purchase", "value": 3}
				]
			})))
			.respond_with(ResponseTemplate::new(202))
			.expect(1)
			.mount(&server)
			.await;

		let transport = transport(&server).await;
		transport
			.put_events(&batch(), NetworkType::Mobile)
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn error_type_header_is_not_retryable_for_validation() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(
				ResponseTemplate::new(400)
					.insert_header("x-amzn-ErrorType", "ValidationException:http://internal/")
					.set_body_string(r#"{"message":"bad attribute"}"#),
			)
			.mount(&server)
			.await;

		let err = transport(&server)
			.await
			.put_events(&batch(), NetworkType::Wifi)
			.await
			.unwrap_err();

		assert_eq!(err.error_code(), Some("ValidationException"));
		assert_eq!(err.status(), Some(400));
		assert!(!err.is_retryable());
	}

	#[tokio::test]
	async fn body_code_is_used_without_header() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(
				ResponseTemplate::new(400)
					.set_body_string(r#"{"__type":"SerializationException","Message":"oops"}"#),
			)
			.mount(&server)
			.await;

		let err = transport(&server)
			.await
			.put_events(&batch(), NetworkType::Wifi)
			.await
			.unwrap_err();

		assert_eq!(err.error_code(), Some("SerializationException"));
		assert!(matches!(err, TransportError::Service { ref message, .. } if message == "oops"));
	}

	#[tokio::test]
	async fn server_errors_are_retryable() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
			.mount(&server)
			.await;

		let err = transport(&server)
			.await
			.put_events(&batch(), NetworkType::Wifi)
			.await
			.unwrap_err();

		assert_eq!(err.error_code(), Some("Http503"));
		assert!(err.is_retryable());
	}

	#[tokio::test]
	async fn malformed_records_do_not_sink_the_batch() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(body_json(serde_json::json!({
				"events": [{"n": 1}, {"n": 2}, {"n": 3}]
			})))
			.respond_with(ResponseTemplate::new(200))
			.expect(1)
			.mount(&server)
			.await;

		let mixed = [
			EventRecord::from(r#"{"n":1}"#),
			EventRecord::from(r#"{"n":2}"#),
			EventRecord::from("not json"),
			EventRecord::from(r#"{"n":3}"#),
		];
		transport(&server)
			.await
			.put_events(&mixed, NetworkType::Wifi)
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn batch_of_only_malformed_records_is_an_encoding_error() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(200))
			.expect(0)
			.mount(&server)
			.await;

		let err = transport(&server)
			.await
			.put_events(&[EventRecord::from("not json")], NetworkType::Wifi)
			.await
			.unwrap_err();

		assert!(matches!(err, TransportError::Encoding(_)));
		assert!(!err.is_retryable());
	}

	#[tokio::test]
	async fn unreachable_collector_is_a_network_error() {
		let transport = HttpEventsTransport::builder()
			.base_url("http://127.0.0.1:9")
			.app_id("app-123")
			.request_timeout(Duration::from_secs(2))
			.build()
			.unwrap();

		let err = transport
			.put_events(&batch(), NetworkType::Wifi)
			.await
			.unwrap_err();
		assert!(err.is_retryable());
	}

	#[test]
	fn builder_validates_inputs() {
		assert!(matches!(
			HttpEventsTransport::builder().app_id("a").build(),
			Err(DeliveryError::InvalidBaseUrl)
		));
		assert!(matches!(
			HttpEventsTransport::builder()
				.base_url("ftp://collector")
				.app_id("a")
				.build(),
			Err(DeliveryError::InvalidBaseUrl)
		));
		assert!(matches!(
			HttpEventsTransport::builder()
				.base_url("https://collector.example.com")
				.build(),
			Err(DeliveryError::MissingAppId)
		));
	}

	#[test]
	fn events_url_strips_trailing_slash() {
		let transport = HttpEventsTransport::builder()
			.base_url("https://collector.example.com/")
			.app_id("app-1")
			.build()
			.unwrap();
		assert_eq!(
			transport.events_url(),
			"https://collector.example.com/v1/apps/app-1/events"
		);
	}

	#[test]
	fn normalizes_namespaced_codes() {
		assert_eq!(
			normalize_error_code("aws.protocols#ValidationException"),
			"ValidationException"
		);
		assert_eq!(normalize_error_code("BadRequestException"), "BadRequestException");
	}
}
