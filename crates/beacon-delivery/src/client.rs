// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Delivery client: durable enqueueing and batched submission of events.
//!
//! Two lanes keep the moving parts apart. The enqueue lane is the only
//! writer to the [`EventStore`]; the submission lane is the only reader.
//! Producers never block: they queue a task and return, and both lanes shed
//! work once their queues are full.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use beacon_core::{
	AlwaysOnline, ConnectivityProbe, EventRecord, NetworkType, RetryableError,
};
use parking_lot::Mutex;
use serde::de::IgnoredAny;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn, Instrument, Span};

use crate::config::DeliveryConfig;
use crate::error::{DeliveryError, Result};
use crate::lane::{Lane, LaneHandle};
use crate::policy::{first_denial, DefaultPolicyFactory, PolicyFactory, SharedPolicy};
use crate::store::{EventIterator, EventStore};
use crate::transport::EventsTransport;

/// How a delivery cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
	/// A policy refused the cycle before anything was read.
	Denied { policy: &'static str },
	/// Every batch sent was settled. Events may remain if the submission
	/// limit was reached.
	Completed,
	/// A retryable failure stopped the cycle; unsent events stay stored.
	Halted,
}

/// Summary of one delivery cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
	pub outcome: DeliveryOutcome,
	/// Batches settled, whether acknowledged or permanently rejected.
	pub submissions: usize,
	pub events_submitted: usize,
	pub bytes_submitted: u64,
	/// Events dropped because the collector can never accept them.
	pub events_discarded: usize,
}

impl DeliveryReport {
	fn new() -> Self {
		Self {
			outcome: DeliveryOutcome::Completed,
			submissions: 0,
			events_submitted: 0,
			bytes_submitted: 0,
			events_discarded: 0,
		}
	}
}

/// Completion handle for a scheduled delivery cycle. Dropping it does not
/// cancel the cycle.
pub struct DeliveryHandle {
	rx: oneshot::Receiver<DeliveryReport>,
}

impl DeliveryHandle {
	/// Waits for the cycle to finish. Returns `None` if the lane stopped
	/// before running it.
	pub async fn report(self) -> Option<DeliveryReport> {
		self.rx.await.ok()
	}
}

#[derive(Default)]
struct WriteWindow {
	started: Option<Instant>,
	events: u64,
}

/// Per-event write latency, measured over each busy period of the enqueue
/// lane.
struct WriteStats {
	pending: AtomicUsize,
	avg_write_event_time_millis: AtomicU64,
	window: Mutex<WriteWindow>,
}

impl WriteStats {
	fn new() -> Self {
		Self {
			pending: AtomicUsize::new(0),
			avg_write_event_time_millis: AtomicU64::new(1),
			window: Mutex::new(WriteWindow::default()),
		}
	}

	fn queued(&self) {
		self.pending.fetch_add(1, Ordering::SeqCst);
	}

	/// Undoes `queued` for a task the lane refused. Closes the window if
	/// that leaves nothing pending.
	fn rejected(&self) {
		let mut window = self.window.lock();
		if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
			self.close_window(&mut window);
		}
	}

	/// Records a finished write, closing the window if it was the last
	/// pending one.
	fn written(&self, started: Instant) {
		let mut window = self.window.lock();
		window.started.get_or_insert(started);
		window.events += 1;

		if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
			self.close_window(&mut window);
		}
	}

	/// Sets the average to `ceil(elapsed_ms / events_written)` over the
	/// window and starts a fresh one.
	fn close_window(&self, window: &mut WriteWindow) {
		if let Some(started) = window.started {
			if window.events > 0 {
				let elapsed_ms = started.elapsed().as_millis() as u64;
				let avg = elapsed_ms.div_ceil(window.events).max(1);
				self.avg_write_event_time_millis.store(avg, Ordering::SeqCst);
			}
		}
		*window = WriteWindow::default();
	}

	fn avg_write_event_time_millis(&self) -> u64 {
		self.avg_write_event_time_millis.load(Ordering::SeqCst)
	}
}

/// Everything a submission task needs, shared with the client.
struct DeliveryContext {
	config: DeliveryConfig,
	store: EventStore,
	transport: Arc<dyn EventsTransport>,
	connectivity: Arc<dyn ConnectivityProbe>,
	enqueue: LaneHandle,
	stats: WriteStats,
}

impl DeliveryContext {
	/// Upper bound on waiting for writes queued ahead of a cycle.
	fn write_barrier_timeout(&self) -> Duration {
		let avg = self.stats.avg_write_event_time_millis().max(1);
		let max_pending = self.config.enqueue_queue_capacity as u64;
		Duration::from_millis(avg.saturating_mul(max_pending).saturating_mul(3) / 2)
	}

	async fn deliver(&self, policies: &[SharedPolicy]) -> DeliveryReport {
		let mut report = DeliveryReport::new();

		if let Some(policy) = first_denial(policies) {
			debug!(policy, "delivery cycle denied by policy");
			report.outcome = DeliveryOutcome::Denied { policy };
			return report;
		}

		let timeout = self.write_barrier_timeout();
		if !self.enqueue.barrier(timeout).await {
			warn!(
				timeout_ms = timeout.as_millis() as u64,
				"pending event writes not finished, delivering what is stored"
			);
		}

		let network = self.connectivity.network_type();
		let max_size = self.config.max_submission_size;
		let mut it = self.store.iterator();
		let mut batch: Vec<EventRecord> = Vec::new();
		let mut batch_bytes = 0u64;
		let mut halted = false;

		while report.submissions < self.config.max_submissions_allowed {
			let Some(len) = it.peek().map(|r| r.len() as u64) else {
				break;
			};

			if batch_bytes + len <= max_size {
				if let Some(record) = it.next() {
					batch_bytes += len;
					batch.push(EventRecord::from(record));
				}
				continue;
			}

			if batch.is_empty() {
				it.next();
				warn!(
					bytes = len,
					max_bytes = max_size,
					"discarding event larger than the maximum submission size"
				);
				report.events_discarded += 1;
				if let Err(e) = it.remove_read_events() {
					error!(error = %e, "failed to remove oversized event");
					halted = true;
					break;
				}
				continue;
			}

			if !self
				.submit(&mut it, &batch, batch_bytes, network, policies, &mut report)
				.await
			{
				halted = true;
				break;
			}
			batch.clear();
			batch_bytes = 0;
		}

		if !halted
			&& !batch.is_empty()
			&& !self
				.submit(&mut it, &batch, batch_bytes, network, policies, &mut report)
				.await
		{
			halted = true;
		}

		report.outcome = if halted {
			DeliveryOutcome::Halted
		} else {
			DeliveryOutcome::Completed
		};

		info!(
			submissions = report.submissions,
			events = report.events_submitted,
			bytes = report.bytes_submitted,
			discarded = report.events_discarded,
			halted,
			"delivery cycle finished"
		);
		report
	}

	/// Sends one batch and settles it. Returns `false` if the cycle must stop.
	async fn submit(
		&self,
		it: &mut EventIterator,
		batch: &[EventRecord],
		batch_bytes: u64,
		network: NetworkType,
		policies: &[SharedPolicy],
		report: &mut DeliveryReport,
	) -> bool {
		let settled = match self.transport.put_events(batch, network).await {
			Ok(()) => {
				debug!(events = batch.len(), bytes = batch_bytes, "events batch delivered");
				report.events_submitted += batch.len();
				report.bytes_submitted += batch_bytes;
				true
			}
			Err(e) if !e.is_retryable() => {
				warn!(
					status = ?e.status(),
					error_code = ?e.error_code(),
					events = batch.len(),
					error = %e,
					"collector permanently rejected events batch, discarding"
				);
				report.events_discarded += batch.len();
				true
			}
			Err(e) => {
				warn!(error = %e, events = batch.len(), "events batch submission failed, retrying next cycle");
				false
			}
		};

		for policy in policies {
			policy.handle_delivery_attempt(settled);
		}

		if !settled {
			return false;
		}
		report.submissions += 1;

		if let Err(e) = it.remove_read_events() {
			error!(error = %e, "failed to remove settled events; they will be sent again");
			return false;
		}
		true
	}
}

/// Builder for [`DeliveryClient`].
pub struct DeliveryClientBuilder {
	config: DeliveryConfig,
	store: Option<EventStore>,
	transport: Option<Arc<dyn EventsTransport>>,
	connectivity: Arc<dyn ConnectivityProbe>,
	policy_factory: Option<Arc<dyn PolicyFactory>>,
	enqueue_lane: Option<Lane>,
	submission_lane: Option<Lane>,
	span: Option<Span>,
}

impl DeliveryClientBuilder {
	pub fn new() -> Self {
		Self {
			config: DeliveryConfig::default(),
			store: None,
			transport: None,
			connectivity: Arc::new(AlwaysOnline),
			policy_factory: None,
			enqueue_lane: None,
			submission_lane: None,
			span: None,
		}
	}

	pub fn config(mut self, config: DeliveryConfig) -> Self {
		self.config = config;
		self
	}

	/// Uses an existing store. Its own size ceiling takes precedence over
	/// `max_storage_size` in the config.
	pub fn store(mut self, store: EventStore) -> Self {
		self.store = Some(store);
		self
	}

	pub fn transport(mut self, transport: Arc<dyn EventsTransport>) -> Self {
		self.transport = Some(transport);
		self
	}

	pub fn connectivity(mut self, probe: Arc<dyn ConnectivityProbe>) -> Self {
		self.connectivity = probe;
		self
	}

	pub fn policy_factory(mut self, factory: Arc<dyn PolicyFactory>) -> Self {
		self.policy_factory = Some(factory);
		self
	}

	/// Supplies the lane that runs store writes.
	pub fn enqueue_lane(mut self, lane: Lane) -> Self {
		self.enqueue_lane = Some(lane);
		self
	}

	/// Supplies the lane that runs delivery cycles.
	pub fn submission_lane(mut self, lane: Lane) -> Self {
		self.submission_lane = Some(lane);
		self
	}

	/// Span every lane task runs in.
	pub fn span(mut self, span: Span) -> Self {
		self.span = Some(span);
		self
	}

	pub fn build(self) -> Result<DeliveryClient> {
		let transport = self.transport.ok_or(DeliveryError::MissingTransport)?;
		let config = self.config;

		let store = match self.store {
			Some(store) => store,
			None => EventStore::from_xdg(config.max_storage_size)?,
		};

		let policies = self.policy_factory.unwrap_or_else(|| {
			Arc::new(DefaultPolicyFactory::new(
				Arc::clone(&self.connectivity),
				&config,
			))
		});

		let enqueue = match self.enqueue_lane {
			Some(lane) => lane,
			None => Lane::spawn("enqueue", config.enqueue_queue_capacity)?,
		};
		let submission = match self.submission_lane {
			Some(lane) => lane,
			None => Lane::spawn("submission", config.submission_queue_capacity)?,
		};

		let span = self
			.span
			.unwrap_or_else(|| tracing::info_span!("beacon_delivery"));

		info!(
			store = %store.path().display(),
			max_submission_size = config.max_submission_size,
			max_submissions_allowed = config.max_submissions_allowed,
			"delivery client initialized"
		);

		let ctx = Arc::new(DeliveryContext {
			config,
			store,
			transport,
			connectivity: self.connectivity,
			enqueue: enqueue.handle(),
			stats: WriteStats::new(),
		});

		Ok(DeliveryClient {
			ctx,
			enqueue,
			submission,
			policies,
			span,
		})
	}
}

impl Default for DeliveryClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Buffers events durably and delivers them in batches.
///
/// # Example
///
/// ```ignore
/// let client = DeliveryClient::builder()
///     .store(EventStore::new(data_dir, DEFAULT_MAX_STORAGE_SIZE))
///     .transport(Arc::new(transport))
///     .build()?;
///
/// client.enqueue_event_for_delivery(r#"{"event_type":"_session.start"}"#);
///
/// // Fire and forget, or await the report.
/// if let Some(handle) = client.attempt_delivery() {
///     let report = handle.report().await;
/// }
/// ```
pub struct DeliveryClient {
	ctx: Arc<DeliveryContext>,
	enqueue: Lane,
	submission: Lane,
	policies: Arc<dyn PolicyFactory>,
	span: Span,
}

impl DeliveryClient {
	pub fn builder() -> DeliveryClientBuilder {
		DeliveryClientBuilder::new()
	}

	/// Queues `record` to be written to the store. Never blocks.
	///
	/// Returns `false` if the record was shed: the enqueue lane is full,
	/// the record is not a JSON document, or it is larger than one
	/// submission may be.
	pub fn enqueue_event_for_delivery(&self, record: impl Into<EventRecord>) -> bool {
		let record = record.into();
		if record.len() as u64 > self.ctx.config.max_submission_size {
			warn!(
				bytes = record.len(),
				max_bytes = self.ctx.config.max_submission_size,
				"event larger than the maximum submission size, dropping"
			);
			return false;
		}
		if let Err(e) = serde_json::from_str::<IgnoredAny>(record.as_str()) {
			warn!(bytes = record.len(), error = %e, "event is not valid JSON, dropping");
			return false;
		}

		let ctx = Arc::clone(&self.ctx);
		ctx.stats.queued();
		let task = async move {
			let started = Instant::now();
			if !ctx.store.put(record.as_str()) {
				debug!(bytes = record.len(), "event record not stored");
			}
			ctx.stats.written(started);
		}
		.instrument(self.span.clone());

		if self.enqueue.submit(task) {
			true
		} else {
			self.ctx.stats.rejected();
			false
		}
	}

	/// Schedules a delivery cycle under the default policies.
	pub fn attempt_delivery(&self) -> Option<DeliveryHandle> {
		self.attempt_delivery_with(Vec::new())
	}

	/// Schedules a delivery cycle under the default policies plus `policies`.
	///
	/// Returns `None` if the submission lane is full and the cycle was shed.
	pub fn attempt_delivery_with(&self, policies: Vec<SharedPolicy>) -> Option<DeliveryHandle> {
		let mut active = self.policies.default_policies();
		active.extend(policies);

		let ctx = Arc::clone(&self.ctx);
		let (tx, rx) = oneshot::channel();
		let task = async move {
			let report = ctx.deliver(&active).await;
			let _ = tx.send(report);
		}
		.instrument(self.span.clone());

		self
			.submission
			.submit(task)
			.then_some(DeliveryHandle { rx })
	}

	/// Schedules a cycle that also honours the minimum interval between
	/// forced submissions.
	pub fn force_delivery(&self) -> Option<DeliveryHandle> {
		self.attempt_delivery_with(vec![self.policies.submission_time_policy()])
	}

	/// Snapshot of every stored record, oldest first.
	///
	/// Waits up to `diagnostics_wait` for queued writes to land first.
	pub async fn batched_events(&self) -> Vec<String> {
		let wait = self.ctx.config.diagnostics_wait;
		if !self.enqueue.handle().barrier(wait).await {
			warn!(
				timeout_ms = wait.as_millis() as u64,
				"timed out waiting for pending event writes"
			);
		}
		self.ctx.store.read_all()
	}

	/// Writes queued on the enqueue lane but not yet started.
	pub fn pending_enqueues(&self) -> usize {
		self.enqueue.pending()
	}

	/// Current running average of per-event write latency.
	pub fn avg_write_event_time_millis(&self) -> u64 {
		self.ctx.stats.avg_write_event_time_millis()
	}

	pub fn store(&self) -> &EventStore {
		&self.ctx.store
	}

	pub fn config(&self) -> &DeliveryConfig {
		&self.ctx.config
	}

	pub fn policy_factory(&self) -> &Arc<dyn PolicyFactory> {
		&self.policies
	}

	/// Stops both lanes after they finish their queued tasks. Blocks until
	/// the worker threads exit.
	pub fn shutdown(self) {
		let DeliveryClient {
			ctx,
			enqueue,
			submission,
			policies,
			span,
		} = self;

		let _entered = span.enter();
		drop(ctx);
		drop(policies);
		submission.shutdown();
		enqueue.shutdown();
		info!("delivery client stopped");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use beacon_core::TransportError;
	use tempfile::TempDir;

	struct AcceptAll;

	#[async_trait]
	impl EventsTransport for AcceptAll {
		async fn put_events(
			&self,
			_batch: &[EventRecord],
			_network: NetworkType,
		) -> std::result::Result<(), TransportError> {
			Ok(())
		}
	}

	fn client(tmp: &TempDir, config: DeliveryConfig) -> DeliveryClient {
		DeliveryClient::builder()
			.config(config)
			.store(EventStore::new(tmp.path(), 1024 * 1024))
			.transport(Arc::new(AcceptAll))
			.build()
			.unwrap()
	}

	#[test]
	fn build_requires_transport() {
		let result = DeliveryClient::builder().build();
		assert!(matches!(result, Err(DeliveryError::MissingTransport)));
	}

	#[test]
	fn barrier_timeout_scales_with_queue_capacity() {
		let tmp = TempDir::new().unwrap();
		let client = client(&tmp, DeliveryConfig::default());
		assert_eq!(
			client.ctx.write_barrier_timeout(),
			Duration::from_millis(1500)
		);
	}

	#[test]
	fn write_stats_average_over_busy_window() {
		let stats = WriteStats::new();
		let started = Instant::now() - Duration::from_millis(90);
		for _ in 0..3 {
			stats.queued();
		}
		stats.written(started);
		stats.written(started);
		assert_eq!(stats.avg_write_event_time_millis(), 1);

		stats.written(started);
		let avg = stats.avg_write_event_time_millis();
		assert!(avg >= 30, "expected at least 30ms per event, got {avg}");
	}

	#[test]
	fn rejected_last_task_closes_the_window() {
		let stats = WriteStats::new();
		let started = Instant::now() - Duration::from_millis(60);

		// A write finishes while a second producer is between queueing and
		// being refused by the lane.
		stats.queued();
		stats.queued();
		stats.written(started);
		assert_eq!(stats.avg_write_event_time_millis(), 1);

		stats.rejected();
		let avg = stats.avg_write_event_time_millis();
		assert!(avg >= 60, "expected the window to close, got {avg}");

		// The next window starts fresh instead of absorbing the idle gap.
		stats.queued();
		stats.written(Instant::now());
		let avg = stats.avg_write_event_time_millis();
		assert!(avg < 60, "expected a fresh window, got {avg}");
	}

	#[test]
	fn rejection_with_nothing_written_keeps_average() {
		let stats = WriteStats::new();
		stats.queued();
		stats.rejected();
		assert_eq!(stats.avg_write_event_time_millis(), 1);
		assert_eq!(stats.pending.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn oversized_record_is_shed_at_enqueue() {
		let tmp = TempDir::new().unwrap();
		let config = DeliveryConfig {
			max_submission_size: 16,
			..Default::default()
		};
		let client = client(&tmp, config);

		let fits = format!("\"{}\"", "x".repeat(14));
		let too_big = format!("\"{}\"", "x".repeat(15));
		assert!(!client.enqueue_event_for_delivery(too_big));
		assert!(client.enqueue_event_for_delivery(fits.clone()));
		assert_eq!(client.batched_events().await, vec![fits]);
	}

	#[tokio::test]
	async fn malformed_record_is_shed_at_enqueue() {
		let tmp = TempDir::new().unwrap();
		let client = client(&tmp, DeliveryConfig::default());

		assert!(client.enqueue_event_for_delivery(r#"{"n":1}"#));
		assert!(!client.enqueue_event_for_delivery("not json"));
		assert!(!client.enqueue_event_for_delivery(r#"{"n":"#));
		assert!(client.enqueue_event_for_delivery(r#"{"n":2}"#));

		assert_eq!(
			client.batched_events().await,
			vec![r#"{"n":1}"#.to_string(), r#"{"n":2}"#.to_string()]
		);
	}

	#[tokio::test]
	async fn enqueued_events_are_visible_in_order() {
		let tmp = TempDir::new().unwrap();
		let client = client(&tmp, DeliveryConfig::default());

		for i in 0..20 {
			assert!(client.enqueue_event_for_delivery(format!("{{\"seq\":{i}}}")));
		}

		let events = client.batched_events().await;
		assert_eq!(
			events,
			(0..20).map(|i| format!("{{\"seq\":{i}}}")).collect::<Vec<_>>()
		);
		assert_eq!(client.pending_enqueues(), 0);
	}
}
