// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Admission control for delivery cycles.
//!
//! A cycle runs only if every policy in its set allows it. After each batch
//! submission every policy in the set is told whether the batch was settled,
//! so stateful policies can back off.

use std::sync::Arc;
use std::time::{Duration, Instant};

use beacon_core::{ConnectivityProbe, NetworkType};
use parking_lot::Mutex;
use tracing::debug;

use crate::config::DeliveryConfig;

/// A predicate gating delivery cycles, plus a feedback hook.
///
/// Policies are only invoked from the submission lane.
pub trait DeliveryPolicy: Send + Sync {
	/// Short identifier used in logs.
	fn name(&self) -> &'static str;

	/// Evaluated before a cycle reads anything from the store.
	fn is_allowed(&self) -> bool;

	/// Called once per batch submission with whether the batch was settled.
	fn handle_delivery_attempt(&self, success: bool);
}

/// Shared policy handle.
pub type SharedPolicy = Arc<dyn DeliveryPolicy>;

/// Returns the name of the first policy that denies, if any.
pub fn first_denial(policies: &[SharedPolicy]) -> Option<&'static str> {
	policies.iter().find(|p| !p.is_allowed()).map(|p| p.name())
}

/// Allows delivery only while the device is online, and only over wifi
/// unless WAN delivery is enabled.
pub struct ConnectivityPolicy {
	probe: Arc<dyn ConnectivityProbe>,
	allow_wan: bool,
}

impl ConnectivityPolicy {
	pub fn new(probe: Arc<dyn ConnectivityProbe>, allow_wan: bool) -> Self {
		Self { probe, allow_wan }
	}
}

impl DeliveryPolicy for ConnectivityPolicy {
	fn name(&self) -> &'static str {
		"connectivity"
	}

	fn is_allowed(&self) -> bool {
		if !self.probe.is_connected() {
			return false;
		}
		match self.probe.network_type() {
			NetworkType::Wifi => true,
			NetworkType::Mobile => self.allow_wan,
			NetworkType::Offline => false,
		}
	}

	fn handle_delivery_attempt(&self, _success: bool) {}
}

/// Enforces a minimum interval between forced submissions.
///
/// The timestamp lives as long as the policy, which is as long as the
/// owning client.
pub struct SubmissionTimePolicy {
	min_interval: Duration,
	last_attempt: Mutex<Option<Instant>>,
}

impl SubmissionTimePolicy {
	pub fn new(min_interval: Duration) -> Self {
		Self {
			min_interval,
			last_attempt: Mutex::new(None),
		}
	}

	pub fn last_attempt(&self) -> Option<Instant> {
		*self.last_attempt.lock()
	}
}

impl DeliveryPolicy for SubmissionTimePolicy {
	fn name(&self) -> &'static str {
		"submission_time"
	}

	fn is_allowed(&self) -> bool {
		match *self.last_attempt.lock() {
			Some(last) => last.elapsed() >= self.min_interval,
			None => true,
		}
	}

	fn handle_delivery_attempt(&self, success: bool) {
		debug!(success, "recording forced submission attempt");
		*self.last_attempt.lock() = Some(Instant::now());
	}
}

/// Source of the policies a delivery client applies.
///
/// Each policy is built once and handed out repeatedly, so stateful
/// policies keep their state across cycles.
pub trait PolicyFactory: Send + Sync {
	fn connectivity_policy(&self) -> SharedPolicy;

	fn submission_time_policy(&self) -> SharedPolicy;

	/// Policies applied to every cycle.
	fn default_policies(&self) -> Vec<SharedPolicy> {
		vec![self.connectivity_policy()]
	}
}

pub struct DefaultPolicyFactory {
	connectivity: SharedPolicy,
	submission_time: SharedPolicy,
}

impl DefaultPolicyFactory {
	pub fn new(probe: Arc<dyn ConnectivityProbe>, config: &DeliveryConfig) -> Self {
		Self {
			connectivity: Arc::new(ConnectivityPolicy::new(probe, config.allow_wan_delivery)),
			submission_time: Arc::new(SubmissionTimePolicy::new(
				config.min_forced_submission_interval,
			)),
		}
	}
}

impl PolicyFactory for DefaultPolicyFactory {
	fn connectivity_policy(&self) -> SharedPolicy {
		Arc::clone(&self.connectivity)
	}

	fn submission_time_policy(&self) -> SharedPolicy {
		Arc::clone(&self.submission_time)
	}
}
