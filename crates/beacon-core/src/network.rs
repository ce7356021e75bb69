// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Device connectivity inputs consumed by delivery policies and transports.

use serde::{Deserialize, Serialize};

/// The kind of network the device is currently attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
	#[default]
	Wifi,
	/// Metered wide-area network (cellular).
	Mobile,
	Offline,
}

impl NetworkType {
	pub fn as_str(&self) -> &'static str {
		match self {
			NetworkType::Wifi => "wifi",
			NetworkType::Mobile => "mobile",
			NetworkType::Offline => "offline",
		}
	}
}

impl std::fmt::Display for NetworkType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Read-only view of the host's connectivity.
///
/// Implementations are supplied by the embedding application; the delivery
/// client only ever reads from them.
pub trait ConnectivityProbe: Send + Sync {
	fn network_type(&self) -> NetworkType;

	fn is_connected(&self) -> bool {
		self.network_type() != NetworkType::Offline
	}
}

/// Probe for hosts without connectivity introspection. Always reports wifi.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl ConnectivityProbe for AlwaysOnline {
	fn network_type(&self) -> NetworkType {
		NetworkType::Wifi
	}
}

/// Probe whose reported network can be switched at runtime.
#[derive(Debug, Default)]
pub struct StaticConnectivity {
	current: std::sync::RwLock<NetworkType>,
}

impl StaticConnectivity {
	pub fn new(network: NetworkType) -> Self {
		Self {
			current: std::sync::RwLock::new(network),
		}
	}

	pub fn set(&self, network: NetworkType) {
		if let Ok(mut current) = self.current.write() {
			*current = network;
		}
	}
}

impl ConnectivityProbe for StaticConnectivity {
	fn network_type(&self) -> NetworkType {
		self
			.current
			.read()
			.map(|n| *n)
			.unwrap_or(NetworkType::Offline)
	}
}
