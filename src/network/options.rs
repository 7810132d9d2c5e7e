//! Gateway options.
//!
//! Defaults mirror what a long-running client application wants: generous commit timeouts, the
//! local organization's peers as the commit quorum, and discovery when the channel offers it.

use crate::commit::CommitStrategyKind;
use crate::transaction::QueryStrategy;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serialize durations as whole milliseconds.
mod millis {
	use serde::{Deserialize, Deserializer, Serializer};
	use std::time::Duration;

	pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}

/// Reconnect policy for event services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectOptions {
	/// Delay before the first reconnect attempt
	#[serde(with = "millis")]
	pub initial_interval: Duration,
	/// Upper bound for the delay between attempts
	#[serde(with = "millis")]
	pub max_interval: Duration,
	/// Growth factor applied after each failed attempt
	pub multiplier: f64,
}

impl Default for ReconnectOptions {
	fn default() -> Self {
		Self {
			initial_interval: Duration::from_millis(500),
			max_interval: Duration::from_secs(30),
			multiplier: 2.0,
		}
	}
}

impl ReconnectOptions {
	/// Backoff that never gives up.
	pub(crate) fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoffBuilder::new()
			.with_initial_interval(self.initial_interval)
			.with_max_interval(self.max_interval)
			.with_multiplier(self.multiplier)
			.with_max_elapsed_time(None)
			.build()
	}
}

/// Configuration for a `Network`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayOptions {
	/// Timeout for each proposal and orderer request
	#[serde(with = "millis")]
	pub proposal_timeout: Duration,
	/// How long `submit` waits for commit events
	#[serde(with = "millis")]
	pub commit_timeout: Duration,
	/// Default commit strategy for submitted transactions
	pub commit_strategy: CommitStrategyKind,
	/// Peer selection for evaluated transactions
	pub query_strategy: QueryStrategy,
	/// Use the channel's discovery handler when it has one
	pub discovery_enabled: bool,
	pub reconnect: ReconnectOptions,
}

impl Default for GatewayOptions {
	fn default() -> Self {
		Self {
			proposal_timeout: Duration::from_secs(30),
			commit_timeout: Duration::from_secs(300),
			commit_strategy: CommitStrategyKind::default(),
			query_strategy: QueryStrategy::default(),
			discovery_enabled: true,
			reconnect: ReconnectOptions::default(),
		}
	}
}

impl GatewayOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_proposal_timeout(mut self, timeout: Duration) -> Self {
		self.proposal_timeout = timeout;
		self
	}

	pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
		self.commit_timeout = timeout;
		self
	}

	pub fn with_commit_strategy(mut self, strategy: CommitStrategyKind) -> Self {
		self.commit_strategy = strategy;
		self
	}

	pub fn with_query_strategy(mut self, strategy: QueryStrategy) -> Self {
		self.query_strategy = strategy;
		self
	}

	pub fn with_discovery(mut self, enabled: bool) -> Self {
		self.discovery_enabled = enabled;
		self
	}

	pub fn with_reconnect(mut self, reconnect: ReconnectOptions) -> Self {
		self.reconnect = reconnect;
		self
	}
}
