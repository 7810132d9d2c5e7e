use crate::events::{CommitEvent, PeerEventError};
use crate::gateway::Peer;

use std::collections::HashSet;
use tracing::debug;

/// Commit outcomes collected from the peers of a commit strategy.
///
/// Each peer is counted once: a peer that already reported is ignored afterwards.
#[derive(Debug, Clone, Default)]
pub struct CommitTally {
	expected: usize,
	reported: HashSet<String>,
	successes: Vec<CommitEvent>,
	failures: Vec<PeerEventError>,
}

impl CommitTally {
	pub fn new(expected: usize) -> Self {
		Self {
			expected,
			..Default::default()
		}
	}

	/// Record a commit event. Returns `false` if the peer had already reported.
	pub fn record_success(&mut self, event: CommitEvent) -> bool {
		if !self.reported.insert(event.peer.clone()) {
			debug!("Ignoring repeated commit outcome from {}", event.peer);
			return false;
		}
		self.successes.push(event);
		true
	}

	/// Record a peer failure. Returns `false` if the peer had already reported.
	pub fn record_failure(&mut self, error: PeerEventError) -> bool {
		if !self.reported.insert(error.peer.clone()) {
			debug!("Ignoring repeated commit outcome from {}", error.peer);
			return false;
		}
		self.failures.push(error);
		true
	}

	pub fn expected(&self) -> usize {
		self.expected
	}

	pub fn reported(&self) -> usize {
		self.reported.len()
	}

	pub fn success_count(&self) -> usize {
		self.successes.len()
	}

	pub fn failure_count(&self) -> usize {
		self.failures.len()
	}

	/// Every expected peer has reported.
	pub fn is_complete(&self) -> bool {
		self.reported() >= self.expected
	}

	pub fn failures(&self) -> &[PeerEventError] {
		&self.failures
	}

	/// Names of `peers` that have not reported yet.
	pub fn pending_peers(&self, peers: &[Peer]) -> Vec<String> {
		peers
			.iter()
			.filter(|peer| !self.reported.contains(&peer.name))
			.map(|peer| peer.name.clone())
			.collect()
	}

	pub fn summary(&self) -> String {
		format!(
			"{}/{} peers reported, {} committed, {} failed",
			self.reported(),
			self.expected,
			self.success_count(),
			self.failure_count()
		)
	}
}
