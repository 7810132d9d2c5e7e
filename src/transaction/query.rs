//! Query handling for evaluated transactions.
//!
//! An evaluation only needs one answer, so the query handler picks a single peer per call and
//! only moves on to another peer when the chosen one cannot be reached.

use crate::gateway::{EndorsementResponse, LedgerGateway, Peer, Proposal, with_timeout};
use crate::transaction::TransactionError;
use crate::transaction::validator::EndorsementFailure;

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// How the query handler orders candidate peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryStrategy {
	/// Keep using the peer that last answered until it fails.
	#[default]
	SingleSticky,
	/// Start from the next peer in rotation on every call.
	RoundRobin,
}

#[derive(Debug, Default)]
struct QueryState {
	sticky: Option<String>,
	next: usize,
}

/// Evaluates proposals against query peers according to a `QueryStrategy`.
#[derive(Debug)]
pub struct QueryHandler {
	strategy: QueryStrategy,
	state: Mutex<QueryState>,
}

impl QueryHandler {
	pub fn new(strategy: QueryStrategy) -> Self {
		Self {
			strategy,
			state: Mutex::new(QueryState::default()),
		}
	}

	pub fn strategy(&self) -> QueryStrategy {
		self.strategy
	}

	/// Order `peers` for the next call without holding the lock across any await.
	fn candidates(&self, peers: &[Peer]) -> Vec<Peer> {
		let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
		let start = match self.strategy {
			QueryStrategy::SingleSticky => state
				.sticky
				.as_ref()
				.and_then(|name| peers.iter().position(|peer| &peer.name == name))
				.unwrap_or(0),
			QueryStrategy::RoundRobin => {
				let start = state.next % peers.len();
				state.next = state.next.wrapping_add(1);
				start
			}
		};

		peers[start..]
			.iter()
			.chain(peers[..start].iter())
			.cloned()
			.collect()
	}

	fn remember(&self, peer: &Peer) {
		if self.strategy == QueryStrategy::SingleSticky {
			let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
			state.sticky = Some(peer.name.clone());
		}
	}

	/// Send `proposal` to one of `peers` and return its payload.
	///
	/// # Errors
	/// * `NoQueryPeers` if `peers` is empty.
	/// * `Query` with the chaincode failure if the answering peer returned `status >= 400`.
	/// * `Query` listing every peer if none of them could be reached.
	pub async fn evaluate(
		&self,
		gateway: &dyn LedgerGateway,
		peers: &[Peer],
		proposal: &Proposal,
		timeout: Duration,
	) -> Result<Vec<u8>, TransactionError> {
		if peers.is_empty() {
			return Err(TransactionError::NoQueryPeers);
		}

		let mut failures = Vec::new();
		for peer in self.candidates(peers) {
			debug!(
				"Evaluating {} on {} ({:?})",
				proposal.transaction_id, peer.name, self.strategy
			);
			let result = with_timeout(
				&peer.name,
				timeout,
				gateway.send_proposal(&peer, proposal, timeout),
			)
			.await;

			match result {
				Ok(response) => {
					self.remember(&peer);
					let response = EndorsementResponse::from_response(&peer.name, response);
					if response.is_valid() {
						return Ok(response.payload);
					}
					failures.push(EndorsementFailure::from_response(&response));
					return Err(TransactionError::Query { failures });
				}
				Err(e) => {
					warn!("Query peer {} unavailable: {}", peer.name, e);
					failures.push(EndorsementFailure::from_response(
						&EndorsementResponse::from_error(&peer.name, &e),
					));
				}
			}
		}

		Err(TransactionError::Query { failures })
	}
}

impl Default for QueryHandler {
	fn default() -> Self {
		Self::new(QueryStrategy::default())
	}
}
