//! Commit confirmation for a submitted transaction.
//!
//! The handler registers a commit listener on the strategy's peers before the transaction is
//! sent to the orderer, then feeds the per-peer outcomes into the strategy until it decides or
//! the commit timeout expires. The commit timeout runs from the moment listening starts, so
//! slow event-service connections count against it. The listener is removed on every exit path.

use crate::commit::{CommitStrategy, CommitTally, Decision};
use crate::events::{CommitEvent, CommitListener, PeerEventError, commit_listener_fn};
use crate::network::Network;
use crate::transaction::{TransactionError, TransactionId};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type Outcome = Result<CommitEvent, PeerEventError>;

pub struct TransactionEventHandler {
	network: Network,
	transaction_id: TransactionId,
	strategy: Option<Box<dyn CommitStrategy>>,
	timeout: Duration,
	deadline: Option<Instant>,
	listener: Option<Arc<dyn CommitListener>>,
	receiver: Option<mpsc::UnboundedReceiver<Outcome>>,
}

impl TransactionEventHandler {
	pub fn new(
		network: Network,
		transaction_id: TransactionId,
		strategy: Option<Box<dyn CommitStrategy>>,
		timeout: Duration,
	) -> Self {
		Self {
			network,
			transaction_id,
			strategy,
			timeout,
			deadline: None,
			listener: None,
			receiver: None,
		}
	}

	/// Register the commit listener on the strategy's peers.
	///
	/// Does nothing without a strategy or when the strategy has no peers.
	pub async fn start_listening(&mut self) -> Result<(), TransactionError> {
		let Some(strategy) = &self.strategy else {
			debug!(
				"Not waiting for commit events of {}",
				self.transaction_id
			);
			return Ok(());
		};
		if strategy.peers().is_empty() {
			warn!(
				"Commit strategy {} has no event peers, not waiting for commit of {}",
				strategy.name(),
				self.transaction_id
			);
			self.strategy = None;
			return Ok(());
		}

		let (sender, receiver) = mpsc::unbounded_channel();
		let listener = commit_listener_fn(move |outcome: Outcome| {
			let sender = sender.clone();
			async move {
				sender.send(outcome)?;
				Ok(())
			}
		});

		debug!(
			"Listening for commit of {} on {} peers ({})",
			self.transaction_id,
			strategy.peers().len(),
			strategy.name()
		);
		let peers = strategy.peers().to_vec();
		self.deadline = Some(Instant::now() + self.timeout);
		self.listener = Some(Arc::clone(&listener));
		self.receiver = Some(receiver);
		self.network
			.add_commit_listener(listener, &peers, self.transaction_id.as_str())
			.await?;
		Ok(())
	}

	/// Wait until the strategy decides, the transaction is reported invalid, or the commit
	/// timeout expires.
	pub async fn wait_for_events(mut self) -> Result<(), TransactionError> {
		let (Some(strategy), Some(mut receiver)) = (self.strategy.take(), self.receiver.take())
		else {
			return Ok(());
		};

		let transaction_id = self.transaction_id.clone();
		let mut tally = CommitTally::new(strategy.peers().len());
		let drive = async {
			while let Some(outcome) = receiver.recv().await {
				match outcome {
					Ok(event) if !event.is_valid() => {
						return Err(TransactionError::InvalidTransaction {
							transaction_id: transaction_id.clone(),
							peer: event.peer,
							code: event.validation_code,
						});
					}
					Ok(event) => {
						tally.record_success(event);
					}
					Err(error) => {
						warn!(
							"Commit event error for {} from {}: {}",
							transaction_id, error.peer, error.message
						);
						tally.record_failure(error);
					}
				}

				match strategy.decide(&tally) {
					Decision::Pending => continue,
					Decision::Committed => {
						info!(
							"Transaction {} committed ({})",
							transaction_id,
							tally.summary()
						);
						return Ok(());
					}
					Decision::Failed => {
						return Err(TransactionError::CommitFailed {
							transaction_id: transaction_id.clone(),
							failures: tally.failures().to_vec(),
						});
					}
				}
			}
			Err(TransactionError::Internal(format!(
				"commit listener for {} closed",
				transaction_id
			)))
		};

		let deadline = self
			.deadline
			.unwrap_or_else(|| Instant::now() + self.timeout);
		let outcome = tokio::time::timeout_at(deadline, drive).await;
		let result = match outcome {
			Ok(result) => result,
			Err(_) => Err(TransactionError::CommitTimeout {
				transaction_id: self.transaction_id.clone(),
				timeout: self.timeout,
				pending_peers: tally.pending_peers(strategy.peers()),
			}),
		};

		self.cancel_listening();
		result
	}

	/// Remove the commit listener, if registered.
	pub fn cancel_listening(&mut self) {
		if let Some(listener) = self.listener.take() {
			debug!("Removing commit listener for {}", self.transaction_id);
			self.network.remove_commit_listener(&listener);
		}
		self.receiver = None;
	}
}

impl Drop for TransactionEventHandler {
	fn drop(&mut self) {
		self.cancel_listening();
	}
}
