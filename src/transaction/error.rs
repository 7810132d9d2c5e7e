use crate::events::{EventServiceError, PeerEventError};
use crate::gateway::{GatewayError, ValidationCode};
use crate::transaction::TransactionId;
use crate::transaction::validator::{EndorsementError, EndorsementFailure};

use itertools::Itertools;
use std::time::Duration;

/// Error types for submitting and evaluating transactions
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
	#[error("Invalid proposal: {0}")]
	InvalidProposal(String),

	#[error("No endorsing peers available for the transaction")]
	NoEndorsers,

	#[error("No query peers available for the transaction")]
	NoQueryPeers,

	#[error("No orderers available to commit transaction {0}")]
	NoOrderers(TransactionId),

	#[error(transparent)]
	Endorsement(#[from] EndorsementError),

	#[error(
		"Query failed. {} peer error responses:\n    {}",
		.failures.len(),
		.failures.iter().join("\n    ")
	)]
	Query { failures: Vec<EndorsementFailure> },

	#[error("Gateway error: {0}")]
	Gateway(#[from] GatewayError),

	#[error("Commit of transaction {transaction_id} rejected by orderer: status={status}, message={message}")]
	CommitRejected {
		transaction_id: TransactionId,
		status: String,
		message: String,
	},

	#[error("Transaction {transaction_id} committed as invalid on {peer}: {code}")]
	InvalidTransaction {
		transaction_id: TransactionId,
		peer: String,
		code: ValidationCode,
	},

	#[error(
		"Commit of transaction {transaction_id} not confirmed by any peer:\n    {}",
		.failures.iter().join("\n    ")
	)]
	CommitFailed {
		transaction_id: TransactionId,
		failures: Vec<PeerEventError>,
	},

	#[error("Timed out after {timeout:?} waiting for commit of transaction {transaction_id} from peers: {}", .pending_peers.join(", "))]
	CommitTimeout {
		transaction_id: TransactionId,
		timeout: Duration,
		pending_peers: Vec<String>,
	},

	#[error("Failed to listen for commit events: {0}")]
	Events(#[from] EventServiceError),

	#[error("Internal error: {0}")]
	Internal(String),
}

impl TransactionError {
	/// `true` when the outcome of the transaction is unknown because confirmation timed out.
	pub fn is_timeout(&self) -> bool {
		matches!(
			self,
			TransactionError::CommitTimeout { .. }
				| TransactionError::Gateway(GatewayError::Timeout { .. })
		)
	}
}
