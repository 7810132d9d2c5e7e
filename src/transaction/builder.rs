//! Proposal builder
//!
//! This module provides a builder pattern for constructing the unsigned proposals sent to
//! endorsers. Signing is done by the gateway collaborator.

use crate::gateway::Proposal;
use crate::transaction::{TransactionError, TransactionId};

use std::collections::HashMap;
use tracing::debug;

/// Builder for constructing transaction proposals
#[derive(Debug, Default)]
pub struct ProposalBuilder {
	/// Channel the chaincode is deployed on
	channel: Option<String>,
	/// Chaincode to invoke
	chaincode_id: Option<String>,
	/// Chaincode function name
	function: Option<String>,
	/// Function arguments
	args: Vec<Vec<u8>>,
	/// Transient data, never written to the ledger
	transient: HashMap<String, Vec<u8>>,
	/// Identifier, nonce and creator fixed at invocation construction
	transaction_id: Option<TransactionId>,
	nonce: Vec<u8>,
	creator: Vec<u8>,
}

impl ProposalBuilder {
	/// Creates a new proposal builder
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
		self.channel = Some(channel.into());
		self
	}

	pub fn with_chaincode_id(mut self, chaincode_id: impl Into<String>) -> Self {
		self.chaincode_id = Some(chaincode_id.into());
		self
	}

	pub fn with_function(mut self, function: impl Into<String>) -> Self {
		self.function = Some(function.into());
		self
	}

	pub fn with_args<I, A>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = A>,
		A: Into<Vec<u8>>,
	{
		self.args = args.into_iter().map(Into::into).collect();
		self
	}

	pub fn with_transient(mut self, transient: HashMap<String, Vec<u8>>) -> Self {
		self.transient = transient;
		self
	}

	/// Sets the transaction identity: id, the nonce it was derived from and the creator
	pub fn with_transaction_id(
		mut self,
		transaction_id: TransactionId,
		nonce: Vec<u8>,
		creator: Vec<u8>,
	) -> Self {
		self.transaction_id = Some(transaction_id);
		self.nonce = nonce;
		self.creator = creator;
		self
	}

	/// Builds the final proposal
	pub fn build(self) -> Result<Proposal, TransactionError> {
		let channel = self
			.channel
			.ok_or_else(|| TransactionError::InvalidProposal("channel is not set".to_string()))?;
		let chaincode_id = self.chaincode_id.ok_or_else(|| {
			TransactionError::InvalidProposal("chaincode id is not set".to_string())
		})?;
		let function = self
			.function
			.filter(|function| !function.is_empty())
			.ok_or_else(|| {
				TransactionError::InvalidProposal("function name is not set".to_string())
			})?;
		let transaction_id = self.transaction_id.ok_or_else(|| {
			TransactionError::InvalidProposal("transaction id is not set".to_string())
		})?;

		debug!(
			"Built proposal {} for {}:{} on channel {} with {} args",
			transaction_id,
			chaincode_id,
			function,
			channel,
			self.args.len()
		);

		Ok(Proposal {
			transaction_id,
			channel,
			chaincode_id,
			function,
			args: self.args,
			transient: self.transient,
			nonce: self.nonce,
			creator: self.creator,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builds_complete_proposal() {
		let (id, nonce) = TransactionId::generate(b"creator");
		let proposal = ProposalBuilder::new()
			.with_channel("mychannel")
			.with_chaincode_id("basic")
			.with_function("CreateAsset")
			.with_args(["asset1", "blue"])
			.with_transaction_id(id.clone(), nonce.clone(), b"creator".to_vec())
			.build()
			.unwrap();

		assert_eq!(proposal.transaction_id, id);
		assert_eq!(proposal.args, vec![b"asset1".to_vec(), b"blue".to_vec()]);
		assert_eq!(proposal.nonce, nonce);
	}

	#[test]
	fn missing_function_is_rejected() {
		let (id, nonce) = TransactionId::generate(b"creator");
		let error = ProposalBuilder::new()
			.with_channel("mychannel")
			.with_chaincode_id("basic")
			.with_function("")
			.with_transaction_id(id, nonce, Vec::new())
			.build()
			.unwrap_err();

		assert!(matches!(error, TransactionError::InvalidProposal(_)));
	}
}
