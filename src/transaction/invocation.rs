//! Transaction invocations.
//!
//! A `Transaction` is a single attempt to run a chaincode function. Its transaction id is
//! generated once, when the invocation is created, and submitting or evaluating consumes it.

use crate::commit::{CommitStrategy, TransactionEventHandler};
use crate::gateway::{CommitRequest, Peer, Proposal};
use crate::network::Network;
use crate::transaction::{
	ProposalBuilder, TransactionError, TransactionId, collect_endorsements,
	select_endorsement_targets, validator,
};

use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

pub struct Transaction {
	network: Network,
	chaincode_id: String,
	name: String,
	transaction_id: TransactionId,
	nonce: Vec<u8>,
	transient: HashMap<String, Vec<u8>>,
	endorsing_peers: Option<Vec<Peer>>,
	endorsing_orgs: Option<Vec<String>>,
	commit_strategy: Option<Box<dyn CommitStrategy>>,
}

impl Transaction {
	pub(crate) fn new(network: Network, chaincode_id: String, name: impl Into<String>) -> Self {
		let (transaction_id, nonce) = TransactionId::generate(&network.identity().credentials);
		Self {
			network,
			chaincode_id,
			name: name.into(),
			transaction_id,
			nonce,
			transient: HashMap::new(),
			endorsing_peers: None,
			endorsing_orgs: None,
			commit_strategy: None,
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn transaction_id(&self) -> &TransactionId {
		&self.transaction_id
	}

	/// Private data passed to the chaincode but never written to the ledger.
	pub fn with_transient(mut self, transient: HashMap<String, Vec<u8>>) -> Self {
		self.transient = transient;
		self
	}

	/// Send the proposal to exactly these peers.
	pub fn with_endorsing_peers(mut self, peers: Vec<Peer>) -> Self {
		self.endorsing_peers = Some(peers);
		self
	}

	/// Restrict endorsement to these organizations.
	pub fn with_endorsing_organizations<I, S>(mut self, orgs: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.endorsing_orgs = Some(orgs.into_iter().map(Into::into).collect());
		self
	}

	/// Replace the network's default commit strategy for this invocation.
	pub fn with_commit_strategy(mut self, strategy: Box<dyn CommitStrategy>) -> Self {
		self.commit_strategy = Some(strategy);
		self
	}

	fn proposal<I, A>(&self, args: I) -> Result<Proposal, TransactionError>
	where
		I: IntoIterator<Item = A>,
		A: Into<Vec<u8>>,
	{
		ProposalBuilder::new()
			.with_channel(self.network.channel().name())
			.with_chaincode_id(&self.chaincode_id)
			.with_function(&self.name)
			.with_args(args)
			.with_transient(self.transient.clone())
			.with_transaction_id(
				self.transaction_id.clone(),
				self.nonce.clone(),
				self.network.identity().credentials.clone(),
			)
			.build()
	}

	/// Endorse, order and wait for the commit of this transaction.
	///
	/// # Returns
	/// The payload of the first valid endorsement response.
	///
	/// # Errors
	/// * `Endorsement` if no endorser returned a valid response. Nothing is sent for ordering.
	/// * `CommitRejected` if the orderer did not accept the transaction.
	/// * `InvalidTransaction`, `CommitFailed` or `CommitTimeout` from commit confirmation.
	pub async fn submit<I, A>(self, args: I) -> Result<Vec<u8>, TransactionError>
	where
		I: IntoIterator<Item = A>,
		A: Into<Vec<u8>>,
	{
		let proposal = self.proposal(args)?;
		let network = self.network;
		let options = network.options();
		info!(
			"Submitting transaction {} ({}:{})",
			self.transaction_id, self.chaincode_id, self.name
		);

		let targets = select_endorsement_targets(
			network.channel(),
			self.endorsing_peers.as_deref(),
			self.endorsing_orgs.as_deref(),
			options.discovery_enabled,
		)?;
		debug!("Endorsement targets: {:?}", targets);
		let responses = collect_endorsements(
			network.gateway().as_ref(),
			&targets,
			&proposal,
			options.proposal_timeout,
		)
		.await?;
		let endorsement = validator::validate(responses)?;

		let strategy = self
			.commit_strategy
			.or_else(|| network.default_commit_strategy());
		let mut events = TransactionEventHandler::new(
			network.clone(),
			self.transaction_id.clone(),
			strategy,
			options.commit_timeout,
		);
		events.start_listening().await?;

		let request = CommitRequest {
			transaction_id: self.transaction_id.clone(),
			proposal,
			endorsements: endorsement.valid,
		};
		let response = match network.send_commit(&request).await {
			Ok(response) => response,
			Err(e) => {
				events.cancel_listening();
				return Err(e);
			}
		};
		if !response.is_success() {
			events.cancel_listening();
			return Err(TransactionError::CommitRejected {
				transaction_id: self.transaction_id,
				status: response.status,
				message: response.message,
			});
		}

		events.wait_for_events().await?;
		info!("Transaction {} submitted", self.transaction_id);
		Ok(endorsement.payload)
	}

	/// Run the proposal on a single query peer without ordering it.
	pub async fn evaluate<I, A>(self, args: I) -> Result<Vec<u8>, TransactionError>
	where
		I: IntoIterator<Item = A>,
		A: Into<Vec<u8>>,
	{
		let proposal = self.proposal(args)?;
		let peers = match self.endorsing_peers {
			Some(peers) => peers,
			None => self.network.query_peers(),
		};
		debug!(
			"Evaluating transaction {} ({}:{}) on {} candidate peers",
			self.transaction_id,
			self.chaincode_id,
			self.name,
			peers.len()
		);

		self.network
			.query_handler()
			.evaluate(
				self.network.gateway().as_ref(),
				&peers,
				&proposal,
				self.network.options().proposal_timeout,
			)
			.await
	}
}

impl fmt::Debug for Transaction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Transaction")
			.field("chaincode_id", &self.chaincode_id)
			.field("name", &self.name)
			.field("transaction_id", &self.transaction_id)
			.field("endorsing_peers", &self.endorsing_peers)
			.field("endorsing_orgs", &self.endorsing_orgs)
			.finish_non_exhaustive()
	}
}
