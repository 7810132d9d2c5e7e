use crate::events::{ContractListener, EventServiceError, ListenerOptions};
use crate::network::Network;
use crate::transaction::{Transaction, TransactionError};

use std::sync::Arc;

/// A chaincode deployed on a channel.
#[derive(Clone)]
pub struct Contract {
	network: Network,
	chaincode_id: String,
}

impl Contract {
	pub(crate) fn new(network: Network, chaincode_id: impl Into<String>) -> Self {
		Self {
			network,
			chaincode_id: chaincode_id.into(),
		}
	}

	pub fn chaincode_id(&self) -> &str {
		&self.chaincode_id
	}

	pub fn network(&self) -> &Network {
		&self.network
	}

	/// Create an invocation of `name` with a freshly generated transaction id.
	pub fn create_transaction(&self, name: impl Into<String>) -> Transaction {
		Transaction::new(self.network.clone(), self.chaincode_id.clone(), name)
	}

	/// Submit `name` with `args` using the default options and return the endorsed payload.
	pub async fn submit_transaction<I, A>(
		&self,
		name: impl Into<String>,
		args: I,
	) -> Result<Vec<u8>, TransactionError>
	where
		I: IntoIterator<Item = A>,
		A: Into<Vec<u8>>,
	{
		self.create_transaction(name).submit(args).await
	}

	/// Evaluate `name` with `args` on a single query peer.
	pub async fn evaluate_transaction<I, A>(
		&self,
		name: impl Into<String>,
		args: I,
	) -> Result<Vec<u8>, TransactionError>
	where
		I: IntoIterator<Item = A>,
		A: Into<Vec<u8>>,
	{
		self.create_transaction(name).evaluate(args).await
	}

	/// Register a listener for this contract's chaincode events.
	pub async fn add_contract_listener(
		&self,
		listener: Arc<dyn ContractListener>,
		options: ListenerOptions,
	) -> Result<Arc<dyn ContractListener>, EventServiceError> {
		self.network
			.add_contract_listener(&self.chaincode_id, listener, options)
			.await
	}

	/// Remove a contract listener. Safe to call more than once and from inside the listener.
	pub fn remove_contract_listener(&self, listener: &Arc<dyn ContractListener>) {
		self.network
			.remove_contract_listener(&self.chaincode_id, listener);
	}
}
