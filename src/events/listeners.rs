//! Listener traits and the session handlers that drive them.
//!
//! Applications implement [`BlockListener`], [`ContractListener`] or [`CommitListener`], or wrap
//! an async closure with one of the `*_listener_fn` adapters. A listener is identified by its
//! `Arc` allocation: registering the same `Arc` twice is a no-op, and the same `Arc` is used to
//! remove it again.

use crate::events::dispatch::SessionHandler;
use crate::events::{
	BlockEvent, Checkpointer, CommitEvent, ContractEvent, ListenerResult, PeerEventError,
};
use crate::gateway::{BlockType, ChaincodeEvent, EventInfo};

use async_trait::async_trait;
use std::collections::HashSet;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, warn};

/// Receives every block from a peer's event service.
#[async_trait]
pub trait BlockListener: Send + Sync {
	async fn on_block(&self, event: BlockEvent) -> ListenerResult;

	/// Called when the event service feeding this listener fails. Delivery resumes after the
	/// service reconnects.
	async fn on_error(&self, error: &PeerEventError) {
		warn!("Block listener event service error: {}", error);
	}
}

/// Receives chaincode events emitted by valid transactions.
#[async_trait]
pub trait ContractListener: Send + Sync {
	async fn on_event(&self, event: ContractEvent) -> ListenerResult;

	async fn on_error(&self, error: &PeerEventError) {
		warn!("Contract listener event service error: {}", error);
	}
}

/// Receives the commit outcome of a single transaction, once per peer.
#[async_trait]
pub trait CommitListener: Send + Sync {
	async fn on_commit(&self, outcome: Result<CommitEvent, PeerEventError>) -> ListenerResult;
}

/// Adapter turning an async closure into a listener.
pub struct FnListener<F, Fut> {
	callback: F,
	_future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnListener<F, Fut> {
	fn new(callback: F) -> Self {
		Self {
			callback,
			_future: PhantomData,
		}
	}
}

#[async_trait]
impl<F, Fut> BlockListener for FnListener<F, Fut>
where
	F: Fn(BlockEvent) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = ListenerResult> + Send + 'static,
{
	async fn on_block(&self, event: BlockEvent) -> ListenerResult {
		(self.callback)(event).await
	}
}

#[async_trait]
impl<F, Fut> ContractListener for FnListener<F, Fut>
where
	F: Fn(ContractEvent) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = ListenerResult> + Send + 'static,
{
	async fn on_event(&self, event: ContractEvent) -> ListenerResult {
		(self.callback)(event).await
	}
}

#[async_trait]
impl<F, Fut> CommitListener for FnListener<F, Fut>
where
	F: Fn(Result<CommitEvent, PeerEventError>) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = ListenerResult> + Send + 'static,
{
	async fn on_commit(&self, outcome: Result<CommitEvent, PeerEventError>) -> ListenerResult {
		(self.callback)(outcome).await
	}
}

/// Wrap an async closure as a block listener.
pub fn block_listener_fn<F, Fut>(callback: F) -> Arc<dyn BlockListener>
where
	F: Fn(BlockEvent) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = ListenerResult> + Send + 'static,
{
	Arc::new(FnListener::new(callback))
}

/// Wrap an async closure as a contract listener.
pub fn contract_listener_fn<F, Fut>(callback: F) -> Arc<dyn ContractListener>
where
	F: Fn(ContractEvent) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = ListenerResult> + Send + 'static,
{
	Arc::new(FnListener::new(callback))
}

/// Wrap an async closure as a commit listener.
pub fn commit_listener_fn<F, Fut>(callback: F) -> Arc<dyn CommitListener>
where
	F: Fn(Result<CommitEvent, PeerEventError>) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = ListenerResult> + Send + 'static,
{
	Arc::new(FnListener::new(callback))
}

/// Log checkpoint failures without interrupting delivery.
macro_rules! checkpoint_op {
	($op:expr, $what:literal) => {
		if let Err(e) = $op.await {
			warn!("Failed to {}: {}", $what, e);
		}
	};
}

pub(crate) struct BlockSessionHandler {
	listener: Arc<dyn BlockListener>,
	checkpointer: Option<Arc<dyn Checkpointer>>,
}

impl BlockSessionHandler {
	pub(crate) fn new(
		listener: Arc<dyn BlockListener>,
		checkpointer: Option<Arc<dyn Checkpointer>>,
	) -> Self {
		Self {
			listener,
			checkpointer,
		}
	}
}

#[async_trait]
impl SessionHandler for BlockSessionHandler {
	async fn handle_event(&mut self, peer: &str, info: &EventInfo, _removed: &AtomicBool) {
		let block_number = info.block_number;

		if let Some(checkpointer) = &self.checkpointer {
			match checkpointer.block_number().await {
				Ok(Some(next)) if next > block_number => {
					debug!("Block {} already checkpointed, skipping", block_number);
					return;
				}
				Ok(_) => {}
				Err(e) => warn!("Failed to read checkpoint: {}", e),
			}
		}

		let event = BlockEvent {
			block_number,
			block_type: info.block_type,
			peer: peer.to_string(),
			info: Arc::new(info.clone()),
		};
		match self.listener.on_block(event).await {
			Ok(()) => {
				if let Some(checkpointer) = &self.checkpointer {
					checkpoint_op!(
						checkpointer.set_block_number(block_number + 1),
						"advance block checkpoint"
					);
				}
			}
			Err(e) => error!("Block listener failed on block {}: {}", block_number, e),
		}
	}

	async fn handle_error(&mut self, error: &PeerEventError) {
		self.listener.on_error(error).await;
	}
}

pub(crate) struct ContractSessionHandler {
	listener: Arc<dyn ContractListener>,
	chaincode_id: String,
	event_name: Option<String>,
	block_type: BlockType,
	checkpointer: Option<Arc<dyn Checkpointer>>,
}

impl ContractSessionHandler {
	pub(crate) fn new(
		listener: Arc<dyn ContractListener>,
		chaincode_id: impl Into<String>,
		event_name: Option<String>,
		block_type: BlockType,
		checkpointer: Option<Arc<dyn Checkpointer>>,
	) -> Self {
		Self {
			listener,
			chaincode_id: chaincode_id.into(),
			event_name,
			block_type,
			checkpointer,
		}
	}

	fn matches(&self, event: &ChaincodeEvent) -> bool {
		event.chaincode_id == self.chaincode_id
			&& self
				.event_name
				.as_ref()
				.is_none_or(|name| &event.event_name == name)
	}

	/// Transaction ids already delivered for `block_number`, or `None` if the block was fully
	/// processed before.
	async fn enter_block(&self, block_number: u64) -> Option<HashSet<String>> {
		let Some(checkpointer) = &self.checkpointer else {
			return Some(HashSet::new());
		};

		match checkpointer.block_number().await {
			Ok(Some(next)) if next > block_number => None,
			Ok(Some(next)) if next == block_number => match checkpointer.transaction_ids().await {
				Ok(ids) => Some(ids),
				Err(e) => {
					warn!("Failed to read checkpointed transactions: {}", e);
					Some(HashSet::new())
				}
			},
			Ok(_) => {
				checkpoint_op!(
					checkpointer.set_block_number(block_number),
					"move checkpoint to new block"
				);
				Some(HashSet::new())
			}
			Err(e) => {
				warn!("Failed to read checkpoint: {}", e);
				Some(HashSet::new())
			}
		}
	}
}

#[async_trait]
impl SessionHandler for ContractSessionHandler {
	async fn handle_event(&mut self, _peer: &str, info: &EventInfo, removed: &AtomicBool) {
		let block_number = info.block_number;
		let Some(delivered) = self.enter_block(block_number).await else {
			debug!("Block {} already checkpointed, skipping", block_number);
			return;
		};

		let mut complete = true;
		for transaction in &info.transactions {
			if !transaction.validation_code.is_valid() {
				continue;
			}
			let events: Vec<&ChaincodeEvent> = transaction
				.chaincode_events
				.iter()
				.filter(|event| self.matches(event))
				.collect();
			if events.is_empty() {
				continue;
			}
			if delivered.contains(&transaction.transaction_id) {
				debug!(
					"Transaction {} in block {} already delivered, skipping",
					transaction.transaction_id, block_number
				);
				continue;
			}

			let mut transaction_ok = true;
			for chaincode_event in events {
				if removed.load(Ordering::Acquire) {
					return;
				}
				let payload = match self.block_type {
					BlockType::Filtered => None,
					BlockType::Full | BlockType::Private => chaincode_event.payload.clone(),
				};
				let event = ContractEvent {
					chaincode_id: chaincode_event.chaincode_id.clone(),
					event_name: chaincode_event.event_name.clone(),
					payload,
					transaction_id: transaction.transaction_id.clone(),
					block_number,
					private_data: transaction.private_data.clone(),
				};
				if let Err(e) = self.listener.on_event(event).await {
					error!(
						"Contract listener failed on {} in transaction {}: {}",
						chaincode_event.event_name, transaction.transaction_id, e
					);
					transaction_ok = false;
				}
			}

			if !transaction_ok {
				complete = false;
			} else if let Some(checkpointer) = &self.checkpointer {
				checkpoint_op!(
					checkpointer.add_transaction_id(&transaction.transaction_id),
					"checkpoint transaction"
				);
			}
		}

		if complete && !removed.load(Ordering::Acquire) {
			if let Some(checkpointer) = &self.checkpointer {
				checkpoint_op!(
					checkpointer.set_block_number(block_number + 1),
					"advance contract checkpoint"
				);
			}
		}
	}

	async fn handle_error(&mut self, error: &PeerEventError) {
		self.listener.on_error(error).await;
	}
}

pub(crate) struct CommitSessionHandler {
	listener: Arc<dyn CommitListener>,
	peer: String,
	transaction_id: String,
}

impl CommitSessionHandler {
	pub(crate) fn new(
		listener: Arc<dyn CommitListener>,
		peer: impl Into<String>,
		transaction_id: impl Into<String>,
	) -> Self {
		Self {
			listener,
			peer: peer.into(),
			transaction_id: transaction_id.into(),
		}
	}
}

#[async_trait]
impl SessionHandler for CommitSessionHandler {
	async fn handle_event(&mut self, _peer: &str, info: &EventInfo, removed: &AtomicBool) {
		let Some(transaction) = info
			.transactions
			.iter()
			.find(|transaction| transaction.transaction_id == self.transaction_id)
		else {
			return;
		};
		if removed.load(Ordering::Acquire) {
			return;
		}

		let event = CommitEvent {
			transaction_id: transaction.transaction_id.clone(),
			peer: self.peer.clone(),
			validation_code: transaction.validation_code.clone(),
			block_number: info.block_number,
		};
		if let Err(e) = self.listener.on_commit(Ok(event)).await {
			error!("Commit listener failed for {}: {}", self.transaction_id, e);
		}
	}

	async fn handle_error(&mut self, error: &PeerEventError) {
		if let Err(e) = self.listener.on_commit(Err(error.clone())).await {
			error!("Commit listener failed for {}: {}", self.transaction_id, e);
		}
	}
}
