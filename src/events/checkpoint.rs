//! Checkpoint persistence for resumable listeners.
//!
//! A checkpoint stores the next block a listener still has to process, plus the ids of the
//! transactions it already delivered within that block. The id set is only meaningful for the
//! block number stored with it; moving the block number clears the set.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

/// Errors raised by checkpoint persistence
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
	#[error("Checkpoint I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Checkpoint serialization error: {0}")]
	Json(#[from] serde_json::Error),
}

/// Durable resume position of a single listener.
///
/// A checkpointer belongs to exactly one listener at a time. Sharing one instance between
/// listeners makes them overwrite each other's position.
#[async_trait]
pub trait Checkpointer: Send + Sync {
	/// Block to resume from, or `None` when nothing was ever recorded.
	async fn block_number(&self) -> Result<Option<u64>, CheckpointError>;

	/// Move to `block_number`, clearing the recorded transaction ids.
	async fn set_block_number(&self, block_number: u64) -> Result<(), CheckpointError>;

	/// Record that `transaction_id` was fully delivered within the current block.
	async fn add_transaction_id(&self, transaction_id: &str) -> Result<(), CheckpointError>;

	/// Transaction ids delivered within the current block.
	async fn transaction_ids(&self) -> Result<HashSet<String>, CheckpointError>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct CheckpointState {
	pub(crate) block_number: Option<u64>,
	pub(crate) transaction_ids: HashSet<String>,
}

impl CheckpointState {
	pub(crate) fn set_block_number(&mut self, block_number: u64) {
		self.block_number = Some(block_number);
		self.transaction_ids.clear();
	}
}

/// Process-local checkpointer. Useful for tests and for listeners that only need to survive
/// reconnects, not restarts.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointer {
	state: Mutex<CheckpointState>,
}

impl InMemoryCheckpointer {
	pub fn new() -> Self {
		Self::default()
	}

	/// Start from a known position.
	pub fn starting_at(block_number: u64) -> Self {
		let mut state = CheckpointState::default();
		state.set_block_number(block_number);
		Self {
			state: Mutex::new(state),
		}
	}
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
	async fn block_number(&self) -> Result<Option<u64>, CheckpointError> {
		Ok(self
			.state
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.block_number)
	}

	async fn set_block_number(&self, block_number: u64) -> Result<(), CheckpointError> {
		self.state
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.set_block_number(block_number);
		Ok(())
	}

	async fn add_transaction_id(&self, transaction_id: &str) -> Result<(), CheckpointError> {
		self.state
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.transaction_ids
			.insert(transaction_id.to_string());
		Ok(())
	}

	async fn transaction_ids(&self) -> Result<HashSet<String>, CheckpointError> {
		Ok(self
			.state
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.transaction_ids
			.clone())
	}
}
