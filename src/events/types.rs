use crate::events::{CheckpointError, Checkpointer};
use crate::gateway::{BlockType, EventInfo, ValidationCode};

use std::fmt;
use std::sync::Arc;

/// Result returned by listener callbacks. Errors are logged and never propagated.
pub type ListenerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A block delivered to a block listener.
#[derive(Debug, Clone)]
pub struct BlockEvent {
	pub block_number: u64,
	pub block_type: BlockType,
	/// Peer whose event service delivered the block.
	pub peer: String,
	pub info: Arc<EventInfo>,
}

/// A chaincode event from a valid transaction, delivered to a contract listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractEvent {
	pub chaincode_id: String,
	pub event_name: String,
	/// `None` when the listener uses filtered blocks.
	pub payload: Option<Vec<u8>>,
	pub transaction_id: String,
	pub block_number: u64,
	/// Private data of the emitting transaction, for private block listeners.
	pub private_data: Option<Vec<u8>>,
}

/// Commit outcome of one transaction as observed on one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEvent {
	pub transaction_id: String,
	pub peer: String,
	pub validation_code: ValidationCode,
	pub block_number: u64,
}

impl CommitEvent {
	pub fn is_valid(&self) -> bool {
		self.validation_code.is_valid()
	}
}

/// Failure of a peer's event service, reported to the listeners attached to it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("peer={peer}, message={message}")]
pub struct PeerEventError {
	pub peer: String,
	pub message: String,
}

impl PeerEventError {
	pub fn new(peer: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			peer: peer.into(),
			message: message.into(),
		}
	}
}

/// Error types for listener registration
#[derive(Debug, thiserror::Error)]
pub enum EventServiceError {
	#[error("No event source peers available on channel {channel}")]
	NoEventPeers { channel: String },

	#[error("Failed to read listener checkpoint: {0}")]
	Checkpoint(#[from] CheckpointError),
}

/// Registration options for block and contract listeners.
///
/// When both a checkpointer and a start block are given, the checkpoint's stored block number
/// wins. Without either, the listener only sees blocks committed after it was registered.
#[derive(Clone, Default)]
pub struct ListenerOptions {
	pub block_type: BlockType,
	pub start_block: Option<u64>,
	pub checkpointer: Option<Arc<dyn Checkpointer>>,
	/// Only deliver chaincode events with this name. Ignored by block listeners.
	pub event_name: Option<String>,
}

impl ListenerOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_block_type(mut self, block_type: BlockType) -> Self {
		self.block_type = block_type;
		self
	}

	pub fn with_start_block(mut self, start_block: u64) -> Self {
		self.start_block = Some(start_block);
		self
	}

	pub fn with_checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
		self.checkpointer = Some(checkpointer);
		self
	}

	pub fn with_event_name(mut self, event_name: impl Into<String>) -> Self {
		self.event_name = Some(event_name.into());
		self
	}
}

impl fmt::Debug for ListenerOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ListenerOptions")
			.field("block_type", &self.block_type)
			.field("start_block", &self.start_block)
			.field("checkpointer", &self.checkpointer.is_some())
			.field("event_name", &self.event_name)
			.finish()
	}
}
