//! Ledger event delivery.
//!
//! Event services subscribe to peers and feed a per-service listener registry. Listener sessions
//! turn the raw block stream into ordered block, contract and commit callbacks, optionally
//! resuming from a checkpoint.

mod checkpoint;
pub(crate) mod dispatch;
mod file_checkpoint;
pub(crate) mod listeners;
mod manager;
mod service;
mod types;

pub use checkpoint::{CheckpointError, Checkpointer, InMemoryCheckpointer};
pub use file_checkpoint::FileCheckpointer;
pub use listeners::{
	BlockListener, CommitListener, ContractListener, FnListener, block_listener_fn,
	commit_listener_fn, contract_listener_fn,
};
pub use manager::EventServiceManager;
pub use service::{ConnectionStatus, EventService};
pub use types::*;
