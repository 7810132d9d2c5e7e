//! Client SDK for a permissioned ledger network.
//!
//! Applications endorse transaction proposals, send the endorsed result for ordering and learn
//! whether the transaction committed, and subscribe to block and chaincode events with exact
//! resume after a restart. Connections, signing and block decoding are supplied by the
//! application through the [`gateway::LedgerGateway`] trait.

pub mod commit;
pub mod events;
pub mod gateway;
pub mod network;
pub mod transaction;
pub mod utils;

#[cfg(test)]
mod mock;

pub use commit::{AllForTx, AnyForTx, CommitStrategy, CommitStrategyKind};
pub use events::{
	BlockListener, Checkpointer, CommitListener, ContractListener, FileCheckpointer,
	InMemoryCheckpointer, ListenerOptions,
};
pub use gateway::{EndorsementHandler, LedgerGateway};
pub use network::{Channel, Contract, GatewayOptions, Network};
pub use transaction::{Transaction, TransactionError, TransactionId};
