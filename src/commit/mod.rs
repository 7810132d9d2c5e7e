//! Commit confirmation: quorum strategies and the per-transaction event handler.

mod handler;
mod strategies;
mod tally;

pub use handler::TransactionEventHandler;
pub use strategies::{AllForTx, AnyForTx, CommitStrategy, CommitStrategyKind, Decision};
pub use tally::CommitTally;
