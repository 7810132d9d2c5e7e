//! Transaction invocations: proposal construction, endorsement, evaluation and submission.

/// Proposal builder
pub mod builder;
mod error;
mod invocation;
mod query;
mod targets;
mod txid;
/// Endorsement response validation
pub mod validator;

pub use builder::ProposalBuilder;
pub use error::TransactionError;
pub use invocation::Transaction;
pub use query::{QueryHandler, QueryStrategy};
pub use targets::{EndorsementTargets, collect_endorsements, select_endorsement_targets};
pub use txid::{NONCE_LENGTH, TransactionId};
pub use validator::{EndorsementError, EndorsementFailure, EndorsementResult};
