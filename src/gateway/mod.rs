//! Gateway collaborator module
//!
//! This module defines the boundary between the SDK and the outside world: the traits an
//! application implements to reach peers, orderers and the discovery service, and the decoded
//! data those collaborators hand back. Wire formats, TLS and signing live behind these traits.

/// Collaborator traits for endorsers, orderers, event services and discovery
mod client;
/// Type definitions for proposals, responses and decoded blocks
mod types;

pub use client::{EndorsementHandler, EventStream, LedgerGateway};
pub(crate) use client::with_timeout;
pub use types::*;
