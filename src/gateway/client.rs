//!
//! Collaborator interfaces for talking to peers and orderers.
//!
//! The SDK never opens connections itself. Applications supply an implementation of
//! [`LedgerGateway`] that owns the network connections, TLS and request signing, and optionally
//! an [`EndorsementHandler`] backed by the discovery service. All methods are async and designed
//! for use with Tokio.

use super::types::*;

use async_trait::async_trait;
use futures_util::Stream;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// Stream of decoded deliveries from one event-service subscription.
///
/// Each item is either a decoded block or a transport error. An error ends the usable life of
/// the stream; the event service reconnects with a fresh start request.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventInfo, GatewayError>> + Send>>;

/// Connection-owning collaborator for endorsers, orderers and event services.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
	/// Sign and send a proposal to a single peer.
	///
	/// # Arguments
	/// * `peer` - The endorsing or query peer.
	/// * `proposal` - The unsigned proposal.
	/// * `timeout` - Upper bound for the request.
	async fn send_proposal(
		&self,
		peer: &Peer,
		proposal: &Proposal,
		timeout: Duration,
	) -> Result<ProposalResponse, GatewayError>;

	/// Sign and send an endorsed transaction to an orderer.
	///
	/// # Returns
	/// The orderer's acknowledgement; a non-`SUCCESS` status is not an `Err`.
	async fn send_commit(
		&self,
		orderer: &Orderer,
		request: &CommitRequest,
		timeout: Duration,
	) -> Result<CommitResponse, GatewayError>;

	/// Open an event-service subscription on a peer.
	///
	/// # Errors
	/// Returns `GatewayError` if the subscription could not be established.
	async fn start_event_service(
		&self,
		peer: &Peer,
		request: &EventServiceRequest,
	) -> Result<EventStream, GatewayError>;
}

/// Opaque endorsement plan supplied by the discovery service.
///
/// The handler picks its own peers for the chaincode's endorsement policy and can also forward
/// the endorsed transaction to an orderer of its choosing.
#[async_trait]
pub trait EndorsementHandler: Send + Sync {
	/// Endorse a proposal, optionally restricted to the given organizations.
	async fn endorse(
		&self,
		proposal: &Proposal,
		required_orgs: Option<&[String]>,
		timeout: Duration,
	) -> Result<Vec<EndorsementResponse>, GatewayError>;

	/// Forward an endorsed transaction to the ordering service.
	async fn commit(
		&self,
		request: &CommitRequest,
		timeout: Duration,
	) -> Result<CommitResponse, GatewayError>;
}

/// Bound a gateway call by `timeout`, mapping expiry to `GatewayError::Timeout`.
pub(crate) async fn with_timeout<T, F>(
	target: &str,
	timeout: Duration,
	request: F,
) -> Result<T, GatewayError>
where
	F: Future<Output = Result<T, GatewayError>>,
{
	match tokio::time::timeout(timeout, request).await {
		Ok(result) => result,
		Err(_) => {
			debug!("Request to {} timed out after {:?}", target, timeout);
			Err(GatewayError::Timeout {
				target: target.to_string(),
				timeout,
			})
		}
	}
}
