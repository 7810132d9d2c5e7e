//! Endorsement target selection and proposal fan-out.
//!
//! Targets are chosen in priority order:
//! 1. peers explicitly assigned to the invocation,
//! 2. the discovery handler, restricted to explicitly assigned organizations if any,
//! 3. the endorsers of explicitly assigned organizations,
//! 4. every endorser on the channel.

use crate::gateway::{
	EndorsementHandler, EndorsementResponse, LedgerGateway, Peer, Proposal, with_timeout,
};
use crate::network::Channel;
use crate::transaction::TransactionError;

use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where a proposal is sent.
#[derive(Clone)]
pub enum EndorsementTargets {
	/// Send to each peer and collect one response per peer.
	Peers(Vec<Peer>),
	/// Let the discovery handler pick peers satisfying the endorsement policy.
	Handler {
		handler: Arc<dyn EndorsementHandler>,
		required_orgs: Option<Vec<String>>,
	},
}

impl fmt::Debug for EndorsementTargets {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			EndorsementTargets::Peers(peers) => f
				.debug_tuple("Peers")
				.field(&peers.iter().map(|peer| peer.name.as_str()).collect::<Vec<_>>())
				.finish(),
			EndorsementTargets::Handler { required_orgs, .. } => f
				.debug_struct("Handler")
				.field("required_orgs", required_orgs)
				.finish_non_exhaustive(),
		}
	}
}

/// Resolve the endorsement targets for one invocation.
///
/// # Errors
/// Returns `TransactionError::NoEndorsers` when the resolved peer set is empty.
pub fn select_endorsement_targets(
	channel: &Channel,
	endorsing_peers: Option<&[Peer]>,
	endorsing_orgs: Option<&[String]>,
	discovery_enabled: bool,
) -> Result<EndorsementTargets, TransactionError> {
	if let Some(peers) = endorsing_peers {
		debug!("Using {} explicitly assigned endorsing peers", peers.len());
		return non_empty(peers.to_vec());
	}

	if discovery_enabled {
		if let Some(handler) = channel.discovery() {
			debug!(
				"Using discovery endorsement handler (required orgs: {:?})",
				endorsing_orgs
			);
			return Ok(EndorsementTargets::Handler {
				handler: handler.clone(),
				required_orgs: endorsing_orgs.map(<[String]>::to_vec),
			});
		}
	}

	if let Some(orgs) = endorsing_orgs {
		let mut peers: Vec<Peer> = Vec::new();
		for org in orgs {
			for peer in channel.org_endorsers(org) {
				if !peers.iter().any(|existing| existing.name == peer.name) {
					peers.push(peer);
				}
			}
		}
		debug!(
			"Using {} endorsers from organizations {:?}",
			peers.len(),
			orgs
		);
		return non_empty(peers);
	}

	non_empty(channel.endorsers())
}

fn non_empty(peers: Vec<Peer>) -> Result<EndorsementTargets, TransactionError> {
	if peers.is_empty() {
		Err(TransactionError::NoEndorsers)
	} else {
		Ok(EndorsementTargets::Peers(peers))
	}
}

/// Send `proposal` to the targets and collect every response.
///
/// A peer that cannot be reached, or does not answer within `timeout`, contributes a response
/// carrying the transport error instead of failing the whole call.
///
/// # Errors
/// Returns `TransactionError::Gateway` only when the discovery handler itself fails.
pub async fn collect_endorsements(
	gateway: &dyn LedgerGateway,
	targets: &EndorsementTargets,
	proposal: &Proposal,
	timeout: Duration,
) -> Result<Vec<EndorsementResponse>, TransactionError> {
	match targets {
		EndorsementTargets::Peers(peers) => {
			info!(
				"Sending proposal {} to {} peers",
				proposal.transaction_id,
				peers.len()
			);
			let requests = peers.iter().map(|peer| async move {
				let result = with_timeout(
					&peer.name,
					timeout,
					gateway.send_proposal(peer, proposal, timeout),
				)
				.await;
				match result {
					Ok(response) => EndorsementResponse::from_response(&peer.name, response),
					Err(e) => {
						warn!("Proposal to {} failed: {}", peer.name, e);
						EndorsementResponse::from_error(&peer.name, &e)
					}
				}
			});
			Ok(join_all(requests).await)
		}
		EndorsementTargets::Handler {
			handler,
			required_orgs,
		} => {
			info!(
				"Sending proposal {} through discovery handler",
				proposal.transaction_id
			);
			let responses = with_timeout(
				"discovery",
				timeout,
				handler.endorse(proposal, required_orgs.as_deref(), timeout),
			)
			.await?;
			Ok(responses)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::gateway::{CommitRequest, CommitResponse, GatewayError, PeerRoles};
	use async_trait::async_trait;

	struct StaticDiscovery;

	#[async_trait]
	impl EndorsementHandler for StaticDiscovery {
		async fn endorse(
			&self,
			_proposal: &Proposal,
			_required_orgs: Option<&[String]>,
			_timeout: Duration,
		) -> Result<Vec<EndorsementResponse>, GatewayError> {
			Ok(Vec::new())
		}

		async fn commit(
			&self,
			_request: &CommitRequest,
			_timeout: Duration,
		) -> Result<CommitResponse, GatewayError> {
			Ok(CommitResponse::success())
		}
	}

	fn channel() -> Channel {
		Channel::new("mychannel")
			.with_peer(Peer::new("peer0.org1", "Org1MSP", "grpc://peer0.org1"))
			.with_peer(Peer::new("peer1.org1", "Org1MSP", "grpc://peer1.org1"))
			.with_peer(Peer::new("peer0.org2", "Org2MSP", "grpc://peer0.org2"))
			.with_peer(
				Peer::new("observer.org3", "Org3MSP", "grpc://observer.org3").with_roles(PeerRoles {
					endorsing_peer: false,
					..Default::default()
				}),
			)
	}

	fn peer_names(targets: EndorsementTargets) -> Vec<String> {
		match targets {
			EndorsementTargets::Peers(peers) => peers.into_iter().map(|p| p.name).collect(),
			EndorsementTargets::Handler { .. } => panic!("expected peer targets"),
		}
	}

	#[test]
	fn explicit_peers_win_over_everything() {
		let channel = channel().with_discovery(Arc::new(StaticDiscovery));
		let explicit = vec![Peer::new("peer0.org2", "Org2MSP", "grpc://peer0.org2")];
		let orgs = vec!["Org1MSP".to_string()];

		let targets =
			select_endorsement_targets(&channel, Some(&explicit), Some(&orgs), true).unwrap();
		assert_eq!(peer_names(targets), vec!["peer0.org2"]);
	}

	#[test]
	fn discovery_handler_carries_org_filter() {
		let channel = channel().with_discovery(Arc::new(StaticDiscovery));
		let orgs = vec!["Org2MSP".to_string()];

		match select_endorsement_targets(&channel, None, Some(&orgs), true).unwrap() {
			EndorsementTargets::Handler { required_orgs, .. } => {
				assert_eq!(required_orgs, Some(orgs));
			}
			other => panic!("expected discovery handler, got {:?}", other),
		}
	}

	#[test]
	fn organizations_without_discovery_use_union_of_org_endorsers() {
		let channel = channel().with_discovery(Arc::new(StaticDiscovery));
		let orgs = vec![
			"Org2MSP".to_string(),
			"Org1MSP".to_string(),
			"Org2MSP".to_string(),
		];

		let targets = select_endorsement_targets(&channel, None, Some(&orgs), false).unwrap();
		assert_eq!(
			peer_names(targets),
			vec!["peer0.org2", "peer0.org1", "peer1.org1"]
		);
	}

	#[test]
	fn falls_back_to_all_channel_endorsers() {
		let targets = select_endorsement_targets(&channel(), None, None, true).unwrap();
		assert_eq!(
			peer_names(targets),
			vec!["peer0.org1", "peer1.org1", "peer0.org2"]
		);
	}

	#[test]
	fn empty_resolution_is_an_error() {
		let orgs = vec!["Org3MSP".to_string()];
		let error = select_endorsement_targets(&channel(), None, Some(&orgs), false).unwrap_err();
		assert!(matches!(error, TransactionError::NoEndorsers));
	}
}
