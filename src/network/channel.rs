//! Channel membership.
//!
//! A `Channel` is the static view of who participates in a channel: its peers with their roles,
//! its orderers, and an optional discovery-backed endorsement handler. Loading this view from a
//! connection profile is up to the application.

use crate::gateway::{EndorsementHandler, Orderer, Peer};

use itertools::Itertools;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct Channel {
	name: String,
	peers: Vec<Peer>,
	orderers: Vec<Orderer>,
	discovery: Option<Arc<dyn EndorsementHandler>>,
}

impl Channel {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			peers: Vec::new(),
			orderers: Vec::new(),
			discovery: None,
		}
	}

	/// Add a peer. A peer with the same name replaces the earlier entry.
	pub fn with_peer(mut self, peer: Peer) -> Self {
		self.peers.retain(|existing| existing.name != peer.name);
		self.peers.push(peer);
		self
	}

	pub fn with_orderer(mut self, orderer: Orderer) -> Self {
		self.orderers.push(orderer);
		self
	}

	/// Attach the discovery-supplied endorsement handler.
	pub fn with_discovery(mut self, handler: Arc<dyn EndorsementHandler>) -> Self {
		self.discovery = Some(handler);
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn peers(&self) -> &[Peer] {
		&self.peers
	}

	pub fn peer(&self, name: &str) -> Option<&Peer> {
		self.peers.iter().find(|peer| peer.name == name)
	}

	pub fn orderers(&self) -> &[Orderer] {
		&self.orderers
	}

	pub fn discovery(&self) -> Option<&Arc<dyn EndorsementHandler>> {
		self.discovery.as_ref()
	}

	/// Organizations that own at least one peer, in first-seen order.
	pub fn organizations(&self) -> Vec<String> {
		self.peers
			.iter()
			.map(|peer| peer.msp_id.clone())
			.unique()
			.collect()
	}

	/// All endorsing peers on the channel.
	pub fn endorsers(&self) -> Vec<Peer> {
		self.peers
			.iter()
			.filter(|peer| peer.roles.endorsing_peer)
			.cloned()
			.collect()
	}

	/// Endorsing peers belonging to `msp_id`.
	pub fn org_endorsers(&self, msp_id: &str) -> Vec<Peer> {
		self.peers
			.iter()
			.filter(|peer| peer.roles.endorsing_peer && peer.msp_id == msp_id)
			.cloned()
			.collect()
	}

	/// Chaincode query peers, restricted to `msp_id` when given.
	pub fn query_peers(&self, msp_id: Option<&str>) -> Vec<Peer> {
		self.peers
			.iter()
			.filter(|peer| peer.roles.chaincode_query)
			.filter(|peer| msp_id.is_none_or(|msp_id| peer.msp_id == msp_id))
			.cloned()
			.collect()
	}

	/// Event source peers, restricted to `msp_id` when given.
	pub fn event_peers(&self, msp_id: Option<&str>) -> Vec<Peer> {
		self.peers
			.iter()
			.filter(|peer| peer.roles.event_source)
			.filter(|peer| msp_id.is_none_or(|msp_id| peer.msp_id == msp_id))
			.cloned()
			.collect()
	}
}

impl fmt::Debug for Channel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Channel")
			.field("name", &self.name)
			.field("peers", &self.peers)
			.field("orderers", &self.orderers)
			.field("discovery", &self.discovery.is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::gateway::PeerRoles;

	fn channel() -> Channel {
		Channel::new("mychannel")
			.with_peer(Peer::new("peer0.org1", "Org1MSP", "grpcs://peer0.org1:7051"))
			.with_peer(
				Peer::new("peer1.org1", "Org1MSP", "grpcs://peer1.org1:7051").with_roles(PeerRoles {
					endorsing_peer: false,
					event_source: false,
					..Default::default()
				}),
			)
			.with_peer(Peer::new("peer0.org2", "Org2MSP", "grpcs://peer0.org2:9051"))
	}

	#[test]
	fn role_filters_respect_peer_roles() {
		let channel = channel();

		let endorsers: Vec<_> = channel.endorsers().into_iter().map(|p| p.name).collect();
		assert_eq!(endorsers, vec!["peer0.org1", "peer0.org2"]);

		let org1_queries: Vec<_> = channel
			.query_peers(Some("Org1MSP"))
			.into_iter()
			.map(|p| p.name)
			.collect();
		assert_eq!(org1_queries, vec!["peer0.org1", "peer1.org1"]);

		assert_eq!(channel.event_peers(Some("Org1MSP")).len(), 1);
		assert_eq!(channel.event_peers(None).len(), 2);
		assert_eq!(channel.organizations(), vec!["Org1MSP", "Org2MSP"]);
	}

	#[test]
	fn adding_a_peer_twice_replaces_it() {
		let channel = channel().with_peer(Peer::new("peer0.org1", "Org1MSP", "grpcs://moved:7051"));
		assert_eq!(channel.peers().len(), 3);
		assert_eq!(
			channel.peer("peer0.org1").map(|p| p.url.as_str()),
			Some("grpcs://moved:7051")
		);
	}
}
