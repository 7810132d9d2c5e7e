use crate::commit::CommitTally;
use crate::gateway::Peer;
use crate::network::Channel;

use serde::{Deserialize, Serialize};

/// Verdict of a commit strategy on the outcomes collected so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
	/// Keep waiting for more peers.
	Pending,
	Committed,
	Failed,
}

/// Quorum rule deciding when a submitted transaction counts as committed
pub trait CommitStrategy: Send + Sync {
	/// Peers whose commit events are awaited
	fn peers(&self) -> &[Peer];

	/// Judge the outcomes collected so far
	fn decide(&self, tally: &CommitTally) -> Decision;

	/// Get the name of this strategy
	fn name(&self) -> &'static str;
}

/// Wait for every peer, then succeed if at least one of them saw the commit.
#[derive(Debug, Clone)]
pub struct AllForTx {
	peers: Vec<Peer>,
}

impl AllForTx {
	pub fn new(peers: Vec<Peer>) -> Self {
		Self { peers }
	}
}

impl CommitStrategy for AllForTx {
	fn peers(&self) -> &[Peer] {
		&self.peers
	}

	fn decide(&self, tally: &CommitTally) -> Decision {
		if !tally.is_complete() {
			Decision::Pending
		} else if tally.success_count() > 0 {
			Decision::Committed
		} else {
			Decision::Failed
		}
	}

	fn name(&self) -> &'static str {
		"AllForTx"
	}
}

/// Succeed on the first peer that saw the commit; fail once every peer failed.
#[derive(Debug, Clone)]
pub struct AnyForTx {
	peers: Vec<Peer>,
}

impl AnyForTx {
	pub fn new(peers: Vec<Peer>) -> Self {
		Self { peers }
	}
}

impl CommitStrategy for AnyForTx {
	fn peers(&self) -> &[Peer] {
		&self.peers
	}

	fn decide(&self, tally: &CommitTally) -> Decision {
		if tally.success_count() > 0 {
			Decision::Committed
		} else if tally.is_complete() {
			Decision::Failed
		} else {
			Decision::Pending
		}
	}

	fn name(&self) -> &'static str {
		"AnyForTx"
	}
}

/// Default commit strategy, resolved against the channel when a transaction is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommitStrategyKind {
	/// Every event peer of the local organization.
	#[default]
	OrgAllForTx,
	/// Any event peer of the local organization; the first success wins.
	OrgAnyForTx,
	/// Every event peer on the channel.
	NetworkAllForTx,
	/// Any event peer on the channel; the first success wins.
	NetworkAnyForTx,
	/// Do not wait for commit events.
	NoWait,
}

impl CommitStrategyKind {
	/// Build the strategy for `msp_id` on `channel`. `NoWait` builds nothing.
	pub fn build(&self, channel: &Channel, msp_id: &str) -> Option<Box<dyn CommitStrategy>> {
		let strategy: Box<dyn CommitStrategy> = match self {
			CommitStrategyKind::OrgAllForTx => {
				Box::new(AllForTx::new(channel.event_peers(Some(msp_id))))
			}
			CommitStrategyKind::OrgAnyForTx => {
				Box::new(AnyForTx::new(channel.event_peers(Some(msp_id))))
			}
			CommitStrategyKind::NetworkAllForTx => Box::new(AllForTx::new(channel.event_peers(None))),
			CommitStrategyKind::NetworkAnyForTx => Box::new(AnyForTx::new(channel.event_peers(None))),
			CommitStrategyKind::NoWait => return None,
		};
		Some(strategy)
	}
}
