//! Scriptable gateway and fixtures for unit tests.

use crate::gateway::{
	BlockType, ChaincodeEvent, CommitRequest, CommitResponse, EventInfo, EventServiceRequest,
	EventStream, GatewayError, LedgerGateway, Orderer, Peer, Proposal, ProposalResponse,
	TransactionInfo, ValidationCode,
};
use crate::transaction::TransactionId;

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

type StreamSender = mpsc::UnboundedSender<Result<EventInfo, GatewayError>>;

#[derive(Default)]
struct MockState {
	proposals: HashMap<String, Result<ProposalResponse, GatewayError>>,
	proposal_targets: Vec<String>,
	commits: HashMap<String, Result<CommitResponse, GatewayError>>,
	commit_targets: Vec<String>,
	auto_commit: Option<ValidationCode>,
	next_block: u64,
	starts: Vec<(String, BlockType, Option<u64>)>,
	failing_starts: HashMap<String, usize>,
	stalled_starts: HashSet<String>,
	streams: HashMap<(String, BlockType), Vec<StreamSender>>,
}

/// In-memory `LedgerGateway`.
///
/// Proposals to unscripted peers fail with a connection error, commits succeed unless scripted
/// otherwise. Every event-service start opens a stream fed by `emit` and `fail_stream`.
#[derive(Default)]
pub(crate) struct MockGateway {
	state: Mutex<MockState>,
}

impl MockGateway {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
		self.state.lock().unwrap()
	}

	pub(crate) fn respond(&self, peer: &str, status: i32, payload: &[u8]) {
		self.respond_with(
			peer,
			ProposalResponse {
				status: Some(status),
				message: format!("status {}", status),
				payload: payload.to_vec(),
				endorsement: peer.as_bytes().to_vec(),
			},
		);
	}

	pub(crate) fn respond_with(&self, peer: &str, response: ProposalResponse) {
		self.state().proposals.insert(peer.to_string(), Ok(response));
	}

	pub(crate) fn fail_proposals(&self, peer: &str, message: &str) {
		self.state()
			.proposals
			.insert(peer.to_string(), Err(GatewayError::connection(peer, message)));
	}

	pub(crate) fn proposal_targets(&self) -> Vec<String> {
		self.state().proposal_targets.clone()
	}

	pub(crate) fn commit_with(&self, orderer: &str, result: Result<CommitResponse, GatewayError>) {
		self.state().commits.insert(orderer.to_string(), result);
	}

	pub(crate) fn commit_targets(&self) -> Vec<String> {
		self.state().commit_targets.clone()
	}

	/// After each successful commit, emit a block containing the transaction with `code` on
	/// every open filtered stream.
	pub(crate) fn auto_commit(&self, code: ValidationCode) {
		let mut state = self.state();
		state.auto_commit = Some(code);
		state.next_block = 100;
	}

	pub(crate) fn starts(&self) -> Vec<(String, BlockType, Option<u64>)> {
		self.state().starts.clone()
	}

	pub(crate) fn fail_next_starts(&self, peer: &str, count: usize) {
		self.state().failing_starts.insert(peer.to_string(), count);
	}

	/// Start requests to `peer` never complete.
	pub(crate) fn stall_starts(&self, peer: &str) {
		self.state().stalled_starts.insert(peer.to_string());
	}

	pub(crate) fn open_streams(&self, peer: &str, block_type: BlockType) -> usize {
		self.state()
			.streams
			.get(&(peer.to_string(), block_type))
			.map_or(0, |senders| senders.iter().filter(|s| !s.is_closed()).count())
	}

	/// Deliver `info` on every open stream of `(peer, block_type)`.
	pub(crate) fn emit(&self, peer: &str, block_type: BlockType, info: EventInfo) {
		let mut state = self.state();
		Self::emit_locked(&mut state, peer, block_type, info);
	}

	fn emit_locked(state: &mut MockState, peer: &str, block_type: BlockType, info: EventInfo) {
		if let Some(senders) = state.streams.get_mut(&(peer.to_string(), block_type)) {
			senders.retain(|sender| !sender.is_closed());
			for sender in senders.iter() {
				let _ = sender.send(Ok(info.clone()));
			}
		}
	}

	/// Fail and close every open stream of `(peer, block_type)`.
	pub(crate) fn fail_stream(&self, peer: &str, block_type: BlockType, message: &str) {
		let senders = self
			.state()
			.streams
			.remove(&(peer.to_string(), block_type))
			.unwrap_or_default();
		for sender in senders {
			let _ = sender.send(Err(GatewayError::Stream {
				peer: peer.to_string(),
				message: message.to_string(),
			}));
		}
	}
}

#[async_trait]
impl LedgerGateway for MockGateway {
	async fn send_proposal(
		&self,
		peer: &Peer,
		_proposal: &Proposal,
		_timeout: Duration,
	) -> Result<ProposalResponse, GatewayError> {
		let mut state = self.state();
		state.proposal_targets.push(peer.name.clone());
		state
			.proposals
			.get(&peer.name)
			.cloned()
			.unwrap_or_else(|| Err(GatewayError::connection(&peer.name, "no response scripted")))
	}

	async fn send_commit(
		&self,
		orderer: &Orderer,
		request: &CommitRequest,
		_timeout: Duration,
	) -> Result<CommitResponse, GatewayError> {
		let mut state = self.state();
		state.commit_targets.push(orderer.name.clone());
		let result = state
			.commits
			.get(&orderer.name)
			.cloned()
			.unwrap_or_else(|| Ok(CommitResponse::success()));

		let committed = matches!(&result, Ok(response) if response.is_success());
		if let (true, Some(code)) = (committed, state.auto_commit.clone()) {
			let number = state.next_block;
			state.next_block += 1;
			let info = EventInfo {
				block_type: BlockType::Filtered,
				..block(
					number,
					vec![tx(request.transaction_id.as_str(), code, Vec::new())],
				)
			};
			let peers: Vec<String> = state
				.streams
				.keys()
				.filter(|(_, block_type)| *block_type == BlockType::Filtered)
				.map(|(peer, _)| peer.clone())
				.collect();
			for peer in peers {
				Self::emit_locked(&mut state, &peer, BlockType::Filtered, info.clone());
			}
		}
		result
	}

	async fn start_event_service(
		&self,
		peer: &Peer,
		request: &EventServiceRequest,
	) -> Result<EventStream, GatewayError> {
		let stalled = {
			let mut state = self.state();
			state
				.starts
				.push((peer.name.clone(), request.block_type, request.start_block));
			state.stalled_starts.contains(&peer.name)
		};
		if stalled {
			std::future::pending::<()>().await;
		}

		let mut state = self.state();
		if let Some(remaining) = state.failing_starts.get_mut(&peer.name) {
			if *remaining > 0 {
				*remaining -= 1;
				return Err(GatewayError::connection(&peer.name, "event service unavailable"));
			}
		}

		let (sender, receiver) = mpsc::unbounded_channel();
		state
			.streams
			.entry((peer.name.clone(), request.block_type))
			.or_default()
			.push(sender);

		let stream = futures::stream::unfold(receiver, |mut receiver| async move {
			receiver.recv().await.map(|item| (item, receiver))
		});
		Ok(Box::pin(stream))
	}
}

pub(crate) fn peer(name: &str, msp_id: &str) -> Peer {
	Peer::new(name, msp_id, format!("grpcs://{}:7051", name))
}

pub(crate) fn orderer(name: &str) -> Orderer {
	Orderer::new(name, format!("grpcs://{}:7050", name))
}

pub(crate) fn block(number: u64, transactions: Vec<TransactionInfo>) -> EventInfo {
	EventInfo {
		block_number: number,
		block_type: BlockType::Full,
		transactions,
		raw_block: None,
	}
}

pub(crate) fn tx(id: &str, code: ValidationCode, events: Vec<ChaincodeEvent>) -> TransactionInfo {
	TransactionInfo {
		transaction_id: id.to_string(),
		validation_code: code,
		chaincode_events: events,
		private_data: None,
	}
}

pub(crate) fn chaincode_event(chaincode_id: &str, name: &str, payload: &[u8]) -> ChaincodeEvent {
	ChaincodeEvent {
		chaincode_id: chaincode_id.to_string(),
		event_name: name.to_string(),
		payload: Some(payload.to_vec()),
	}
}

pub(crate) fn proposal(function: &str) -> Proposal {
	let (transaction_id, nonce) = TransactionId::generate(b"creator");
	Proposal {
		transaction_id,
		channel: "mychannel".to_string(),
		chaincode_id: "basic".to_string(),
		function: function.to_string(),
		args: Vec::new(),
		transient: HashMap::new(),
		nonce,
		creator: b"creator".to_vec(),
	}
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub(crate) async fn wait_for(mut condition: impl FnMut() -> bool) {
	let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
	while !condition() {
		assert!(
			tokio::time::Instant::now() < deadline,
			"condition not met within 5s"
		);
		tokio::time::sleep(Duration::from_millis(2)).await;
	}
}
