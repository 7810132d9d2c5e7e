//! Network: the channel-level entry point of the SDK.
//!
//! A `Network` ties together everything needed to transact on one channel:
//! - the channel membership and the application's gateway implementation
//! - the signing identity, whose organization is the "local" organization
//! - the event service manager and the listener registrations built on top of it
//! - the query handler used by evaluated transactions
//!
//! Contracts and transactions are created from a `Network` and share its state. Cloning a
//! `Network` is cheap and every clone refers to the same registrations.

use crate::commit::CommitStrategy;
use crate::events::dispatch::{ListenerSession, SessionHandler};
use crate::events::listeners::{BlockSessionHandler, CommitSessionHandler, ContractSessionHandler};
use crate::events::{
	BlockListener, CommitListener, ContractListener, EventService, EventServiceError,
	EventServiceManager, ListenerOptions,
};
use crate::gateway::{
	BlockType, CommitRequest, CommitResponse, Identity, LedgerGateway, Peer, with_timeout,
};
use crate::network::{Channel, Contract, GatewayOptions};
use crate::transaction::{QueryHandler, TransactionError};

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Identity of a registered listener: its kind and `Arc` allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ListenerKey {
	Block(usize),
	Contract(String, usize),
	Commit(usize),
}

fn allocation<T: ?Sized>(listener: &Arc<T>) -> usize {
	Arc::as_ptr(listener) as *const () as usize
}

/// A listener session attached to an event service.
struct Attachment {
	service: Arc<EventService>,
	session: Arc<ListenerSession>,
}

struct NetworkInner {
	channel: Channel,
	gateway: Arc<dyn LedgerGateway>,
	identity: Identity,
	options: GatewayOptions,
	event_services: EventServiceManager,
	query_handler: QueryHandler,
	registrations: Mutex<HashMap<ListenerKey, Vec<Attachment>>>,
}

impl Drop for NetworkInner {
	fn drop(&mut self) {
		let registrations = self
			.registrations
			.get_mut()
			.unwrap_or_else(PoisonError::into_inner);
		for (_, attachments) in registrations.drain() {
			for attachment in attachments {
				attachment.session.close();
				attachment.service.stop();
			}
		}
		self.event_services.close();
	}
}

/// Handle to one channel of the ledger network.
///
/// Event services stop when the last clone is dropped or when `close` is called. A listener that
/// holds a clone of its own `Network` keeps it alive until the listener is removed.
#[derive(Clone)]
pub struct Network {
	inner: Arc<NetworkInner>,
}

impl Network {
	pub fn new(
		channel: Channel,
		gateway: Arc<dyn LedgerGateway>,
		identity: Identity,
		options: GatewayOptions,
	) -> Self {
		info!(
			"Connecting to channel {} as {} ({} peers, {} orderers)",
			channel.name(),
			identity.msp_id,
			channel.peers().len(),
			channel.orderers().len()
		);
		let event_services = EventServiceManager::new(
			Arc::clone(&gateway),
			options.reconnect.clone(),
			options.proposal_timeout,
		);
		let query_handler = QueryHandler::new(options.query_strategy);

		Self {
			inner: Arc::new(NetworkInner {
				channel,
				gateway,
				identity,
				options,
				event_services,
				query_handler,
				registrations: Mutex::new(HashMap::new()),
			}),
		}
	}

	pub fn channel(&self) -> &Channel {
		&self.inner.channel
	}

	pub fn identity(&self) -> &Identity {
		&self.inner.identity
	}

	pub fn options(&self) -> &GatewayOptions {
		&self.inner.options
	}

	pub fn gateway(&self) -> &Arc<dyn LedgerGateway> {
		&self.inner.gateway
	}

	pub fn event_services(&self) -> &EventServiceManager {
		&self.inner.event_services
	}

	pub(crate) fn query_handler(&self) -> &QueryHandler {
		&self.inner.query_handler
	}

	/// Contract deployed on this channel under `chaincode_id`.
	pub fn contract(&self, chaincode_id: impl Into<String>) -> Contract {
		Contract::new(self.clone(), chaincode_id)
	}

	/// Commit strategy configured in the options, scoped to the local organization or channel.
	pub fn default_commit_strategy(&self) -> Option<Box<dyn CommitStrategy>> {
		self.inner
			.options
			.commit_strategy
			.build(&self.inner.channel, &self.inner.identity.msp_id)
	}

	/// Query peers of the local organization, or of the whole channel if it has none.
	pub fn query_peers(&self) -> Vec<Peer> {
		let local = self
			.inner
			.channel
			.query_peers(Some(&self.inner.identity.msp_id));
		if local.is_empty() {
			self.inner.channel.query_peers(None)
		} else {
			local
		}
	}

	/// Event source peer for block and contract listeners, preferring the local organization.
	fn event_peer(&self) -> Result<Peer, EventServiceError> {
		let channel = &self.inner.channel;
		channel
			.event_peers(Some(&self.inner.identity.msp_id))
			.into_iter()
			.next()
			.or_else(|| channel.event_peers(None).into_iter().next())
			.ok_or_else(|| EventServiceError::NoEventPeers {
				channel: channel.name().to_string(),
			})
	}

	/// Send an endorsed transaction for ordering.
	///
	/// Uses the discovery handler when discovery is enabled and the channel has one, otherwise
	/// tries the channel's orderers in turn until one answers. The first answer is returned as
	/// is, whatever its status.
	pub(crate) async fn send_commit(
		&self,
		request: &CommitRequest,
	) -> Result<CommitResponse, TransactionError> {
		let timeout = self.inner.options.proposal_timeout;

		if self.inner.options.discovery_enabled {
			if let Some(handler) = self.inner.channel.discovery() {
				debug!(
					"Sending transaction {} through discovery handler",
					request.transaction_id
				);
				let response =
					with_timeout("discovery", timeout, handler.commit(request, timeout)).await?;
				return Ok(response);
			}
		}

		let orderers = self.inner.channel.orderers();
		let mut last_error = None;
		for orderer in orderers {
			debug!(
				"Sending transaction {} to orderer {}",
				request.transaction_id, orderer.name
			);
			match with_timeout(
				&orderer.name,
				timeout,
				self.inner.gateway.send_commit(orderer, request, timeout),
			)
			.await
			{
				Ok(response) => return Ok(response),
				Err(e) => {
					warn!("Orderer {} unavailable: {}", orderer.name, e);
					last_error = Some(e);
				}
			}
		}

		match last_error {
			Some(e) => Err(e.into()),
			None => Err(TransactionError::NoOrderers(request.transaction_id.clone())),
		}
	}

	/// Claim `key`. Returns `false` if the listener is already registered.
	fn reserve(&self, key: &ListenerKey) -> bool {
		let mut registrations = self
			.inner
			.registrations
			.lock()
			.unwrap_or_else(PoisonError::into_inner);
		if registrations.contains_key(key) {
			return false;
		}
		registrations.insert(key.clone(), Vec::new());
		true
	}

	/// Store attachments for a reserved key. If the listener was removed meanwhile, release them.
	fn complete(&self, key: &ListenerKey, attachments: Vec<Attachment>) {
		let orphaned = {
			let mut registrations = self
				.inner
				.registrations
				.lock()
				.unwrap_or_else(PoisonError::into_inner);
			match registrations.get_mut(key) {
				Some(slot) => {
					slot.extend(attachments);
					Vec::new()
				}
				None => attachments,
			}
		};
		for attachment in orphaned {
			self.release(attachment);
		}
	}

	fn unregister(&self, key: &ListenerKey) -> bool {
		let attachments = self
			.inner
			.registrations
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.remove(key);
		match attachments {
			Some(attachments) => {
				for attachment in attachments {
					self.release(attachment);
				}
				true
			}
			None => false,
		}
	}

	fn release(&self, attachment: Attachment) {
		attachment.session.close();
		self.inner
			.event_services
			.release(&attachment.service, attachment.session.id());
	}

	/// Attach a block or contract session, replaying from the checkpoint or start block if set.
	async fn attach_replayable(
		&self,
		handler: Box<dyn SessionHandler>,
		block_type: BlockType,
		start: Option<u64>,
	) -> Result<Attachment, EventServiceError> {
		let peer = self.event_peer()?;
		let session =
			ListenerSession::spawn(self.inner.event_services.next_session_id(), handler, start);

		let service = match start {
			Some(start_block) => {
				self.inner
					.event_services
					.acquire_replay(&peer, block_type, start_block, Arc::clone(&session))
					.await
			}
			None => {
				self.inner
					.event_services
					.acquire(&peer, block_type, Arc::clone(&session))
					.await
			}
		};
		Ok(Attachment { service, session })
	}

	async fn start_position(options: &ListenerOptions) -> Result<Option<u64>, EventServiceError> {
		let checkpoint = match &options.checkpointer {
			Some(checkpointer) => checkpointer.block_number().await?,
			None => None,
		};
		Ok(checkpoint.or(options.start_block))
	}

	async fn attach_block(
		&self,
		listener: &Arc<dyn BlockListener>,
		options: ListenerOptions,
	) -> Result<Attachment, EventServiceError> {
		let start = Self::start_position(&options).await?;
		let handler = BlockSessionHandler::new(Arc::clone(listener), options.checkpointer);
		self.attach_replayable(Box::new(handler), options.block_type, start)
			.await
	}

	async fn attach_contract(
		&self,
		chaincode_id: &str,
		listener: &Arc<dyn ContractListener>,
		options: ListenerOptions,
	) -> Result<Attachment, EventServiceError> {
		let start = Self::start_position(&options).await?;
		let handler = ContractSessionHandler::new(
			Arc::clone(listener),
			chaincode_id,
			options.event_name,
			options.block_type,
			options.checkpointer,
		);
		self.attach_replayable(Box::new(handler), options.block_type, start)
			.await
	}

	/// Register a block listener. Registering the same listener again has no effect.
	pub async fn add_block_listener(
		&self,
		listener: Arc<dyn BlockListener>,
		options: ListenerOptions,
	) -> Result<Arc<dyn BlockListener>, EventServiceError> {
		let key = ListenerKey::Block(allocation(&listener));
		if !self.reserve(&key) {
			debug!("Block listener already registered");
			return Ok(listener);
		}

		match self.attach_block(&listener, options).await {
			Ok(attachment) => {
				self.complete(&key, vec![attachment]);
				Ok(listener)
			}
			Err(e) => {
				self.unregister(&key);
				Err(e)
			}
		}
	}

	/// Remove a block listener. Safe to call more than once and from inside the listener.
	pub fn remove_block_listener(&self, listener: &Arc<dyn BlockListener>) {
		if self.unregister(&ListenerKey::Block(allocation(listener))) {
			debug!("Removed block listener");
		}
	}

	pub(crate) async fn add_contract_listener(
		&self,
		chaincode_id: &str,
		listener: Arc<dyn ContractListener>,
		options: ListenerOptions,
	) -> Result<Arc<dyn ContractListener>, EventServiceError> {
		let key = ListenerKey::Contract(chaincode_id.to_string(), allocation(&listener));
		if !self.reserve(&key) {
			debug!("Contract listener for {} already registered", chaincode_id);
			return Ok(listener);
		}

		match self.attach_contract(chaincode_id, &listener, options).await {
			Ok(attachment) => {
				self.complete(&key, vec![attachment]);
				Ok(listener)
			}
			Err(e) => {
				self.unregister(&key);
				Err(e)
			}
		}
	}

	pub(crate) fn remove_contract_listener(
		&self,
		chaincode_id: &str,
		listener: &Arc<dyn ContractListener>,
	) {
		if self.unregister(&ListenerKey::Contract(
			chaincode_id.to_string(),
			allocation(listener),
		)) {
			debug!("Removed contract listener for {}", chaincode_id);
		}
	}

	/// Listen for the commit of `transaction_id` on each of `peers`.
	///
	/// Uses the shared filtered event service of every peer and returns once each of them has
	/// attempted to connect. Start attempts run concurrently and are bounded by the proposal
	/// timeout. Connection failures reach the listener as `Err` outcomes.
	pub async fn add_commit_listener(
		&self,
		listener: Arc<dyn CommitListener>,
		peers: &[Peer],
		transaction_id: &str,
	) -> Result<Arc<dyn CommitListener>, EventServiceError> {
		let key = ListenerKey::Commit(allocation(&listener));
		if !self.reserve(&key) {
			debug!("Commit listener for {} already registered", transaction_id);
			return Ok(listener);
		}

		let acquisitions = peers.iter().map(|peer| {
			let handler =
				CommitSessionHandler::new(Arc::clone(&listener), &peer.name, transaction_id);
			let session = ListenerSession::spawn(
				self.inner.event_services.next_session_id(),
				Box::new(handler),
				None,
			);
			async move {
				let service = self
					.inner
					.event_services
					.acquire(peer, BlockType::Filtered, Arc::clone(&session))
					.await;
				Attachment { service, session }
			}
		});
		let attachments = join_all(acquisitions).await;

		self.complete(&key, attachments);
		Ok(listener)
	}

	pub fn remove_commit_listener(&self, listener: &Arc<dyn CommitListener>) {
		if self.unregister(&ListenerKey::Commit(allocation(listener))) {
			debug!("Removed commit listener");
		}
	}

	/// Number of registered listeners of every kind.
	pub fn listener_count(&self) -> usize {
		self.inner
			.registrations
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.len()
	}

	/// Remove every listener and stop all event services.
	pub fn close(&self) {
		let registrations: Vec<Attachment> = self
			.inner
			.registrations
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.drain()
			.flat_map(|(_, attachments)| attachments)
			.collect();
		info!(
			"Closing channel {} ({} listener sessions)",
			self.inner.channel.name(),
			registrations.len()
		);
		for attachment in registrations {
			self.release(attachment);
		}
		self.inner.event_services.close();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::events::{
		BlockEvent, Checkpointer, ContractEvent, InMemoryCheckpointer, block_listener_fn,
		contract_listener_fn,
	};
	use crate::gateway::{PeerRoles, ValidationCode};
	use crate::mock::{MockGateway, block, chaincode_event, orderer, peer, tx, wait_for};
	use std::time::Duration;

	fn network(gateway: &Arc<MockGateway>) -> Network {
		let channel = Channel::new("mychannel")
			.with_peer(peer("peer0.org2", "Org2MSP"))
			.with_peer(peer("peer0.org1", "Org1MSP"))
			.with_orderer(orderer("orderer0"));
		Network::new(
			channel,
			gateway.clone(),
			Identity::new("Org1MSP", b"user1".to_vec()),
			GatewayOptions::new(),
		)
	}

	fn recording_block_listener() -> (Arc<dyn BlockListener>, Arc<Mutex<Vec<u64>>>) {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let recorded = Arc::clone(&seen);
		let listener = block_listener_fn(move |event: BlockEvent| {
			let recorded = Arc::clone(&recorded);
			async move {
				recorded.lock().unwrap().push(event.block_number);
				Ok(())
			}
		});
		(listener, seen)
	}

	#[tokio::test]
	async fn block_listener_uses_local_event_peer() {
		let gateway = Arc::new(MockGateway::new());
		let network = network(&gateway);
		let (listener, seen) = recording_block_listener();

		network
			.add_block_listener(listener.clone(), ListenerOptions::new())
			.await
			.unwrap();
		gateway.emit("peer0.org1", BlockType::Full, block(7, Vec::new()));
		wait_for(|| seen.lock().unwrap().len() == 1).await;

		assert_eq!(
			gateway.starts(),
			vec![("peer0.org1".to_string(), BlockType::Full, None)]
		);
		network.remove_block_listener(&listener);
		assert_eq!(network.listener_count(), 0);
		wait_for(|| gateway.open_streams("peer0.org1", BlockType::Full) == 0).await;
	}

	#[tokio::test]
	async fn registering_twice_is_a_no_op() {
		let gateway = Arc::new(MockGateway::new());
		let network = network(&gateway);
		let (listener, _seen) = recording_block_listener();

		network
			.add_block_listener(listener.clone(), ListenerOptions::new())
			.await
			.unwrap();
		network
			.add_block_listener(listener.clone(), ListenerOptions::new())
			.await
			.unwrap();

		assert_eq!(network.listener_count(), 1);
		assert_eq!(gateway.starts().len(), 1);
		network.close();
	}

	#[tokio::test]
	async fn checkpointed_listener_resumes_at_checkpoint() {
		let gateway = Arc::new(MockGateway::new());
		let network = network(&gateway);
		let (listener, seen) = recording_block_listener();
		let checkpointer = Arc::new(InMemoryCheckpointer::starting_at(42));

		network
			.add_block_listener(
				listener.clone(),
				ListenerOptions::new()
					.with_start_block(10)
					.with_checkpointer(checkpointer.clone()),
			)
			.await
			.unwrap();

		assert_eq!(
			gateway.starts(),
			vec![("peer0.org1".to_string(), BlockType::Full, Some(42))]
		);
		gateway.emit("peer0.org1", BlockType::Full, block(41, Vec::new()));
		gateway.emit("peer0.org1", BlockType::Full, block(42, Vec::new()));
		wait_for(|| seen.lock().unwrap().len() == 1).await;
		assert_eq!(*seen.lock().unwrap(), vec![42]);

		let mut next = None;
		for _ in 0..100 {
			next = checkpointer.block_number().await.unwrap();
			if next == Some(43) {
				break;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		assert_eq!(next, Some(43));
		network.close();
	}

	#[tokio::test]
	async fn listener_can_remove_itself_while_handling_a_block() {
		let gateway = Arc::new(MockGateway::new());
		let network = network(&gateway);
		let seen = Arc::new(Mutex::new(Vec::new()));
		let this: Arc<Mutex<Option<Arc<dyn BlockListener>>>> = Arc::new(Mutex::new(None));

		let listener = block_listener_fn({
			let network = network.clone();
			let seen = Arc::clone(&seen);
			let this = Arc::clone(&this);
			move |event: BlockEvent| {
				let network = network.clone();
				let seen = Arc::clone(&seen);
				let this = Arc::clone(&this);
				async move {
					seen.lock().unwrap().push(event.block_number);
					let me = this.lock().unwrap().take();
					if let Some(me) = me {
						network.remove_block_listener(&me);
					}
					Ok(())
				}
			}
		});
		*this.lock().unwrap() = Some(listener.clone());

		network
			.add_block_listener(listener, ListenerOptions::new())
			.await
			.unwrap();
		gateway.emit("peer0.org1", BlockType::Full, block(1, Vec::new()));
		gateway.emit("peer0.org1", BlockType::Full, block(2, Vec::new()));

		wait_for(|| network.listener_count() == 0).await;
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(*seen.lock().unwrap(), vec![1]);
	}

	#[tokio::test]
	async fn contract_listener_receives_matching_events() {
		let gateway = Arc::new(MockGateway::new());
		let network = network(&gateway);
		let contract = network.contract("basic");
		let events = Arc::new(Mutex::new(Vec::new()));
		let recorded = Arc::clone(&events);
		let listener = contract_listener_fn(move |event: ContractEvent| {
			let recorded = Arc::clone(&recorded);
			async move {
				recorded.lock().unwrap().push(event.event_name);
				Ok(())
			}
		});

		contract
			.add_contract_listener(listener.clone(), ListenerOptions::new())
			.await
			.unwrap();
		gateway.emit(
			"peer0.org1",
			BlockType::Full,
			block(
				3,
				vec![
					tx(
						"tx1",
						ValidationCode::Valid,
						vec![chaincode_event("basic", "Created", b"{}")],
					),
					tx(
						"tx2",
						ValidationCode::Valid,
						vec![chaincode_event("other", "Created", b"{}")],
					),
					tx(
						"tx3",
						ValidationCode::Valid,
						vec![chaincode_event("basic", "Transferred", b"{}")],
					),
				],
			),
		);

		wait_for(|| events.lock().unwrap().len() == 2).await;
		assert_eq!(*events.lock().unwrap(), vec!["Created", "Transferred"]);
		contract.remove_contract_listener(&listener);
		contract.remove_contract_listener(&listener);
		assert_eq!(network.listener_count(), 0);
	}

	#[tokio::test]
	async fn listener_without_event_peers_is_rejected() {
		let gateway = Arc::new(MockGateway::new());
		let channel = Channel::new("mychannel").with_peer(peer("peer0.org1", "Org1MSP").with_roles(
			PeerRoles {
				event_source: false,
				..Default::default()
			},
		));
		let network = Network::new(
			channel,
			gateway.clone(),
			Identity::new("Org1MSP", b"user1".to_vec()),
			GatewayOptions::new(),
		);
		let (listener, _seen) = recording_block_listener();

		let result = network
			.add_block_listener(listener, ListenerOptions::new())
			.await;

		assert!(matches!(result, Err(EventServiceError::NoEventPeers { .. })));
		assert_eq!(network.listener_count(), 0);
		assert!(gateway.starts().is_empty());
	}

	#[tokio::test]
	async fn contract_listener_removed_mid_block_gets_no_further_events() {
		let gateway = Arc::new(MockGateway::new());
		let network = network(&gateway);
		let contract = network.contract("basic");
		let calls = Arc::new(Mutex::new(Vec::new()));
		let this: Arc<Mutex<Option<Arc<dyn ContractListener>>>> = Arc::new(Mutex::new(None));

		let listener = contract_listener_fn({
			let contract = contract.clone();
			let calls = Arc::clone(&calls);
			let this = Arc::clone(&this);
			move |event: ContractEvent| {
				let contract = contract.clone();
				let calls = Arc::clone(&calls);
				let this = Arc::clone(&this);
				async move {
					calls.lock().unwrap().push(event.transaction_id);
					let me = this.lock().unwrap().take();
					if let Some(me) = me {
						contract.remove_contract_listener(&me);
					}
					Ok(())
				}
			}
		});
		*this.lock().unwrap() = Some(listener.clone());

		contract
			.add_contract_listener(listener, ListenerOptions::new())
			.await
			.unwrap();
		gateway.emit(
			"peer0.org1",
			BlockType::Full,
			block(
				5,
				vec![
					tx(
						"tx1",
						ValidationCode::Valid,
						vec![chaincode_event("basic", "Created", b"1")],
					),
					tx(
						"tx2",
						ValidationCode::Valid,
						vec![chaincode_event("basic", "Created", b"2")],
					),
				],
			),
		);
		gateway.emit(
			"peer0.org1",
			BlockType::Full,
			block(
				6,
				vec![tx(
					"tx3",
					ValidationCode::Valid,
					vec![chaincode_event("basic", "Created", b"3")],
				)],
			),
		);

		wait_for(|| network.listener_count() == 0).await;
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(*calls.lock().unwrap(), vec!["tx1"]);
	}

	#[tokio::test]
	async fn dropping_the_network_stops_its_event_services() {
		let gateway = Arc::new(MockGateway::new());
		let network = network(&gateway);
		let (listener, _seen) = recording_block_listener();
		network
			.add_block_listener(listener, ListenerOptions::new())
			.await
			.unwrap();
		network
			.add_block_listener(
				recording_block_listener().0,
				ListenerOptions::new().with_start_block(3),
			)
			.await
			.unwrap();
		assert_eq!(gateway.open_streams("peer0.org1", BlockType::Full), 2);

		drop(network);
		wait_for(|| gateway.open_streams("peer0.org1", BlockType::Full) == 0).await;
	}
}
