//! A single event-service subscription and its reconnect loop.

use crate::events::PeerEventError;
use crate::events::dispatch::{ListenerRegistry, ListenerSession};
use crate::gateway::{BlockType, EventServiceRequest, LedgerGateway, Peer, with_timeout};
use crate::network::ReconnectOptions;

use backoff::backoff::Backoff;
use futures_util::StreamExt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Connection state of an event service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
	Idle,
	Connecting,
	Connected,
	/// The last start attempt failed; a retry is scheduled.
	Failed,
	Stopped,
}

#[derive(Debug, Default)]
struct ServiceState {
	last_block: Option<u64>,
	task: Option<JoinHandle<()>>,
}

/// One subscription to a peer's event service, fanned out to the attached listener sessions.
///
/// The service keeps reconnecting until it is stopped. A reconnect resumes after the last block
/// it delivered; before any block was delivered it repeats its original start request.
pub struct EventService {
	peer: Peer,
	block_type: BlockType,
	shared: bool,
	initial_start: Option<u64>,
	gateway: Arc<dyn LedgerGateway>,
	reconnect: ReconnectOptions,
	start_timeout: Duration,
	registry: ListenerRegistry,
	state: Mutex<ServiceState>,
	status: watch::Sender<ConnectionStatus>,
}

impl EventService {
	pub(crate) fn new(
		gateway: Arc<dyn LedgerGateway>,
		peer: Peer,
		block_type: BlockType,
		start_block: Option<u64>,
		shared: bool,
		reconnect: ReconnectOptions,
		start_timeout: Duration,
	) -> Self {
		let (status, _) = watch::channel(ConnectionStatus::Idle);
		Self {
			peer,
			block_type,
			shared,
			initial_start: start_block,
			gateway,
			reconnect,
			start_timeout,
			registry: ListenerRegistry::new(),
			state: Mutex::new(ServiceState::default()),
			status,
		}
	}

	pub fn peer(&self) -> &Peer {
		&self.peer
	}

	pub fn block_type(&self) -> BlockType {
		self.block_type
	}

	/// `false` for isolated replay services.
	pub fn is_shared(&self) -> bool {
		self.shared
	}

	/// Highest block number delivered so far.
	pub fn last_block_number(&self) -> Option<u64> {
		self.state
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.last_block
	}

	pub fn is_started(&self) -> bool {
		self.state
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.task
			.is_some()
	}

	pub fn status(&self) -> ConnectionStatus {
		*self.status.borrow()
	}

	pub fn listener_count(&self) -> usize {
		self.registry.len()
	}

	pub(crate) fn attach(&self, session: Arc<ListenerSession>) -> bool {
		self.registry.attach(session)
	}

	/// Detach a session and return how many are left.
	pub(crate) fn detach(&self, session_id: usize) -> usize {
		self.registry.detach(session_id)
	}

	/// Start the subscription task unless it is already running.
	pub(crate) fn start(self: &Arc<Self>) {
		let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
		if state.task.is_some() {
			return;
		}
		self.status.send_replace(ConnectionStatus::Connecting);
		let service = Arc::clone(self);
		state.task = Some(tokio::spawn(async move { service.run().await }));
	}

	/// Wait until the current connection attempt has either succeeded or failed.
	pub(crate) async fn wait_until_attempted(&self) {
		let mut status = self.status.subscribe();
		let _ = status
			.wait_for(|status| {
				!matches!(status, ConnectionStatus::Idle | ConnectionStatus::Connecting)
			})
			.await;
	}

	/// Stop the subscription. Attached sessions receive nothing further.
	pub(crate) fn stop(&self) {
		let task = self
			.state
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.task
			.take();
		if let Some(task) = task {
			info!(
				"Stopping {} event service on {}",
				self.block_type, self.peer.name
			);
			task.abort();
		}
		self.status.send_replace(ConnectionStatus::Stopped);
	}

	/// Where the next start request begins.
	fn resume_position(&self) -> Option<u64> {
		match self.last_block_number() {
			Some(last) => Some(last + 1),
			None => self.initial_start,
		}
	}

	fn record_block(&self, block_number: u64) {
		let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
		let last = state
			.last_block
			.map_or(block_number, |last| last.max(block_number));
		state.last_block = Some(last);
	}

	fn report_error(&self, message: String) {
		self.registry
			.broadcast_error(PeerEventError::new(&self.peer.name, message));
	}

	async fn run(self: Arc<Self>) {
		let mut backoff = self.reconnect.backoff();

		loop {
			let request = EventServiceRequest {
				block_type: self.block_type,
				start_block: self.resume_position(),
			};
			info!(
				"Starting {} event service on {} from block {:?}",
				self.block_type, self.peer.name, request.start_block
			);
			self.status.send_replace(ConnectionStatus::Connecting);

			let started = with_timeout(
				&self.peer.name,
				self.start_timeout,
				self.gateway.start_event_service(&self.peer, &request),
			)
			.await;
			match started {
				Ok(mut stream) => {
					self.status.send_replace(ConnectionStatus::Connected);
					while let Some(item) = stream.next().await {
						match item {
							Ok(info) => {
								debug!(
									"Block {} from {} event service on {}",
									info.block_number, self.block_type, self.peer.name
								);
								self.record_block(info.block_number);
								backoff.reset();
								self.registry.dispatch(&self.peer.name, Arc::new(info));
							}
							Err(e) => {
								warn!("Event stream from {} failed: {}", self.peer.name, e);
								self.report_error(e.to_string());
								break;
							}
						}
					}
					debug!("Event stream from {} ended", self.peer.name);
				}
				Err(e) => {
					warn!(
						"Failed to start event service on {}: {}",
						self.peer.name, e
					);
					self.status.send_replace(ConnectionStatus::Failed);
					self.report_error(e.to_string());
				}
			}

			let delay = backoff
				.next_backoff()
				.unwrap_or(self.reconnect.max_interval);
			debug!(
				"Reconnecting to {} event service in {:?}",
				self.peer.name, delay
			);
			tokio::time::sleep(delay).await;
		}
	}
}
