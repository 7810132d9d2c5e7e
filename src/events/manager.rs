//! Event service registry keyed by `(peer, block type)`.

use crate::events::dispatch::ListenerSession;
use crate::events::service::EventService;
use crate::gateway::{BlockType, LedgerGateway, Peer};
use crate::network::ReconnectOptions;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

type ServiceKey = (String, BlockType);

/// Hands out event services to listeners.
///
/// Live listeners of the same peer and block type share one service. Listeners that replay
/// history get an isolated service of their own, so a replay never moves the position of the
/// shared live stream.
pub struct EventServiceManager {
	gateway: Arc<dyn LedgerGateway>,
	reconnect: ReconnectOptions,
	start_timeout: Duration,
	shared: Mutex<HashMap<ServiceKey, Arc<EventService>>>,
	next_session: AtomicUsize,
}

impl EventServiceManager {
	/// `start_timeout` bounds every start request sent to a peer's event service.
	pub fn new(
		gateway: Arc<dyn LedgerGateway>,
		reconnect: ReconnectOptions,
		start_timeout: Duration,
	) -> Self {
		Self {
			gateway,
			reconnect,
			start_timeout,
			shared: Mutex::new(HashMap::new()),
			next_session: AtomicUsize::new(1),
		}
	}

	pub(crate) fn next_session_id(&self) -> usize {
		self.next_session.fetch_add(1, Ordering::Relaxed)
	}

	/// Shared live service for `(peer, block_type)`, if one is running.
	pub fn shared_service(&self, peer: &str, block_type: BlockType) -> Option<Arc<EventService>> {
		self.shared
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.get(&(peer.to_string(), block_type))
			.cloned()
	}

	/// Attach `session` to the shared live service for `(peer, block_type)`, creating and
	/// starting it if needed, and wait for its first connection attempt.
	pub(crate) async fn acquire(
		&self,
		peer: &Peer,
		block_type: BlockType,
		session: Arc<ListenerSession>,
	) -> Arc<EventService> {
		let service = {
			let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
			let service = shared
				.entry((peer.name.clone(), block_type))
				.or_insert_with(|| {
					debug!("Creating shared {} event service on {}", block_type, peer.name);
					Arc::new(EventService::new(
						Arc::clone(&self.gateway),
						peer.clone(),
						block_type,
						None,
						true,
						self.reconnect.clone(),
						self.start_timeout,
					))
				})
				.clone();
			service.attach(session);
			service.start();
			service
		};

		service.wait_until_attempted().await;
		service
	}

	/// Attach `session` to a new isolated service starting at `start_block`.
	pub(crate) async fn acquire_replay(
		&self,
		peer: &Peer,
		block_type: BlockType,
		start_block: u64,
		session: Arc<ListenerSession>,
	) -> Arc<EventService> {
		info!(
			"Creating replay {} event service on {} from block {}",
			block_type, peer.name, start_block
		);
		let service = Arc::new(EventService::new(
			Arc::clone(&self.gateway),
			peer.clone(),
			block_type,
			Some(start_block),
			false,
			self.reconnect.clone(),
			self.start_timeout,
		));
		service.attach(session);
		service.start();
		service.wait_until_attempted().await;
		service
	}

	/// Detach a session, stopping the service once nothing is attached to it.
	pub(crate) fn release(&self, service: &Arc<EventService>, session_id: usize) {
		let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
		if service.detach(session_id) > 0 {
			return;
		}

		service.stop();
		if service.is_shared() {
			let key = (service.peer().name.clone(), service.block_type());
			if shared
				.get(&key)
				.is_some_and(|current| Arc::ptr_eq(current, service))
			{
				shared.remove(&key);
			}
		}
	}

	/// Stop every shared service.
	pub fn close(&self) {
		let services: Vec<_> = self
			.shared
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.drain()
			.map(|(_, service)| service)
			.collect();
		for service in services {
			service.stop();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::events::InMemoryCheckpointer;
	use crate::events::listeners::{BlockSessionHandler, block_listener_fn};
	use crate::mock::{MockGateway, peer};

	fn session(manager: &EventServiceManager) -> Arc<ListenerSession> {
		let listener = block_listener_fn(|_event| async { Ok(()) });
		ListenerSession::spawn(
			manager.next_session_id(),
			Box::new(BlockSessionHandler::new(
				listener,
				Some(Arc::new(InMemoryCheckpointer::new())),
			)),
			None,
		)
	}

	#[tokio::test]
	async fn shared_service_lives_until_last_listener_leaves() {
		let gateway = Arc::new(MockGateway::new());
		let manager = EventServiceManager::new(
			gateway.clone(),
			ReconnectOptions::default(),
			Duration::from_secs(1),
		);
		let peer0 = peer("peer0.org1", "Org1MSP");

		let first = session(&manager);
		let second = session(&manager);
		let service = manager.acquire(&peer0, BlockType::Full, first.clone()).await;
		let again = manager
			.acquire(&peer0, BlockType::Full, second.clone())
			.await;

		assert!(Arc::ptr_eq(&service, &again));
		assert_eq!(service.listener_count(), 2);
		assert_eq!(gateway.starts().len(), 1);

		manager.release(&service, first.id());
		assert!(service.is_started());
		assert!(manager.shared_service("peer0.org1", BlockType::Full).is_some());

		manager.release(&service, second.id());
		assert!(!service.is_started());
		assert!(manager.shared_service("peer0.org1", BlockType::Full).is_none());
	}

	#[tokio::test]
	async fn replay_services_are_isolated() {
		let gateway = Arc::new(MockGateway::new());
		let manager = EventServiceManager::new(
			gateway.clone(),
			ReconnectOptions::default(),
			Duration::from_secs(1),
		);
		let peer0 = peer("peer0.org1", "Org1MSP");

		let live = manager
			.acquire(&peer0, BlockType::Full, session(&manager))
			.await;
		let replay = manager
			.acquire_replay(&peer0, BlockType::Full, 5, session(&manager))
			.await;

		assert!(!Arc::ptr_eq(&live, &replay));
		assert!(!replay.is_shared());
		assert_eq!(
			gateway.starts(),
			vec![
				("peer0.org1".to_string(), BlockType::Full, None),
				("peer0.org1".to_string(), BlockType::Full, Some(5)),
			]
		);

		manager.close();
		assert!(!live.is_started());
		assert!(replay.is_started());
		replay.stop();
	}
}
