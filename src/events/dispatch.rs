//! Listener sessions and the per-service listener registry.
//!
//! An event service hands every delivery to the registry, which schedules it onto each attached
//! session before the service reads the next delivery. Each session owns a worker task that
//! processes its queue strictly in order, so one slow or failing listener never holds up its
//! siblings. The registry is copy-on-write: dispatch iterates a snapshot, and attaching or
//! detaching a session never waits for a delivery in progress.

use crate::events::PeerEventError;
use crate::gateway::EventInfo;

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// One item scheduled onto a listener session.
#[derive(Debug, Clone)]
pub(crate) enum Delivery {
	Event { peer: String, info: Arc<EventInfo> },
	Error(PeerEventError),
}

/// Turns deliveries into listener callbacks.
#[async_trait]
pub(crate) trait SessionHandler: Send + 'static {
	/// Process one block. Implementations check `removed` before every callback.
	async fn handle_event(&mut self, peer: &str, info: &EventInfo, removed: &AtomicBool);

	async fn handle_error(&mut self, error: &PeerEventError);
}

/// A registered listener's queue and worker task.
#[derive(Debug)]
pub(crate) struct ListenerSession {
	id: usize,
	sender: mpsc::UnboundedSender<Delivery>,
	removed: Arc<AtomicBool>,
}

impl ListenerSession {
	/// Spawn the worker for `handler`. Blocks numbered below `floor` are never delivered.
	pub(crate) fn spawn(
		id: usize,
		handler: Box<dyn SessionHandler>,
		floor: Option<u64>,
	) -> Arc<Self> {
		let (sender, receiver) = mpsc::unbounded_channel();
		let removed = Arc::new(AtomicBool::new(false));
		tokio::spawn(run_session(id, handler, receiver, Arc::clone(&removed), floor));
		Arc::new(Self {
			id,
			sender,
			removed,
		})
	}

	pub(crate) fn id(&self) -> usize {
		self.id
	}

	pub(crate) fn is_removed(&self) -> bool {
		self.removed.load(Ordering::Acquire)
	}

	/// Queue a delivery. Ignored once the session has been closed.
	pub(crate) fn deliver(&self, delivery: Delivery) {
		if self.is_removed() {
			return;
		}
		if self.sender.send(delivery).is_err() {
			debug!("Listener session {} worker has stopped", self.id);
		}
	}

	/// Stop delivering. Anything still queued is discarded.
	pub(crate) fn close(&self) {
		self.removed.store(true, Ordering::Release);
	}
}

async fn run_session(
	id: usize,
	mut handler: Box<dyn SessionHandler>,
	mut receiver: mpsc::UnboundedReceiver<Delivery>,
	removed: Arc<AtomicBool>,
	floor: Option<u64>,
) {
	let mut last_delivered: Option<u64> = None;

	while let Some(delivery) = receiver.recv().await {
		if removed.load(Ordering::Acquire) {
			break;
		}

		match delivery {
			Delivery::Event { peer, info } => {
				let block_number = info.block_number;
				if floor.is_some_and(|floor| block_number < floor) {
					trace!(
						"Session {} dropping block {} below start block {:?}",
						id, block_number, floor
					);
					continue;
				}
				if last_delivered.is_some_and(|last| block_number < last) {
					trace!(
						"Session {} dropping stale block {} (last delivered {:?})",
						id, block_number, last_delivered
					);
					continue;
				}

				handler.handle_event(&peer, &info, &removed).await;
				last_delivered = Some(block_number);
			}
			Delivery::Error(error) => handler.handle_error(&error).await,
		}
	}

	debug!("Listener session {} finished", id);
}

/// Sessions attached to one event service.
#[derive(Debug, Default)]
pub(crate) struct ListenerRegistry {
	sessions: Mutex<Arc<Vec<Arc<ListenerSession>>>>,
}

impl ListenerRegistry {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	fn snapshot(&self) -> Arc<Vec<Arc<ListenerSession>>> {
		Arc::clone(&self.sessions.lock().unwrap_or_else(PoisonError::into_inner))
	}

	/// Attach `session`. Returns `false` if a session with the same id is already attached.
	pub(crate) fn attach(&self, session: Arc<ListenerSession>) -> bool {
		let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
		if sessions.iter().any(|existing| existing.id() == session.id()) {
			return false;
		}
		let mut updated = Vec::clone(&sessions);
		updated.push(session);
		*sessions = Arc::new(updated);
		true
	}

	/// Detach the session with `id` and return the number of sessions left.
	pub(crate) fn detach(&self, id: usize) -> usize {
		let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
		if sessions.iter().any(|existing| existing.id() == id) {
			let updated: Vec<_> = sessions
				.iter()
				.filter(|existing| existing.id() != id)
				.cloned()
				.collect();
			*sessions = Arc::new(updated);
		}
		sessions.len()
	}

	pub(crate) fn len(&self) -> usize {
		self.snapshot().len()
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Schedule a block onto every attached session.
	pub(crate) fn dispatch(&self, peer: &str, info: Arc<EventInfo>) {
		for session in self.snapshot().iter() {
			session.deliver(Delivery::Event {
				peer: peer.to_string(),
				info: Arc::clone(&info),
			});
		}
	}

	/// Report an event service failure to every attached session.
	pub(crate) fn broadcast_error(&self, error: PeerEventError) {
		for session in self.snapshot().iter() {
			session.deliver(Delivery::Error(error.clone()));
		}
	}
}
