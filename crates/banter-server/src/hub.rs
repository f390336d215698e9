use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use banter_core::ClientId;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// A membership request: the client's identity plus the sending side of its
/// outbound queue. The hub keeps the only sender, so removing the entry
/// closes the queue, and that close is the writer pump's termination signal.
pub struct Registration {
    pub id: ClientId,
    pub queue: mpsc::Sender<String>,
}

/// Central registry and broadcaster for the room.
///
/// One task owns the membership map and drains three intent channels
/// (register, unregister, broadcast). Nothing else ever touches the map, so
/// there are no locks; callers enqueue intents through a [`HubHandle`].
pub struct Hub {
    members: HashMap<ClientId, mpsc::Sender<String>>,
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::Receiver<ClientId>,
    broadcast_rx: mpsc::Receiver<String>,
    connections: Arc<AtomicUsize>,
}

/// Cloneable handle for submitting intents to a running [`Hub`].
///
/// None of the operations can fail from the caller's point of view: a full or
/// closed hub absorbs the intent silently, matching the policy that all
/// failure in the relay core resolves to eviction or no-op.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<ClientId>,
    broadcast_tx: mpsc::Sender<String>,
    connections: Arc<AtomicUsize>,
}

impl Hub {
    /// Create a hub and its handle. `intent_depth` bounds each of the three
    /// intent channels. The caller owns the lifecycle: spawn [`Hub::run`] to
    /// start, drop every handle to stop.
    pub fn new(intent_depth: usize) -> (Self, HubHandle) {
        let (register_tx, register_rx) = mpsc::channel(intent_depth);
        let (unregister_tx, unregister_rx) = mpsc::channel(intent_depth);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(intent_depth);
        let connections = Arc::new(AtomicUsize::new(0));

        let hub = Self {
            members: HashMap::new(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            connections: Arc::clone(&connections),
        };
        let handle = HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            connections,
        };
        (hub, handle)
    }

    /// Serve intents until every [`HubHandle`] has been dropped.
    ///
    /// No fairness is guaranteed between intent kinds when several are ready
    /// at once; members must not rely on cross-kind ordering.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(registration) = self.register_rx.recv() => self.register(registration),
                Some(id) = self.unregister_rx.recv() => self.unregister(&id),
                Some(text) = self.broadcast_rx.recv() => self.broadcast(&text),
                else => break,
            }
        }
        tracing::debug!("hub stopped");
    }

    fn register(&mut self, registration: Registration) {
        tracing::info!(client_id = %registration.id, "client registered");
        self.members.insert(registration.id, registration.queue);
        self.publish_count();
    }

    /// Idempotent: unregistering a non-member is a no-op, so the queue is
    /// closed exactly once no matter how many times a teardown path fires.
    fn unregister(&mut self, id: &ClientId) {
        if self.members.remove(id).is_some() {
            tracing::info!(client_id = %id, "client unregistered");
            self.publish_count();
        }
    }

    /// Fan a message out to every current member with a non-blocking push.
    /// A member whose queue is full is evicted on the spot; one slow
    /// consumer must never stall delivery to the rest of the room.
    fn broadcast(&mut self, text: &str) {
        self.members.retain(|id, queue| match queue.try_send(text.to_owned()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(client_id = %id, "outbound queue full, evicting slow consumer");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(client_id = %id, "outbound queue gone, dropping member");
                false
            }
        });
        self.publish_count();
    }

    fn publish_count(&self) {
        self.connections.store(self.members.len(), Ordering::Relaxed);
    }
}

impl HubHandle {
    /// Submit a registration. Must happen before the client's pumps start so
    /// no broadcast processed after it can miss the new member.
    pub async fn register(&self, id: ClientId, queue: mpsc::Sender<String>) {
        let _ = self.register_tx.send(Registration { id, queue }).await;
    }

    pub async fn unregister(&self, id: ClientId) {
        let _ = self.unregister_tx.send(id).await;
    }

    pub async fn broadcast(&self, text: String) {
        let _ = self.broadcast_tx.send(text).await;
    }

    /// Number of currently registered members, as last published by the hub.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}
