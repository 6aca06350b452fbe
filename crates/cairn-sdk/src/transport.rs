//! Transport abstractions for replicating events between replicas.

use crate::error::{SdkError, TransportError};
use async_trait::async_trait;
use cairn_core::EventId;
use cairn_log::Event;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use ulid::Ulid;

/// Unique identifier for a replica.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicaId(pub String);

impl ReplicaId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh, time-ordered id.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A batch of events published by one replica.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: ReplicaId,
    pub events: Vec<(EventId, Event)>,
}

impl Envelope {
    pub fn new(origin: ReplicaId, events: Vec<(EventId, Event)>) -> Self {
        Self { origin, events }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Wire encoding for byte-oriented transports.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SdkError> {
        serde_json::to_vec(self).map_err(|e| SdkError::Codec(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SdkError> {
        serde_json::from_slice(bytes).map_err(|e| SdkError::Codec(e.to_string()))
    }
}

/// Receiving end of a transport registration. Dropping it unsubscribes.
pub struct Subscription {
    id: Ulid,
    receiver: mpsc::Receiver<Envelope>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        id: Ulid,
        receiver: mpsc::Receiver<Envelope>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            id,
            receiver,
            release: Some(Box::new(release)),
        }
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    /// Next envelope; `None` once the transport side is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Abstract event transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Deliver an envelope to every subscriber other than its origin.
    /// Returns how many subscribers received it.
    async fn dispatch(&self, envelope: Envelope) -> Result<usize, TransportError>;

    /// Register a replica for delivery.
    fn subscribe(&self, replica: &ReplicaId, capacity: usize) -> Subscription;
}

type Subscribers = Arc<RwLock<HashMap<Ulid, (ReplicaId, mpsc::Sender<Envelope>)>>>;

/// In-process broadcast hub for testing and simulation.
#[derive(Default)]
pub struct MemoryTransport {
    subscribers: Subscribers,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn dispatch(&self, envelope: Envelope) -> Result<usize, TransportError> {
        let targets: Vec<_> = {
            let subscribers = self.subscribers.read();
            subscribers
                .iter()
                .filter(|(_, (replica, _))| replica != &envelope.origin)
                .map(|(id, (_, tx))| (*id, tx.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (id, tx) in targets {
            if tx.send(envelope.clone()).await.is_ok() {
                delivered += 1;
            } else {
                // Receiver dropped without unsubscribing.
                self.subscribers.write().remove(&id);
                tracing::debug!(subscription = %id, "pruned closed subscriber");
            }
        }
        Ok(delivered)
    }

    fn subscribe(&self, replica: &ReplicaId, capacity: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = Ulid::new();
        self.subscribers.write().insert(id, (replica.clone(), tx));

        let subscribers = Arc::clone(&self.subscribers);
        Subscription::new(id, rx, move || {
            subscribers.write().remove(&id);
        })
    }
}
