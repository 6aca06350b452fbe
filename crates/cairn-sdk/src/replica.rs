//! A replica: one key-value engine, its event store, and every aggregate
//! living in it, wired to a transport.

use crate::config::ReplicaConfig;
use crate::error::{Result, SdkError};
use crate::transport::{Envelope, ReplicaId, Subscription, Transport};
use async_stream::stream;
use cairn_core::{Error, EventId, SharedClock, SortedKv};
use cairn_db::{Aggregate, MergeResult, MergeSummary, ProjectionKind, ReduceOptions, GENESIS_KIND};
use cairn_log::{graph, Checkpoint, Codec, Event, EventStore, KvEventStore};
use futures::stream::{Stream, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A replica of any number of aggregates.
pub struct Replica<K: SortedKv + 'static> {
    config: ReplicaConfig,
    kv: Arc<K>,
    store: Arc<dyn EventStore>,
    clock: SharedClock,
    transport: Arc<dyn Transport>,
    aggregates: RwLock<HashMap<EventId, Arc<Aggregate<K>>>>,
}

impl<K: SortedKv + 'static> Replica<K> {
    /// Open a replica over `kv`, hashing events with SHA-256.
    pub fn new(kv: Arc<K>, transport: Arc<dyn Transport>, config: ReplicaConfig) -> Result<Self> {
        Self::with_codec(kv, Codec::sha256(), transport, config)
    }

    pub fn with_codec(
        kv: Arc<K>,
        codec: Codec,
        transport: Arc<dyn Transport>,
        config: ReplicaConfig,
    ) -> Result<Self> {
        let store: Arc<dyn EventStore> = Arc::new(KvEventStore::open(Arc::clone(&kv), codec)?);
        tracing::info!(replica = %config.replica_id, "replica opened");
        Ok(Self {
            config,
            kv,
            store,
            clock: SharedClock::new(),
            transport,
            aggregates: RwLock::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> &ReplicaId {
        &self.config.replica_id
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    fn options(&self) -> ReduceOptions {
        ReduceOptions {
            validate: self.config.validate,
        }
    }

    fn fresh(&self) -> Aggregate<K> {
        Aggregate::new(Arc::clone(&self.store), Arc::clone(&self.kv), self.clock.clone())
    }

    fn register(&self, root: EventId, aggregate: Arc<Aggregate<K>>) -> Arc<Aggregate<K>> {
        Arc::clone(self.aggregates.write().entry(root).or_insert(aggregate))
    }

    /// Create an aggregate and publish its genesis.
    pub async fn create(&self, kind: ProjectionKind, name: &str) -> Result<Arc<Aggregate<K>>> {
        let aggregate = self.fresh();
        let genesis = aggregate.genesis(kind, name)?;
        let root = aggregate.reduce(&genesis, self.options())?;
        let aggregate = self.register(root, Arc::new(aggregate));

        self.dispatch(vec![(root, genesis)]).await?;
        Ok(aggregate)
    }

    /// An aggregate known to this replica.
    pub fn open(&self, root: &EventId) -> Result<Arc<Aggregate<K>>> {
        if let Some(aggregate) = self.aggregates.read().get(root) {
            return Ok(Arc::clone(aggregate));
        }
        let aggregate = Aggregate::open(
            Arc::clone(&self.store),
            Arc::clone(&self.kv),
            self.clock.clone(),
            *root,
        )?;
        Ok(self.register(*root, Arc::new(aggregate)))
    }

    /// Roots of the aggregates opened so far.
    pub fn roots(&self) -> Vec<EventId> {
        self.aggregates.read().keys().copied().collect()
    }

    /// Reduce a locally produced event and publish it.
    pub async fn submit(&self, root: &EventId, event: Event) -> Result<EventId> {
        let aggregate = self.open(root)?;
        let id = aggregate.reduce(&event, self.options())?;
        self.dispatch(vec![(id, event)]).await?;
        Ok(id)
    }

    async fn dispatch(&self, events: Vec<(EventId, Event)>) -> Result<usize> {
        let envelope = Envelope::new(self.config.replica_id.clone(), events);
        Ok(self.transport.dispatch(envelope).await?)
    }

    /// Aggregate an incoming event belongs to.
    fn route(&self, id: &EventId, event: &Event) -> cairn_core::Result<Arc<Aggregate<K>>> {
        if event.kind == GENESIS_KIND && event.is_genesis() {
            return match self.open(id) {
                Ok(aggregate) => Ok(aggregate),
                Err(SdkError::Core(Error::NotFound(_))) => Ok(Arc::new(self.fresh())),
                Err(SdkError::Core(error)) => Err(error),
                Err(other) => Err(Error::OperationFailed(other.to_string())),
            };
        }

        if event.link.is_empty() {
            return Err(Error::Malformed("event has no parents".into()));
        }
        let root = graph::root_of(self.store.as_ref(), id, event)?;
        self.open(&root).map_err(|error| match error {
            SdkError::Core(error) => error,
            other => Error::OperationFailed(other.to_string()),
        })
    }

    /// Merge an envelope, one result per event in envelope order.
    pub fn ingest<'a>(
        &'a self,
        envelope: Envelope,
        token: &'a CancellationToken,
    ) -> impl Iterator<Item = MergeResult> + 'a {
        envelope.events.into_iter().map(move |(id, event)| {
            if token.is_cancelled() {
                return MergeResult {
                    id,
                    error: Some(Error::Aborted),
                };
            }
            let aggregate = match self.route(&id, &event) {
                Ok(aggregate) => aggregate,
                Err(error) => {
                    tracing::warn!(id = %id.short(), %error, "unroutable event");
                    return MergeResult {
                        id,
                        error: Some(error),
                    };
                }
            };

            let is_genesis = event.kind == GENESIS_KIND;
            let result = aggregate
                .merge(std::iter::once((id, event)), token)
                .next()
                .unwrap_or(MergeResult {
                    id,
                    error: Some(Error::Aborted),
                });
            if is_genesis && result.is_ok() {
                self.register(id, aggregate);
            }
            result
        })
    }

    /// Publish every stored event after `since`, in storage order and in
    /// batches. Returns the checkpoint to resume from.
    pub async fn publish_since(&self, since: Option<Checkpoint>) -> Result<Checkpoint> {
        let checkpoint = self.store.checkpoint()?;
        let entries = self.store.entries(since)?;
        let total = entries.len();

        let mut batch = Vec::with_capacity(self.config.publish_batch_size);
        for entry in entries {
            batch.push(entry);
            if batch.len() == self.config.publish_batch_size {
                self.dispatch(std::mem::take(&mut batch)).await?;
            }
        }
        if !batch.is_empty() {
            self.dispatch(batch).await?;
        }

        tracing::debug!(replica = %self.config.replica_id, events = total, "published");
        Ok(checkpoint)
    }

    /// Register this replica with its transport.
    pub fn subscribe(&self) -> Subscription {
        self.transport
            .subscribe(&self.config.replica_id, self.config.channel_capacity)
    }

    /// Results of every event received on `subscription` until the token is
    /// cancelled or the transport goes away.
    pub fn updates<'a>(
        &'a self,
        mut subscription: Subscription,
        token: &'a CancellationToken,
    ) -> impl Stream<Item = MergeResult> + 'a {
        stream! {
            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => None,
                    envelope = subscription.recv() => envelope,
                };
                let Some(envelope) = next else { break };

                let results: Vec<_> = self.ingest(envelope, token).collect();
                for result in results {
                    yield result;
                }
            }
        }
    }

    /// Receive loop. Runs until the token is cancelled or the transport
    /// closes the subscription.
    pub async fn run(&self, subscription: Subscription, token: &CancellationToken) -> MergeSummary {
        tracing::info!(replica = %self.config.replica_id, "receive loop started");
        let updates = self.updates(subscription, token);
        futures::pin_mut!(updates);

        let mut summary = MergeSummary::default();
        while let Some(result) = updates.next().await {
            summary.record(&result);
        }

        tracing::info!(
            replica = %self.config.replica_id,
            applied = summary.applied,
            failed = summary.failed,
            "receive loop stopped"
        );
        summary
    }
}
