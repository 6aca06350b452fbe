//! Aggregate facade: the state machine tying the event store, the causal
//! graph and the projection engine together for one root.
//!
//! Commands never mutate anything. They produce an event from the current
//! projected state, and the caller feeds that event back through
//! [`Aggregate::reduce`] (locally) or [`Aggregate::merge`] (from a peer).

use crate::fractional;
use crate::ops::{
    GenesisPayload, Operation, OpsPayload, Payload, ProjectionKind, GENESIS_KIND, OPS_KIND,
};
use crate::projection::{AggregateMeta, FieldEntry, HeadSet, Projector};
use cairn_core::{Error, EventId, Result, SharedClock, SortedKv};
use cairn_log::{graph, Event, EventBuilder, EventStore};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Lifecycle of an aggregate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateState {
    /// No genesis event has been reduced yet.
    Uninitialized,
    /// A genesis event has been reduced; `root` is its id.
    Active { root: EventId, kind: ProjectionKind },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReduceOptions {
    /// Run causal and domain validation before applying.
    pub validate: bool,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self { validate: true }
    }
}

/// Read request against the projection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    /// Restrict to one field; every live entry when `None`.
    pub field: Option<String>,
}

impl Query {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn field(field: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
        }
    }
}

/// Strategy for collapsing concurrent values of a field into one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Resolve {
    LowestEventId,
    HighestEventId,
    /// Highest `createdAt`, ties broken by the highest event id.
    #[default]
    Latest,
}

/// How a front-end turns its commands into field operations.
pub trait Layout {
    const KIND: ProjectionKind;
    type Command;

    /// Plan the operations for a command given the live entries.
    fn plan(heads: &HeadSet, command: Self::Command) -> Result<Vec<Operation>>;
}

/// One aggregate over a shared event store and index.
pub struct Aggregate<K: SortedKv> {
    store: Arc<dyn EventStore>,
    projector: Projector<K>,
    clock: SharedClock,
    state: RwLock<AggregateState>,
    /// Serialises reduce; the index rows of one event are not written atomically.
    writer: Mutex<()>,
}

impl<K: SortedKv> Aggregate<K> {
    /// A fresh, uninitialised aggregate.
    pub fn new(store: Arc<dyn EventStore>, kv: Arc<K>, clock: SharedClock) -> Self {
        Self {
            store,
            projector: Projector::new(kv),
            clock,
            state: RwLock::new(AggregateState::Uninitialized),
            writer: Mutex::new(()),
        }
    }

    /// Re-attach to an aggregate whose genesis was already reduced.
    pub fn open(
        store: Arc<dyn EventStore>,
        kv: Arc<K>,
        clock: SharedClock,
        root: EventId,
    ) -> Result<Self> {
        let aggregate = Self::new(store, kv, clock);
        let meta = aggregate
            .projector
            .meta(&root)?
            .ok_or_else(|| Error::NotFound(format!("aggregate {}", root.short())))?;
        *aggregate.state.write() = AggregateState::Active {
            root,
            kind: meta.projection,
        };
        Ok(aggregate)
    }

    pub fn state(&self) -> AggregateState {
        *self.state.read()
    }

    pub fn root(&self) -> Option<EventId> {
        match self.state() {
            AggregateState::Active { root, .. } => Some(root),
            AggregateState::Uninitialized => None,
        }
    }

    pub fn kind(&self) -> Option<ProjectionKind> {
        match self.state() {
            AggregateState::Active { kind, .. } => Some(kind),
            AggregateState::Uninitialized => None,
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    fn active(&self) -> Result<(EventId, ProjectionKind)> {
        match self.state() {
            AggregateState::Active { root, kind } => Ok((root, kind)),
            AggregateState::Uninitialized => {
                Err(Error::validation("aggregate is not initialized"))
            }
        }
    }

    /// Produce the genesis event for a new aggregate.
    pub fn genesis(&self, kind: ProjectionKind, name: &str) -> Result<Event> {
        if let AggregateState::Active { root, .. } = self.state() {
            return Err(Error::validation(format!(
                "aggregate already initialized as {}",
                root.short()
            )));
        }
        let payload = Payload::Genesis(GenesisPayload {
            projection: kind,
            name: name.to_string(),
        });
        Ok(EventBuilder::new(GENESIS_KIND)
            .with_payload(payload.to_value()?)
            .with_created_at(self.clock.tick(None))
            .build())
    }

    /// Produce the event for a front-end command, linked to the current
    /// frontier.
    pub fn command<L: Layout>(&self, command: L::Command) -> Result<Event> {
        let (root, kind) = self.active()?;
        if kind != L::KIND {
            return Err(Error::validation(format!(
                "{} command on a {kind} aggregate",
                L::KIND
            )));
        }

        let heads = self.projector.head_set(&root)?;
        let ops = L::plan(&heads, command)?;
        if ops.is_empty() {
            return Err(Error::validation("command has no effect"));
        }

        let payload = Payload::Ops(OpsPayload { ops });
        Ok(EventBuilder::new(OPS_KIND)
            .with_root(root)
            .with_parents(self.projector.frontier(&root)?)
            .with_payload(payload.to_value()?)
            .with_created_at(self.clock.tick(None))
            .build())
    }

    /// Causal and domain validation. Returns the event id.
    pub fn validate(&self, event: &Event) -> Result<EventId> {
        let id = self.store.codec().id(event)?;
        self.check(&id, event)?;
        Ok(id)
    }

    fn check(&self, id: &EventId, event: &Event) -> Result<(EventId, Payload)> {
        let root = graph::validate_causal(self.store.as_ref(), id, event)?;
        let payload = Payload::decode(event)?;

        match &payload {
            Payload::Genesis(_) => {
                if !event.is_genesis() {
                    return Err(Error::validation("genesis event must not have parents"));
                }
                if let AggregateState::Active { root, .. } = self.state() {
                    if &root != id {
                        return Err(Error::validation(format!(
                            "aggregate already initialized as {}",
                            root.short()
                        )));
                    }
                }
            }
            Payload::Ops(OpsPayload { ops }) => {
                if event.is_genesis() {
                    return Err(Error::validation("operations need a parent"));
                }
                let (expected, kind) = self.active()?;
                if root != expected {
                    return Err(Error::RootMismatch {
                        expected,
                        found: root,
                    });
                }
                self.check_ops(&root, kind, event, ops)?;
            }
        }

        Ok((root, payload))
    }

    fn check_ops(
        &self,
        root: &EventId,
        kind: ProjectionKind,
        event: &Event,
        ops: &[Operation],
    ) -> Result<()> {
        if ops.is_empty() {
            return Err(Error::validation("event carries no operations"));
        }

        let mut seen = HashSet::new();
        for op in ops {
            let field = op.field();
            if !seen.insert(field) {
                return Err(Error::validation(format!("field {field:?} touched twice")));
            }

            match kind {
                ProjectionKind::Map => {}
                ProjectionKind::List => {
                    if !fractional::is_valid(field) {
                        return Err(Error::validation(format!("invalid list position {field:?}")));
                    }
                }
                ProjectionKind::Set => check_member(field, op)?,
            }

            if let Operation::Delete { supersedes, .. } = op {
                if supersedes.is_empty() {
                    return Err(Error::validation(format!(
                        "delete of {field:?} names no heads"
                    )));
                }
            }

            for old in op.supersedes() {
                if !self.projector.has_value(root, field, old)? {
                    return Err(Error::validation(format!(
                        "{} holds no value for {field:?}",
                        old.short()
                    )));
                }
                if !graph::is_ancestor(self.store.as_ref(), old, &event.link)? {
                    return Err(Error::validation(format!(
                        "superseded {} is not an ancestor",
                        old.short()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Apply an event. Reducing an already applied event is a no-op, unless
    /// it was applied under another root.
    pub fn reduce(&self, event: &Event, options: ReduceOptions) -> Result<EventId> {
        let _writer = self.writer.lock();
        let id = self.store.codec().id(event)?;

        if let Some(applied) = self.projector.applied_root(&id)? {
            if let Some(root) = self.root() {
                if applied != root {
                    return Err(Error::RootMismatch {
                        expected: root,
                        found: applied,
                    });
                }
            }
            if event.kind == GENESIS_KIND && self.root().is_none() {
                if let Some(meta) = self.projector.meta(&id)? {
                    *self.state.write() = AggregateState::Active {
                        root: id,
                        kind: meta.projection,
                    };
                }
            }
            return Ok(id);
        }

        let (root, payload) = if options.validate {
            self.check(&id, event)?
        } else {
            (graph::root_of(self.store.as_ref(), &id, event)?, Payload::decode(event)?)
        };

        self.store.put(event)?;
        // Later local events must stamp after anything they may link.
        if event.created_at > Some(self.clock.last()) {
            self.clock.tick(event.created_at);
        }

        match payload {
            Payload::Genesis(genesis) => {
                let meta = AggregateMeta {
                    projection: genesis.projection,
                    name: genesis.name,
                };
                self.projector.activate(&id, &meta)?;
                *self.state.write() = AggregateState::Active {
                    root: id,
                    kind: meta.projection,
                };
                tracing::info!(root = %id.short(), kind = %meta.projection, "aggregate activated");
            }
            Payload::Ops(OpsPayload { ops }) => {
                let mut frontier = self.projector.frontier(&root)?;
                graph::advance_frontier(&mut frontier, id, event);
                self.projector.set_frontier(&root, &frontier)?;
                self.projector.apply(&root, &id, &ops)?;
                tracing::debug!(
                    root = %root.short(),
                    id = %id.short(),
                    ops = ops.len(),
                    "applied event"
                );
            }
        }

        Ok(id)
    }

    /// Live entries of the aggregate, or of one field.
    pub fn query(&self, query: &Query) -> Result<Vec<FieldEntry>> {
        let (root, _) = self.active()?;
        self.projector.heads(&root, query.field.as_deref())
    }

    pub fn heads(&self) -> Result<HeadSet> {
        let (root, _) = self.active()?;
        self.projector.head_set(&root)
    }

    /// Every value ever written to a field, superseded ones included.
    pub fn history(&self, field: &str) -> Result<Vec<FieldEntry>> {
        let (root, _) = self.active()?;
        self.projector.history(&root, field)
    }

    /// Events not yet referenced by any other applied event.
    pub fn frontier(&self) -> Result<BTreeSet<EventId>> {
        let (root, _) = self.active()?;
        self.projector.frontier(&root)
    }

    /// Collapse the live entries of a field into one.
    pub fn resolve(&self, field: &str, strategy: Resolve) -> Result<Option<FieldEntry>> {
        let entries = self.query(&Query::field(field))?;
        match strategy {
            Resolve::LowestEventId => Ok(entries.into_iter().min_by_key(|e| e.event)),
            Resolve::HighestEventId => Ok(entries.into_iter().max_by_key(|e| e.event)),
            Resolve::Latest => {
                let mut best: Option<(Option<u64>, FieldEntry)> = None;
                for entry in entries {
                    let created = self
                        .store
                        .get(&entry.event)?
                        .and_then(|event| event.created_at)
                        .map(|ts| ts.as_u64());
                    let newer = match &best {
                        None => true,
                        Some((at, current)) => (created, entry.event) > (*at, current.event),
                    };
                    if newer {
                        best = Some((created, entry));
                    }
                }
                Ok(best.map(|(_, entry)| entry))
            }
        }
    }
}

/// Set members are stored under their canonical JSON text.
fn check_member(field: &str, op: &Operation) -> Result<()> {
    let canonical = match op {
        Operation::Add { value, .. } => serde_json::to_string(value)?,
        Operation::Delete { .. } => serde_json::from_str::<Value>(field)
            .and_then(|value| serde_json::to_string(&value))
            .map_err(|_| Error::validation(format!("{field:?} is not a set member")))?,
    };
    if canonical != field {
        return Err(Error::validation(format!("{field:?} is not a set member")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::{ErrorKind, MemoryKv};
    use cairn_log::{Codec, KvEventStore};
    use serde_json::json;

    /// Raw field writes, for exercising the facade without a front-end.
    struct Raw;

    impl Layout for Raw {
        const KIND: ProjectionKind = ProjectionKind::Map;
        type Command = Vec<Operation>;

        fn plan(_heads: &HeadSet, command: Self::Command) -> Result<Vec<Operation>> {
            Ok(command)
        }
    }

    fn aggregate() -> Aggregate<MemoryKv> {
        let kv = Arc::new(MemoryKv::new());
        let store = KvEventStore::open(Arc::clone(&kv), Codec::sha256()).unwrap();
        Aggregate::new(Arc::new(store), kv, SharedClock::new())
    }

    fn started(kind: ProjectionKind) -> Aggregate<MemoryKv> {
        let aggregate = aggregate();
        let genesis = aggregate.genesis(kind, "test").unwrap();
        aggregate.reduce(&genesis, ReduceOptions::default()).unwrap();
        aggregate
    }

    fn add(field: &str, value: Value, supersedes: Vec<EventId>) -> Operation {
        Operation::Add {
            field: field.into(),
            value,
            supersedes,
        }
    }

    fn write(aggregate: &Aggregate<MemoryKv>, ops: Vec<Operation>) -> Result<EventId> {
        let event = aggregate.command::<Raw>(ops)?;
        aggregate.reduce(&event, ReduceOptions::default())
    }

    #[test]
    fn test_lifecycle() {
        let aggregate = aggregate();
        assert_eq!(aggregate.state(), AggregateState::Uninitialized);
        assert!(matches!(
            aggregate.command::<Raw>(vec![add("x", json!(1), vec![])]),
            Err(Error::Validation(_))
        ));

        let genesis = aggregate.genesis(ProjectionKind::Map, "prefs").unwrap();
        // Producing an event changes nothing.
        assert_eq!(aggregate.state(), AggregateState::Uninitialized);

        let root = aggregate.reduce(&genesis, ReduceOptions::default()).unwrap();
        assert_eq!(
            aggregate.state(),
            AggregateState::Active {
                root,
                kind: ProjectionKind::Map
            }
        );
        assert!(aggregate.genesis(ProjectionKind::Map, "again").is_err());
        assert_eq!(aggregate.frontier().unwrap(), BTreeSet::from([root]));
    }

    #[test]
    fn test_command_links_frontier() {
        let aggregate = started(ProjectionKind::Map);
        let root = aggregate.root().unwrap();

        let first = write(&aggregate, vec![add("x", json!(1), vec![])]).unwrap();
        let event = aggregate.command::<Raw>(vec![add("y", json!(2), vec![])]).unwrap();

        assert_eq!(event.root, Some(root));
        assert_eq!(event.link, vec![first]);
        assert!(event.created_at.is_some());
    }

    #[test]
    fn test_reduce_idempotent() {
        let aggregate = started(ProjectionKind::Map);
        let event = aggregate.command::<Raw>(vec![add("x", json!(1), vec![])]).unwrap();

        let id = aggregate.reduce(&event, ReduceOptions::default()).unwrap();
        let heads = aggregate.heads().unwrap();
        assert_eq!(aggregate.reduce(&event, ReduceOptions::default()).unwrap(), id);
        assert_eq!(aggregate.heads().unwrap(), heads);
    }

    #[test]
    fn test_supersede_must_name_known_ancestor() {
        let aggregate = started(ProjectionKind::Map);
        let a = write(&aggregate, vec![add("x", json!(1), vec![])]).unwrap();

        let wrong_field = write(&aggregate, vec![add("y", json!(1), vec![a])]).unwrap_err();
        assert_eq!(wrong_field.kind(), ErrorKind::Validation);

        let empty_delete = write(
            &aggregate,
            vec![Operation::Delete {
                field: "x".into(),
                supersedes: vec![],
            }],
        )
        .unwrap_err();
        assert_eq!(empty_delete.kind(), ErrorKind::Validation);

        // A sibling that never saw `a` cannot retire it.
        let root = aggregate.root().unwrap();
        let payload = Payload::Ops(OpsPayload {
            ops: vec![add("x", json!(2), vec![a])],
        });
        let sibling = EventBuilder::new(OPS_KIND)
            .with_root(root)
            .with_parent(root)
            .with_payload(payload.to_value().unwrap())
            .build();
        assert_eq!(aggregate.validate(&sibling).unwrap_err().kind(), ErrorKind::Validation);

        let b = write(&aggregate, vec![add("x", json!(2), vec![a])]).unwrap();
        let live = aggregate.query(&Query::field("x")).unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].event, b);
        assert_eq!(aggregate.history("x").unwrap().len(), 2);
    }

    #[test]
    fn test_rootless_child_keeps_aggregate_usable() {
        let aggregate = started(ProjectionKind::Map);
        let root = aggregate.root().unwrap();

        let payload = Payload::Ops(OpsPayload {
            ops: vec![add("x", json!(1), vec![])],
        });
        let rootless = EventBuilder::new(OPS_KIND)
            .with_parent(root)
            .with_payload(payload.to_value().unwrap())
            .build();
        let id = aggregate.reduce(&rootless, ReduceOptions::default()).unwrap();
        assert_eq!(aggregate.frontier().unwrap(), BTreeSet::from([id]));

        let next = write(&aggregate, vec![add("y", json!(2), vec![])]).unwrap();
        assert_eq!(aggregate.frontier().unwrap(), BTreeSet::from([next]));
        assert_eq!(aggregate.query(&Query::all()).unwrap().len(), 2);
    }

    #[test]
    fn test_merged_timestamp_advances_clock() {
        let aggregate = started(ProjectionKind::Map);
        let root = aggregate.root().unwrap();
        let ahead = aggregate.clock().last().as_u64() + 1_000_000_000;

        let payload = Payload::Ops(OpsPayload {
            ops: vec![add("x", json!("remote"), vec![])],
        });
        let remote = EventBuilder::new(OPS_KIND)
            .with_root(root)
            .with_parent(root)
            .with_payload(payload.to_value().unwrap())
            .with_created_at(ahead.into())
            .build();
        let parent = aggregate.reduce(&remote, ReduceOptions::default()).unwrap();

        let child = aggregate.command::<Raw>(vec![add("x", json!("local"), vec![parent])]).unwrap();
        assert_eq!(child.link, vec![parent]);
        assert!(child.created_at > remote.created_at);

        aggregate.reduce(&child, ReduceOptions::default()).unwrap();
        let latest = aggregate.resolve("x", Resolve::Latest).unwrap().unwrap();
        assert_eq!(latest.value, json!("local"));
    }

    #[test]
    fn test_event_applied_under_other_root_is_rejected() {
        let kv = Arc::new(MemoryKv::new());
        let store: Arc<dyn EventStore> =
            Arc::new(KvEventStore::open(Arc::clone(&kv), Codec::sha256()).unwrap());
        let clock = SharedClock::new();
        let left = Aggregate::new(Arc::clone(&store), Arc::clone(&kv), clock.clone());
        let right = Aggregate::new(store, kv, clock);

        let left_genesis = left.genesis(ProjectionKind::Map, "left").unwrap();
        left.reduce(&left_genesis, ReduceOptions::default()).unwrap();
        let right_genesis = right.genesis(ProjectionKind::Map, "right").unwrap();
        right.reduce(&right_genesis, ReduceOptions::default()).unwrap();

        let event = left.command::<Raw>(vec![add("x", json!(1), vec![])]).unwrap();
        left.reduce(&event, ReduceOptions::default()).unwrap();

        let err = right.reduce(&event, ReduceOptions::default()).unwrap_err();
        assert!(matches!(err, Error::RootMismatch { .. }));
        assert_eq!(err.kind(), ErrorKind::Structural);
        assert!(right.query(&Query::all()).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let aggregate = started(ProjectionKind::Map);
        let err = write(
            &aggregate,
            vec![add("x", json!(1), vec![]), add("x", json!(2), vec![])],
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_wrong_layout_kind() {
        let aggregate = started(ProjectionKind::Set);
        assert!(matches!(
            aggregate.command::<Raw>(vec![add("x", json!(1), vec![])]),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_failed_validation_applies_nothing() {
        let aggregate = started(ProjectionKind::Map);
        let before = aggregate.store().len().unwrap();
        let ghost = cairn_core::Hasher::hash(b"ghost");

        assert!(write(&aggregate, vec![add("x", json!(1), vec![ghost])]).is_err());
        assert_eq!(aggregate.store().len().unwrap(), before);
        assert!(aggregate.query(&Query::all()).unwrap().is_empty());
    }

    #[test]
    fn test_open_existing() {
        let kv = Arc::new(MemoryKv::new());
        let store: Arc<dyn EventStore> =
            Arc::new(KvEventStore::open(Arc::clone(&kv), Codec::sha256()).unwrap());
        let clock = SharedClock::new();

        let first = Aggregate::new(Arc::clone(&store), Arc::clone(&kv), clock.clone());
        let root = first
            .reduce(&first.genesis(ProjectionKind::List, "").unwrap(), ReduceOptions::default())
            .unwrap();

        let reopened = Aggregate::open(Arc::clone(&store), Arc::clone(&kv), clock.clone(), root).unwrap();
        assert_eq!(reopened.kind(), Some(ProjectionKind::List));

        let missing = cairn_core::Hasher::hash(b"missing");
        let err = Aggregate::open(store, kv, clock, missing).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_resolve_strategies() {
        let aggregate = started(ProjectionKind::Map);
        let root = aggregate.root().unwrap();

        // Two concurrent writes, both children of the genesis.
        let mut ids = Vec::new();
        for (value, at) in [("early", 10u64), ("late", 20u64)] {
            let payload = Payload::Ops(OpsPayload {
                ops: vec![add("x", json!(value), vec![])],
            });
            let event = EventBuilder::new(OPS_KIND)
                .with_root(root)
                .with_parent(root)
                .with_payload(payload.to_value().unwrap())
                .with_created_at(at.into())
                .build();
            ids.push(aggregate.reduce(&event, ReduceOptions::default()).unwrap());
        }

        let latest = aggregate.resolve("x", Resolve::Latest).unwrap().unwrap();
        assert_eq!(latest.value, json!("late"));

        let lowest = aggregate.resolve("x", Resolve::LowestEventId).unwrap().unwrap();
        assert_eq!(lowest.event, *ids.iter().min().unwrap());
        let highest = aggregate.resolve("x", Resolve::HighestEventId).unwrap().unwrap();
        assert_eq!(highest.event, *ids.iter().max().unwrap());

        assert!(aggregate.resolve("missing", Resolve::Latest).unwrap().is_none());
        assert_eq!(
            aggregate.frontier().unwrap(),
            ids.iter().copied().collect::<BTreeSet<_>>()
        );
    }
}
