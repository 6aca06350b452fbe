//! Integration tests for aggregates sharing persisted state.
//!
//! Tests cover:
//! - Re-attaching to an aggregate from its persisted index
//! - List and multiset behaviour under concurrent edits
//! - Supersedes that survive replication with history intact
//! - Field names containing key separator text
//! - Events carrying no root, resolved through their parents
//! - Merge batches where one item breaks a domain rule

use cairn_core::{ErrorKind, EventId, MemoryKv, SharedClock};
use cairn_db::{
    Aggregate, AggregateState, ListCommand, ListHandle, MapCommand, MapHandle, Operation,
    OpsPayload, Payload, ProjectionKind, Query, ReduceOptions, SetCommand, SetHandle, OPS_KIND,
};
use cairn_log::{Codec, Event, EventBuilder, EventStore, KvEventStore};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct Replica {
    kv: Arc<MemoryKv>,
    store: Arc<dyn EventStore>,
    clock: SharedClock,
}

impl Replica {
    fn new() -> Self {
        let kv = Arc::new(MemoryKv::new());
        let store = Arc::new(KvEventStore::open(Arc::clone(&kv), Codec::sha256()).unwrap());
        Self {
            kv,
            store,
            clock: SharedClock::new(),
        }
    }

    fn fresh(&self) -> Aggregate<MemoryKv> {
        Aggregate::new(Arc::clone(&self.store), Arc::clone(&self.kv), self.clock.clone())
    }

    fn create(&self, kind: ProjectionKind) -> (Aggregate<MemoryKv>, (EventId, Event)) {
        let aggregate = self.fresh();
        let genesis = aggregate.genesis(kind, "shared").unwrap();
        let root = aggregate.reduce(&genesis, ReduceOptions::default()).unwrap();
        (aggregate, (root, genesis))
    }

    fn join(&self, genesis: &(EventId, Event)) -> Aggregate<MemoryKv> {
        let aggregate = self.fresh();
        let token = CancellationToken::new();
        assert!(aggregate.merge(vec![genesis.clone()], &token).all(|r| r.is_ok()));
        aggregate
    }
}

/// A hand-built ops event, optionally without a root.
fn ops_event(
    aggregate: &Aggregate<MemoryKv>,
    root: Option<EventId>,
    parents: Vec<EventId>,
    ops: Vec<Operation>,
) -> (EventId, Event) {
    let payload = Payload::Ops(OpsPayload { ops });
    let mut builder = EventBuilder::new(OPS_KIND)
        .with_parents(parents)
        .with_payload(payload.to_value().unwrap());
    if let Some(root) = root {
        builder = builder.with_root(root);
    }
    let event = builder.build();
    (aggregate.store().codec().id(&event).unwrap(), event)
}

fn exchange(
    a: &Aggregate<MemoryKv>,
    a_events: Vec<(EventId, Event)>,
    b: &Aggregate<MemoryKv>,
    b_events: Vec<(EventId, Event)>,
) {
    let token = CancellationToken::new();
    assert!(a.merge(b_events, &token).all(|r| r.is_ok()));
    assert!(b.merge(a_events, &token).all(|r| r.is_ok()));
}

#[test]
fn test_reopen_from_persisted_state() {
    let replica = Replica::new();
    let (aggregate, (root, _)) = replica.create(ProjectionKind::Map);
    MapHandle::new(&aggregate)
        .apply(MapCommand::Set { field: "a".into(), value: json!(1) })
        .unwrap();
    let frontier = aggregate.frontier().unwrap();
    drop(aggregate);

    let reopened = Aggregate::open(
        Arc::clone(&replica.store),
        Arc::clone(&replica.kv),
        replica.clock.clone(),
        root,
    )
    .unwrap();
    assert_eq!(
        reopened.state(),
        AggregateState::Active { root, kind: ProjectionKind::Map }
    );
    assert_eq!(reopened.frontier().unwrap(), frontier);
    assert_eq!(MapHandle::new(&reopened).get("a").unwrap(), vec![json!(1)]);
}

#[test]
fn test_reduce_without_validation() {
    let replica = Replica::new();
    let (aggregate, _) = replica.create(ProjectionKind::Map);
    let event = aggregate
        .command::<cairn_db::MapLayout>(MapCommand::Set { field: "a".into(), value: json!(1) })
        .unwrap();

    aggregate
        .reduce(&event, ReduceOptions { validate: false })
        .unwrap();
    assert_eq!(aggregate.query(&Query::field("a")).unwrap().len(), 1);
}

#[test]
fn test_root_mismatch_is_structural() {
    let replica = Replica::new();
    let (first, _) = replica.create(ProjectionKind::Map);
    let (second, _) = replica.create(ProjectionKind::Map);

    let foreign = MapHandle::new(&second).set("a", json!(1)).unwrap();
    let err = first.reduce(&foreign, ReduceOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Structural);
}

#[test]
fn test_concurrent_list_appends_form_a_collision_group() {
    let (left_replica, right_replica) = (Replica::new(), Replica::new());
    let (left, genesis) = left_replica.create(ProjectionKind::List);
    let right = right_replica.join(&genesis);

    let l = ListHandle::new(&left)
        .apply(ListCommand::Append { values: vec![json!("left")] })
        .unwrap();
    let r = ListHandle::new(&right)
        .apply(ListCommand::Append { values: vec![json!("right")] })
        .unwrap();
    exchange(&left, vec![l], &right, vec![r]);

    let values = ListHandle::new(&left).values().unwrap();
    assert_eq!(values.len(), 2);
    assert_eq!(values, ListHandle::new(&right).values().unwrap());

    // Inserting between the two lands after the group.
    ListHandle::new(&left)
        .apply(ListCommand::Insert { index: 1, values: vec![json!("after")] })
        .unwrap();
    assert_eq!(ListHandle::new(&left).get(2).unwrap(), Some(json!("after")));
}

#[test]
fn test_concurrent_set_remove_keeps_unseen_insert() {
    let (left_replica, right_replica) = (Replica::new(), Replica::new());
    let (left, genesis) = left_replica.create(ProjectionKind::Set);
    let right = right_replica.join(&genesis);

    let first = SetHandle::new(&left).apply(SetCommand::Insert(json!("tag"))).unwrap();
    exchange(&left, vec![first.clone()], &right, vec![]);
    assert!(SetHandle::new(&right).contains(&json!("tag")).unwrap());

    // Left removes what it has seen while right inserts again.
    let removed = SetHandle::new(&left).apply(SetCommand::RemoveAll(json!("tag"))).unwrap();
    let added = SetHandle::new(&right).apply(SetCommand::Insert(json!("tag"))).unwrap();
    exchange(&left, vec![removed], &right, vec![added]);

    for side in [&left, &right] {
        assert_eq!(SetHandle::new(side).count(&json!("tag")).unwrap(), 1);
    }
}

#[test]
fn test_supersede_replicates_with_history() {
    let (left_replica, right_replica) = (Replica::new(), Replica::new());
    let (left, genesis) = left_replica.create(ProjectionKind::Map);
    let right = right_replica.join(&genesis);
    let map = MapHandle::new(&left);

    let events = vec![
        map.apply(MapCommand::Set { field: "x".into(), value: json!(1) }).unwrap(),
        map.apply(MapCommand::Set { field: "x".into(), value: json!(2) }).unwrap(),
        map.apply(MapCommand::Remove { field: "x".into() }).unwrap(),
    ];
    exchange(&left, events.clone(), &right, vec![]);

    assert!(right.query(&Query::field("x")).unwrap().is_empty());
    let history: Vec<_> = right.history("x").unwrap().into_iter().map(|e| e.value).collect();
    assert_eq!(history.len(), 2);
    assert!(history.contains(&json!(1)) && history.contains(&json!(2)));
    assert_eq!(right.frontier().unwrap(), BTreeSet::from([events[2].0]));
}

#[test]
fn test_field_names_with_separator_text() {
    let replica = Replica::new();
    let (aggregate, _) = replica.create(ProjectionKind::Map);
    let map = MapHandle::new(&aggregate);

    for (field, value) in [("a", 1), ("a:E:b", 2), ("a:F:c", 3)] {
        map.apply(MapCommand::Set { field: field.into(), value: json!(value) })
            .unwrap();
    }
    assert_eq!(map.get("a").unwrap(), vec![json!(1)]);
    assert_eq!(aggregate.history("a").unwrap().len(), 1);

    // The next write to `a` supersedes only its own value.
    map.apply(MapCommand::Set { field: "a".into(), value: json!(4) })
        .unwrap();
    assert_eq!(map.get("a").unwrap(), vec![json!(4)]);
    assert_eq!(map.get("a:E:b").unwrap(), vec![json!(2)]);
    assert_eq!(map.get("a:F:c").unwrap(), vec![json!(3)]);
    assert_eq!(aggregate.history("a").unwrap().len(), 2);
    assert_eq!(aggregate.heads().unwrap().len(), 3);
}

#[test]
fn test_rootless_event_replicates_and_accepts_children() {
    let (left_replica, right_replica) = (Replica::new(), Replica::new());
    let (left, genesis) = left_replica.create(ProjectionKind::Map);
    let right = right_replica.join(&genesis);
    let root = genesis.0;

    let rootless = ops_event(
        &left,
        None,
        vec![root],
        vec![Operation::Add { field: "x".into(), value: json!(1), supersedes: vec![] }],
    );
    let token = CancellationToken::new();
    let results: Vec<_> = right.merge(vec![rootless.clone()], &token).collect();
    assert!(results[0].is_ok());

    let child = MapHandle::new(&right)
        .apply(MapCommand::Set { field: "x".into(), value: json!(2) })
        .unwrap();
    assert_eq!(child.1.link, vec![rootless.0]);
    assert_eq!(child.1.root, Some(root));

    exchange(&left, vec![], &right, vec![rootless, child.clone()]);
    for side in [&left, &right] {
        assert_eq!(MapHandle::new(side).get("x").unwrap(), vec![json!(2)]);
        assert_eq!(side.frontier().unwrap(), BTreeSet::from([child.0]));
    }
}

#[test]
fn test_merge_reports_domain_violation_in_place() {
    let (left_replica, right_replica) = (Replica::new(), Replica::new());
    let (left, genesis) = left_replica.create(ProjectionKind::Map);
    let right = right_replica.join(&genesis);
    let root = genesis.0;

    let first = MapHandle::new(&left)
        .apply(MapCommand::Set { field: "x".into(), value: json!(1) })
        .unwrap();
    // Causally sound, but a delete that names nothing.
    let empty_delete = ops_event(
        &left,
        Some(root),
        vec![first.0],
        vec![Operation::Delete { field: "x".into(), supersedes: vec![] }],
    );
    let third = MapHandle::new(&left)
        .apply(MapCommand::Set { field: "y".into(), value: json!(2) })
        .unwrap();

    let token = CancellationToken::new();
    let results: Vec<_> = right
        .merge(vec![first.clone(), empty_delete.clone(), third.clone()], &token)
        .collect();

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert_eq!(results[1].id, empty_delete.0);
    assert_eq!(results[1].error.as_ref().unwrap().kind(), ErrorKind::Validation);
    assert!(results[2].is_ok());

    assert_eq!(MapHandle::new(&right).get("x").unwrap(), vec![json!(1)]);
    assert_eq!(MapHandle::new(&right).get("y").unwrap(), vec![json!(2)]);
    assert!(!right.store().contains(&empty_delete.0).unwrap());
}
