//! Multiset front-end.
//!
//! A member is stored in the field named by its canonical JSON text, and
//! every insert adds one live entry there: the multiplicity of a member is
//! the number of its live entries. Removing retires entries by id, so a
//! concurrent insert of the same member survives the removal.

use crate::aggregate::{Aggregate, Layout, Query, ReduceOptions};
use crate::ops::{Operation, ProjectionKind};
use crate::projection::HeadSet;
use cairn_core::{Error, EventId, Result, SortedKv};
use cairn_log::Event;
use serde_json::Value;
use std::collections::BTreeMap;

/// Field name of a member.
pub fn member_key(member: &Value) -> Result<String> {
    Ok(serde_json::to_string(member)?)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetCommand {
    Insert(Value),
    /// Remove `count` occurrences of a member.
    Remove { member: Value, count: usize },
    /// Remove every occurrence of a member.
    RemoveAll(Value),
}

pub struct SetLayout;

impl Layout for SetLayout {
    const KIND: ProjectionKind = ProjectionKind::Set;
    type Command = SetCommand;

    fn plan(heads: &HeadSet, command: SetCommand) -> Result<Vec<Operation>> {
        match command {
            SetCommand::Insert(member) => Ok(vec![Operation::Add {
                field: member_key(&member)?,
                value: member,
                supersedes: Vec::new(),
            }]),
            SetCommand::Remove { member, count } => {
                let field = member_key(&member)?;
                let live = heads.ids(&field);
                if count == 0 || count > live.len() {
                    return Err(Error::validation(format!(
                        "cannot remove {count} of {} occurrences of {field}",
                        live.len()
                    )));
                }
                Ok(vec![Operation::Delete {
                    field,
                    supersedes: live.into_iter().take(count).collect(),
                }])
            }
            SetCommand::RemoveAll(member) => {
                let field = member_key(&member)?;
                let supersedes = heads.ids(&field);
                if supersedes.is_empty() {
                    return Err(Error::validation(format!("{field} is not a member")));
                }
                Ok(vec![Operation::Delete { field, supersedes }])
            }
        }
    }
}

/// Typed access to a multiset aggregate.
pub struct SetHandle<'a, K: SortedKv> {
    aggregate: &'a Aggregate<K>,
}

impl<'a, K: SortedKv> SetHandle<'a, K> {
    pub fn new(aggregate: &'a Aggregate<K>) -> Self {
        Self { aggregate }
    }

    pub fn insert(&self, member: Value) -> Result<Event> {
        self.aggregate.command::<SetLayout>(SetCommand::Insert(member))
    }

    pub fn remove(&self, member: Value, count: usize) -> Result<Event> {
        self.aggregate
            .command::<SetLayout>(SetCommand::Remove { member, count })
    }

    pub fn remove_all(&self, member: Value) -> Result<Event> {
        self.aggregate.command::<SetLayout>(SetCommand::RemoveAll(member))
    }

    /// Plan a command and reduce it locally.
    pub fn apply(&self, command: SetCommand) -> Result<(EventId, Event)> {
        let event = self.aggregate.command::<SetLayout>(command)?;
        let id = self.aggregate.reduce(&event, ReduceOptions::default())?;
        Ok((id, event))
    }

    /// Multiplicity of a member.
    pub fn count(&self, member: &Value) -> Result<usize> {
        Ok(self
            .aggregate
            .query(&Query::field(member_key(member)?))?
            .len())
    }

    pub fn contains(&self, member: &Value) -> Result<bool> {
        Ok(self.count(member)? > 0)
    }

    /// Members with their multiplicities, ordered by canonical text.
    pub fn members(&self) -> Result<Vec<(Value, usize)>> {
        let mut members: BTreeMap<String, (Value, usize)> = BTreeMap::new();
        for entry in self.aggregate.query(&Query::all())? {
            members
                .entry(entry.field)
                .and_modify(|(_, count)| *count += 1)
                .or_insert((entry.value, 1));
        }
        Ok(members.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::{ErrorKind, MemoryKv, SharedClock};
    use cairn_log::{Codec, KvEventStore};
    use serde_json::json;
    use std::sync::Arc;

    fn set() -> Aggregate<MemoryKv> {
        let kv = Arc::new(MemoryKv::new());
        let store = KvEventStore::open(Arc::clone(&kv), Codec::sha256()).unwrap();
        let aggregate = Aggregate::new(Arc::new(store), kv, SharedClock::new());
        let genesis = aggregate.genesis(ProjectionKind::Set, "tags").unwrap();
        aggregate.reduce(&genesis, ReduceOptions::default()).unwrap();
        aggregate
    }

    #[test]
    fn test_multiplicity() {
        let aggregate = set();
        let handle = SetHandle::new(&aggregate);

        handle.apply(SetCommand::Insert(json!("a"))).unwrap();
        handle.apply(SetCommand::Insert(json!("a"))).unwrap();
        handle.apply(SetCommand::Insert(json!({"id": 7}))).unwrap();

        assert_eq!(handle.count(&json!("a")).unwrap(), 2);
        assert_eq!(
            handle.members().unwrap(),
            vec![(json!("a"), 2), (json!({"id": 7}), 1)]
        );

        handle
            .apply(SetCommand::Remove { member: json!("a"), count: 1 })
            .unwrap();
        assert_eq!(handle.count(&json!("a")).unwrap(), 1);

        handle.apply(SetCommand::RemoveAll(json!("a"))).unwrap();
        assert!(!handle.contains(&json!("a")).unwrap());
    }

    #[test]
    fn test_remove_bounds() {
        let aggregate = set();
        let handle = SetHandle::new(&aggregate);
        handle.apply(SetCommand::Insert(json!(1))).unwrap();

        for count in [0, 2] {
            let err = handle.remove(json!(1), count).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
        assert_eq!(handle.remove_all(json!(2)).unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_non_canonical_member_rejected() {
        let aggregate = set();
        let root = aggregate.root().unwrap();
        let payload = crate::ops::Payload::Ops(crate::ops::OpsPayload {
            ops: vec![Operation::Add {
                field: "\"b\"".into(),
                value: json!("a"),
                supersedes: vec![],
            }],
        });
        let event = cairn_log::EventBuilder::new(crate::ops::OPS_KIND)
            .with_root(root)
            .with_parent(root)
            .with_payload(payload.to_value().unwrap())
            .build();

        let err = aggregate.reduce(&event, ReduceOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
