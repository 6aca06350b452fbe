//! Map front-end: one field per key, concurrent writes kept side by side.

use crate::aggregate::{Aggregate, Layout, Query, ReduceOptions, Resolve};
use crate::ops::{Operation, ProjectionKind};
use crate::projection::HeadSet;
use cairn_core::{Error, EventId, Result, SortedKv};
use cairn_log::Event;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MapCommand {
    /// Overwrite every value the field currently holds.
    Set { field: String, value: Value },
    /// Drop every value the field currently holds.
    Remove { field: String },
}

pub struct MapLayout;

impl Layout for MapLayout {
    const KIND: ProjectionKind = ProjectionKind::Map;
    type Command = MapCommand;

    fn plan(heads: &HeadSet, command: MapCommand) -> Result<Vec<Operation>> {
        match command {
            MapCommand::Set { field, value } => {
                let supersedes = heads.ids(&field);
                Ok(vec![Operation::Add {
                    field,
                    value,
                    supersedes,
                }])
            }
            MapCommand::Remove { field } => {
                let supersedes = heads.ids(&field);
                if supersedes.is_empty() {
                    return Err(Error::validation(format!("{field:?} holds no value")));
                }
                Ok(vec![Operation::Delete { field, supersedes }])
            }
        }
    }
}

/// Typed access to a map aggregate.
pub struct MapHandle<'a, K: SortedKv> {
    aggregate: &'a Aggregate<K>,
}

impl<'a, K: SortedKv> MapHandle<'a, K> {
    pub fn new(aggregate: &'a Aggregate<K>) -> Self {
        Self { aggregate }
    }

    pub fn set(&self, field: impl Into<String>, value: Value) -> Result<Event> {
        self.aggregate.command::<MapLayout>(MapCommand::Set {
            field: field.into(),
            value,
        })
    }

    pub fn remove(&self, field: impl Into<String>) -> Result<Event> {
        self.aggregate.command::<MapLayout>(MapCommand::Remove {
            field: field.into(),
        })
    }

    /// Plan a command and reduce it locally. The event is returned for
    /// publishing.
    pub fn apply(&self, command: MapCommand) -> Result<(EventId, Event)> {
        let event = self.aggregate.command::<MapLayout>(command)?;
        let id = self.aggregate.reduce(&event, ReduceOptions::default())?;
        Ok((id, event))
    }

    /// Distinct live values of a field.
    pub fn get(&self, field: &str) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        for entry in self.aggregate.query(&Query::field(field))? {
            if !values.contains(&entry.value) {
                values.push(entry.value);
            }
        }
        Ok(values)
    }

    /// Every field with its distinct live values.
    pub fn entries(&self) -> Result<BTreeMap<String, Vec<Value>>> {
        let mut map: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for entry in self.aggregate.query(&Query::all())? {
            let values = map.entry(entry.field).or_default();
            if !values.contains(&entry.value) {
                values.push(entry.value);
            }
        }
        Ok(map)
    }

    pub fn resolve(&self, field: &str, strategy: Resolve) -> Result<Option<Value>> {
        Ok(self
            .aggregate
            .resolve(field, strategy)?
            .map(|entry| entry.value))
    }
}
