//! Ordered list front-end.
//!
//! Each element lives in a field named by a fractional position key, and
//! the list is the live entries in (position, event id) order. Concurrent
//! inserts at the same place may pick the same key; such a collision group
//! simply lists its members side by side.

use crate::aggregate::{Aggregate, Layout, Query, ReduceOptions};
use crate::fractional;
use crate::ops::{Operation, ProjectionKind};
use crate::projection::{FieldEntry, HeadSet};
use cairn_core::{Error, EventId, Result, SortedKv};
use cairn_log::Event;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListCommand {
    /// Insert values so the first one lands at `index`.
    Insert { index: usize, values: Vec<Value> },
    /// Add values to the end.
    Append { values: Vec<Value> },
    /// Remove `count` elements starting at `index`.
    Delete { index: usize, count: usize },
    /// Overwrite the element at `index`.
    Replace { index: usize, value: Value },
}

pub struct ListLayout;

impl ListLayout {
    fn insert(elements: &[&FieldEntry], index: usize, values: Vec<Value>) -> Result<Vec<Operation>> {
        if values.is_empty() {
            return Err(Error::validation("nothing to insert"));
        }
        if index > elements.len() {
            return Err(Error::validation(format!(
                "insert at {index} past end {}",
                elements.len()
            )));
        }

        // Landing inside a collision group places the values after it.
        let lo = index.checked_sub(1).map(|i| elements[i].field.as_str());
        let hi = elements[index..]
            .iter()
            .map(|entry| entry.field.as_str())
            .find(|field| lo.map_or(true, |lo| *field > lo));

        let keys = fractional::between(lo, hi, values.len())?;
        Ok(keys
            .into_iter()
            .zip(values)
            .map(|(field, value)| Operation::Add {
                field,
                value,
                supersedes: Vec::new(),
            })
            .collect())
    }
}

impl Layout for ListLayout {
    const KIND: ProjectionKind = ProjectionKind::List;
    type Command = ListCommand;

    fn plan(heads: &HeadSet, command: ListCommand) -> Result<Vec<Operation>> {
        let elements: Vec<&FieldEntry> = heads.entries().collect();

        match command {
            ListCommand::Insert { index, values } => Self::insert(&elements, index, values),
            ListCommand::Append { values } => Self::insert(&elements, elements.len(), values),
            ListCommand::Delete { index, count } => {
                let end = index.checked_add(count).filter(|end| *end <= elements.len());
                let Some(end) = end.filter(|_| count > 0) else {
                    return Err(Error::validation(format!(
                        "cannot delete {count} at {index} from {} elements",
                        elements.len()
                    )));
                };

                // One operation per position key.
                let mut grouped: BTreeMap<&str, Vec<EventId>> = BTreeMap::new();
                for entry in &elements[index..end] {
                    grouped.entry(entry.field.as_str()).or_default().push(entry.event);
                }
                Ok(grouped
                    .into_iter()
                    .map(|(field, supersedes)| Operation::Delete {
                        field: field.to_string(),
                        supersedes,
                    })
                    .collect())
            }
            ListCommand::Replace { index, value } => {
                let entry = elements.get(index).ok_or_else(|| {
                    Error::validation(format!("no element at {index} of {}", elements.len()))
                })?;
                Ok(vec![Operation::Add {
                    field: entry.field.clone(),
                    value,
                    supersedes: vec![entry.event],
                }])
            }
        }
    }
}

/// Typed access to a list aggregate.
pub struct ListHandle<'a, K: SortedKv> {
    aggregate: &'a Aggregate<K>,
}

impl<'a, K: SortedKv> ListHandle<'a, K> {
    pub fn new(aggregate: &'a Aggregate<K>) -> Self {
        Self { aggregate }
    }

    pub fn insert(&self, index: usize, values: Vec<Value>) -> Result<Event> {
        self.aggregate
            .command::<ListLayout>(ListCommand::Insert { index, values })
    }

    pub fn push(&self, value: Value) -> Result<Event> {
        self.aggregate.command::<ListLayout>(ListCommand::Append {
            values: vec![value],
        })
    }

    pub fn delete(&self, index: usize, count: usize) -> Result<Event> {
        self.aggregate
            .command::<ListLayout>(ListCommand::Delete { index, count })
    }

    pub fn replace(&self, index: usize, value: Value) -> Result<Event> {
        self.aggregate
            .command::<ListLayout>(ListCommand::Replace { index, value })
    }

    /// Plan a command and reduce it locally.
    pub fn apply(&self, command: ListCommand) -> Result<(EventId, Event)> {
        let event = self.aggregate.command::<ListLayout>(command)?;
        let id = self.aggregate.reduce(&event, ReduceOptions::default())?;
        Ok((id, event))
    }

    /// Elements in list order.
    pub fn entries(&self) -> Result<Vec<FieldEntry>> {
        Ok(self.aggregate.heads()?.entries().cloned().collect())
    }

    pub fn values(&self) -> Result<Vec<Value>> {
        Ok(self.entries()?.into_iter().map(|entry| entry.value).collect())
    }

    pub fn get(&self, index: usize) -> Result<Option<Value>> {
        Ok(self.values()?.into_iter().nth(index))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.aggregate.query(&Query::all())?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}
