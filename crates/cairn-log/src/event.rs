//! Event definition and builder.
//!
//! An event carries:
//! - a type tag and a structured payload
//! - links to parent events (causal predecessors)
//! - the id of the aggregate root it belongs to (absent on genesis events)
//! - an optional hybrid-clock timestamp
//!
//! Events hold no id of their own; the id is the hash of their canonical
//! encoding (see [`crate::codec::Codec`]).

use cairn_core::{EventId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An immutable entry of the event log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub payload: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<EventId>,

    #[serde(default)]
    pub link: Vec<EventId>,

    #[serde(
        rename = "createdAt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<Timestamp>,
}

impl Event {
    /// A genesis event starts an aggregate: no parents, no root.
    pub fn is_genesis(&self) -> bool {
        self.link.is_empty() && self.root.is_none()
    }

    pub fn has_parent(&self, id: &EventId) -> bool {
        self.link.contains(id)
    }

    pub fn parent_count(&self) -> usize {
        self.link.len()
    }
}

/// Builder for events.
#[derive(Clone, Debug, Default)]
pub struct EventBuilder {
    kind: String,
    payload: Value,
    root: Option<EventId>,
    link: Vec<EventId>,
    created_at: Option<Timestamp>,
}

impl EventBuilder {
    pub fn new(kind: impl Into<String>) -> Self {
        EventBuilder {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_root(mut self, root: EventId) -> Self {
        self.root = Some(root);
        self
    }

    pub fn with_parents(mut self, parents: impl IntoIterator<Item = EventId>) -> Self {
        self.link.extend(parents);
        self
    }

    pub fn with_parent(mut self, parent: EventId) -> Self {
        self.link.push(parent);
        self
    }

    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Build the event. Links are sorted and de-duplicated so that
    /// logically equal events share one id.
    pub fn build(mut self) -> Event {
        self.link.sort();
        self.link.dedup();

        Event {
            kind: self.kind,
            payload: self.payload,
            root: self.root,
            link: self.link,
            created_at: self.created_at,
        }
    }
}
