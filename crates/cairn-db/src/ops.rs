//! Event payloads understood by the projection layer.

use cairn_core::{Error, EventId, Result};
use cairn_log::Event;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Event type of a genesis event.
pub const GENESIS_KIND: &str = "cairn/genesis";
/// Event type of an event carrying field operations.
pub const OPS_KIND: &str = "cairn/ops";

/// Which front-end an aggregate was created for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionKind {
    Map,
    Set,
    List,
}

impl fmt::Display for ProjectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectionKind::Map => write!(f, "map"),
            ProjectionKind::Set => write!(f, "set"),
            ProjectionKind::List => write!(f, "list"),
        }
    }
}

/// One field operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Operation {
    /// Write `value` to `field`, retiring the listed heads.
    Add {
        field: String,
        value: Value,
        #[serde(default)]
        supersedes: Vec<EventId>,
    },
    /// Retire the listed heads of `field` without writing a value.
    Delete {
        field: String,
        supersedes: Vec<EventId>,
    },
}

impl Operation {
    pub fn field(&self) -> &str {
        match self {
            Operation::Add { field, .. } | Operation::Delete { field, .. } => field,
        }
    }

    pub fn supersedes(&self) -> &[EventId] {
        match self {
            Operation::Add { supersedes, .. } | Operation::Delete { supersedes, .. } => supersedes,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisPayload {
    pub projection: ProjectionKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpsPayload {
    pub ops: Vec<Operation>,
}

/// A decoded event payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Genesis(GenesisPayload),
    Ops(OpsPayload),
}

impl Payload {
    /// Decode the payload of an event by its type.
    pub fn decode(event: &Event) -> Result<Self> {
        match event.kind.as_str() {
            GENESIS_KIND => {
                let genesis = serde_json::from_value(event.payload.clone())
                    .map_err(|e| Error::Malformed(format!("genesis payload: {e}")))?;
                Ok(Payload::Genesis(genesis))
            }
            OPS_KIND => {
                let ops = serde_json::from_value(event.payload.clone())
                    .map_err(|e| Error::Malformed(format!("ops payload: {e}")))?;
                Ok(Payload::Ops(ops))
            }
            other => Err(Error::validation(format!("unsupported event type {other:?}"))),
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        let value = match self {
            Payload::Genesis(genesis) => serde_json::to_value(genesis)?,
            Payload::Ops(ops) => serde_json::to_value(ops)?,
        };
        Ok(value)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Genesis(_) => GENESIS_KIND,
            Payload::Ops(_) => OPS_KIND,
        }
    }
}
