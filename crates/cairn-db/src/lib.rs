//! # cairn-db
//!
//! Key-indexed CRDT projections over the Cairn event log.
//!
//! This crate provides:
//! - A multi-value register engine ([`Projector`]) persisting live and
//!   historical field values under the `V::`/`H::`/`E::` key families
//! - The aggregate state machine ([`Aggregate`]): genesis, commands,
//!   validation, idempotent reduce and fail-open merge
//! - Map, multiset and list front-ends built on the same engine
//! - Fractional position keys for ordered lists
//!
//! ## Example
//!
//! ```rust
//! use cairn_core::{MemoryKv, SharedClock};
//! use cairn_db::{Aggregate, MapCommand, MapHandle, ProjectionKind, ReduceOptions};
//! use cairn_log::{Codec, KvEventStore};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let kv = Arc::new(MemoryKv::new());
//! let store = KvEventStore::open(Arc::clone(&kv), Codec::sha256()).unwrap();
//! let prefs = Aggregate::new(Arc::new(store), kv, SharedClock::new());
//!
//! let genesis = prefs.genesis(ProjectionKind::Map, "prefs").unwrap();
//! prefs.reduce(&genesis, ReduceOptions::default()).unwrap();
//!
//! let map = MapHandle::new(&prefs);
//! map.apply(MapCommand::Set { field: "theme".into(), value: json!("dark") }).unwrap();
//! assert_eq!(map.get("theme").unwrap(), vec![json!("dark")]);
//! ```

pub mod aggregate;
pub mod fractional;
pub mod keys;
pub mod list;
pub mod map;
pub mod merge;
pub mod ops;
pub mod projection;
pub mod set;

pub use aggregate::{Aggregate, AggregateState, Layout, Query, ReduceOptions, Resolve};
pub use list::{ListCommand, ListHandle, ListLayout};
pub use map::{MapCommand, MapHandle, MapLayout};
pub use merge::{MergeResult, MergeSummary};
pub use ops::{GenesisPayload, Operation, OpsPayload, Payload, ProjectionKind, GENESIS_KIND, OPS_KIND};
pub use projection::{AggregateMeta, FieldEntry, HeadSet, Projector};
pub use set::{member_key, SetCommand, SetHandle, SetLayout};
