//! # cairn-log
//!
//! Content-addressed, causally linked event log for Cairn.
//!
//! This crate provides:
//! - [`Event`] and [`EventBuilder`], the immutable log entries
//! - [`Codec`], canonical encoding plus an injectable hash function
//! - [`EventStore`] / [`KvEventStore`], idempotent content-addressed storage
//!   with batch operations and checkpointed enumeration
//! - [`graph`], causal validation and ancestry queries over stored events
//!
//! ## Example
//!
//! ```rust
//! use cairn_core::MemoryKv;
//! use cairn_log::{Codec, EventBuilder, EventStore, KvEventStore};
//! use std::sync::Arc;
//!
//! let store = KvEventStore::open(Arc::new(MemoryKv::new()), Codec::sha256()).unwrap();
//!
//! let genesis = EventBuilder::new("demo/genesis").build();
//! let root = store.put(&genesis).unwrap();
//!
//! let cp = store.checkpoint().unwrap();
//! let next = EventBuilder::new("demo/step").with_root(root).with_parent(root).build();
//! let id = store.put(&next).unwrap();
//!
//! assert_eq!(store.entries(Some(cp)).unwrap(), vec![(id, next)]);
//! ```

mod codec;
mod event;
pub mod graph;
mod store;

pub use codec::{Codec, CodecBuilder, HashFn};
pub use event::{Event, EventBuilder};
pub use store::{Checkpoint, EventStore, EventStoreExt, KvEventStore};
