//! # cairn-core
//!
//! Leaf building blocks of the Cairn event log:
//! - [`clock`]: hybrid logical clock, with a lock-free shared variant
//! - [`hash`]: SHA-256 content identifiers
//! - [`kv`]: the sorted key-value contract and an in-memory engine
//! - [`error`]: the error taxonomy used by every crate in the workspace

pub mod clock;
pub mod error;
pub mod hash;
pub mod kv;

pub use clock::{HybridClock, ManualTimeSource, SharedClock, SystemTimeSource, TimeSource, Timestamp};
pub use error::{Error, ErrorKind, Result};
pub use hash::{EventId, Hasher};
pub use kv::{upper_bound, MemoryKv, RangeQuery, SortedKv, KEY_MAX};
