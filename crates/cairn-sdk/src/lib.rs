//! # cairn-sdk
//!
//! Replica SDK for the Cairn event log.
//!
//! This crate provides:
//! - [`Replica`], owning one key-value engine, its event store and a
//!   registry of aggregates keyed by root
//! - The [`Transport`] abstraction and an in-process [`MemoryTransport`]
//! - Incremental replication from store checkpoints and an async receive
//!   loop driven by a cancellation token
//!
//! ## Example
//!
//! ```rust,ignore
//! use cairn_core::MemoryKv;
//! use cairn_db::{MapHandle, MapCommand, ProjectionKind};
//! use cairn_sdk::{MemoryTransport, Replica, ReplicaConfigBuilder};
//! use std::sync::Arc;
//!
//! let hub = Arc::new(MemoryTransport::new());
//! let config = ReplicaConfigBuilder::new().replica_id("laptop").build();
//! let replica = Replica::new(Arc::new(MemoryKv::new()), hub, config)?;
//!
//! let prefs = replica.create(ProjectionKind::Map, "prefs").await?;
//! let event = prefs.command::<cairn_db::MapLayout>(MapCommand::Set {
//!     field: "theme".into(),
//!     value: serde_json::json!("dark"),
//! })?;
//! replica.submit(&prefs.root().unwrap(), event).await?;
//! ```

pub mod config;
pub mod error;
pub mod replica;
pub mod transport;

pub use config::{ReplicaConfig, ReplicaConfigBuilder};
pub use error::{Result, SdkError, TransportError};
pub use replica::Replica;
pub use transport::{Envelope, MemoryTransport, ReplicaId, Subscription, Transport};
