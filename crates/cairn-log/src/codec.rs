//! Canonical event encoding and content hashing.
//!
//! The hash function is an injected capability. [`Codec::sha256`] wires the
//! built-in SHA-256 hasher; anything else goes through [`CodecBuilder`],
//! which refuses to build without a hash function.

use crate::event::Event;
use cairn_core::{Error, EventId, Hasher, Result};
use std::fmt;
use std::sync::Arc;

/// Function deriving a content id from encoded bytes.
pub type HashFn = Arc<dyn Fn(&[u8]) -> EventId + Send + Sync>;

/// Encodes events and derives their ids.
#[derive(Clone)]
pub struct Codec {
    hash: HashFn,
}

impl Codec {
    pub fn builder() -> CodecBuilder {
        CodecBuilder::new()
    }

    /// Codec using SHA-256 over the canonical JSON encoding.
    pub fn sha256() -> Self {
        Codec {
            hash: Arc::new(Hasher::hash),
        }
    }

    /// Canonical encoding. Object keys come out sorted, so equal events
    /// always encode to equal bytes.
    pub fn encode(&self, event: &Event) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(event)?)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Event> {
        serde_json::from_slice(bytes).map_err(|e| Error::Malformed(e.to_string()))
    }

    pub fn hash(&self, bytes: &[u8]) -> EventId {
        (self.hash)(bytes)
    }

    /// Content id of an event.
    pub fn id(&self, event: &Event) -> Result<EventId> {
        Ok(self.hash(&self.encode(event)?))
    }

    /// Check that `claimed` really is the content id of `event`.
    pub fn verify(&self, claimed: &EventId, event: &Event) -> Result<()> {
        let computed = self.id(event)?;
        if &computed == claimed {
            Ok(())
        } else {
            Err(Error::IdMismatch {
                claimed: *claimed,
                computed,
            })
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::sha256()
    }
}

impl fmt::Debug for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Codec").finish_non_exhaustive()
    }
}

/// Builder for a codec with a caller-supplied hash function.
#[derive(Default)]
pub struct CodecBuilder {
    hash: Option<HashFn>,
}

impl CodecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hasher<F>(mut self, hash: F) -> Self
    where
        F: Fn(&[u8]) -> EventId + Send + Sync + 'static,
    {
        self.hash = Some(Arc::new(hash));
        self
    }

    /// Fails fast when no hash function was supplied.
    pub fn build(self) -> Result<Codec> {
        let hash = self.hash.ok_or(Error::MissingDependency("hash function"))?;
        Ok(Codec { hash })
    }
}
