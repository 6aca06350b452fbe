//! Content-addressed event storage.
//!
//! [`KvEventStore`] keeps events in a [`SortedKv`] under two key families:
//! - `C::<id>` holds the stored record (sequence number + event)
//! - `S::<seq>` maps a storage sequence number back to the event id
//!
//! The sequence family is what makes checkpoints cheap: a checkpoint is the
//! next sequence number, and enumerating since a checkpoint is a range scan.

use crate::codec::Codec;
use crate::event::Event;
use cairn_core::{upper_bound, Error, EventId, RangeQuery, Result, SortedKv};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ops::Bound;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const CONTENT_PREFIX: &str = "C::";
const SEQUENCE_PREFIX: &str = "S::";

fn content_key(id: &EventId) -> String {
    format!("{CONTENT_PREFIX}{id}")
}

fn sequence_key(seq: u64) -> String {
    format!("{SEQUENCE_PREFIX}{seq:016x}")
}

/// Opaque cursor marking everything stored so far.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Checkpoint(u64);

impl Checkpoint {
    /// The position before anything was stored.
    pub const ORIGIN: Checkpoint = Checkpoint(0);
}

/// Trait for content-addressed event storage.
pub trait EventStore: Send + Sync {
    /// The codec deriving ids for this store.
    fn codec(&self) -> &Codec;

    /// Store an event, returning its id. Storing an event twice is a no-op.
    fn put(&self, event: &Event) -> Result<EventId>;

    /// Get an event by id; `Ok(None)` when absent.
    fn get(&self, id: &EventId) -> Result<Option<Event>>;

    /// Remove an event. Returns whether it was present.
    fn delete(&self, id: &EventId) -> Result<bool>;

    fn contains(&self, id: &EventId) -> Result<bool>;

    /// Cursor representing everything stored so far.
    fn checkpoint(&self) -> Result<Checkpoint>;

    /// Events stored after `since` (everything when `None`), in storage order.
    fn entries(&self, since: Option<Checkpoint>) -> Result<Vec<(EventId, Event)>>;

    fn len(&self) -> Result<usize>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Batched store operations.
///
/// Results come back lazily, one per input and in input order. Once the
/// token is cancelled every remaining input yields [`Error::Aborted`];
/// work already done stays done.
pub trait EventStoreExt: EventStore {
    fn get_many<'a, I>(
        &'a self,
        ids: I,
        token: &'a CancellationToken,
    ) -> impl Iterator<Item = Result<Option<Event>>> + 'a
    where
        I: IntoIterator<Item = EventId>,
        I::IntoIter: 'a,
    {
        ids.into_iter().map(move |id| {
            if token.is_cancelled() {
                return Err(Error::Aborted);
            }
            self.get(&id)
        })
    }

    fn put_many<'a, I>(
        &'a self,
        events: I,
        token: &'a CancellationToken,
    ) -> impl Iterator<Item = Result<EventId>> + 'a
    where
        I: IntoIterator<Item = Event>,
        I::IntoIter: 'a,
    {
        events.into_iter().map(move |event| {
            if token.is_cancelled() {
                return Err(Error::Aborted);
            }
            self.put(&event)
        })
    }

    fn delete_many<'a, I>(
        &'a self,
        ids: I,
        token: &'a CancellationToken,
    ) -> impl Iterator<Item = Result<bool>> + 'a
    where
        I: IntoIterator<Item = EventId>,
        I::IntoIter: 'a,
    {
        ids.into_iter().map(move |id| {
            if token.is_cancelled() {
                return Err(Error::Aborted);
            }
            self.delete(&id)
        })
    }
}

impl<S: EventStore + ?Sized> EventStoreExt for S {}

#[derive(Serialize, Deserialize)]
struct Record {
    seq: u64,
    event: Event,
}

/// Event store over a sorted key-value engine.
pub struct KvEventStore<K: SortedKv> {
    kv: Arc<K>,
    codec: Codec,
    /// Next sequence number; the lock also serialises writers.
    next_seq: Mutex<u64>,
}

impl<K: SortedKv> KvEventStore<K> {
    /// Open a store, resuming the sequence after the last stored record.
    pub fn open(kv: Arc<K>, codec: Codec) -> Result<Self> {
        let query = RangeQuery::prefix(SEQUENCE_PREFIX).reversed().with_limit(1);
        let next_seq = match kv.range(&query)?.into_iter().next() {
            Some((key, _)) => parse_sequence(&key)? + 1,
            None => 0,
        };

        Ok(Self {
            kv,
            codec,
            next_seq: Mutex::new(next_seq),
        })
    }

    pub fn kv(&self) -> &Arc<K> {
        &self.kv
    }

    fn record(&self, id: &EventId) -> Result<Option<Record>> {
        let Some(bytes) = self.kv.get(&content_key(id))? else {
            return Ok(None);
        };
        let record: Record = serde_json::from_slice(&bytes)
            .map_err(|e| Error::OperationFailed(format!("corrupt record {}: {e}", id.short())))?;

        let computed = self.codec.id(&record.event)?;
        if &computed != id {
            return Err(Error::OperationFailed(format!(
                "record {} hashes to {}",
                id.short(),
                computed.short()
            )));
        }
        Ok(Some(record))
    }
}

fn parse_sequence(key: &str) -> Result<u64> {
    key.strip_prefix(SEQUENCE_PREFIX)
        .and_then(|hex| u64::from_str_radix(hex, 16).ok())
        .ok_or_else(|| Error::OperationFailed(format!("bad sequence key: {key}")))
}

impl<K: SortedKv> EventStore for KvEventStore<K> {
    fn codec(&self) -> &Codec {
        &self.codec
    }

    fn put(&self, event: &Event) -> Result<EventId> {
        let id = self.codec.id(event)?;
        let mut next_seq = self.next_seq.lock();

        if self.kv.contains(&content_key(&id))? {
            return Ok(id);
        }

        let seq = *next_seq;
        let record = Record {
            seq,
            event: event.clone(),
        };
        self.kv.put(&content_key(&id), serde_json::to_vec(&record)?)?;
        self.kv.put(&sequence_key(seq), id.to_hex().into_bytes())?;
        *next_seq += 1;

        tracing::trace!(id = %id.short(), seq, "stored event");
        Ok(id)
    }

    fn get(&self, id: &EventId) -> Result<Option<Event>> {
        Ok(self.record(id)?.map(|record| record.event))
    }

    fn delete(&self, id: &EventId) -> Result<bool> {
        let _guard = self.next_seq.lock();
        let Some(record) = self.record(id)? else {
            return Ok(false);
        };
        self.kv.delete(&sequence_key(record.seq))?;
        self.kv.delete(&content_key(id))?;
        Ok(true)
    }

    fn contains(&self, id: &EventId) -> Result<bool> {
        self.kv.contains(&content_key(id))
    }

    fn checkpoint(&self) -> Result<Checkpoint> {
        Ok(Checkpoint(*self.next_seq.lock()))
    }

    fn entries(&self, since: Option<Checkpoint>) -> Result<Vec<(EventId, Event)>> {
        let since = since.unwrap_or(Checkpoint::ORIGIN);
        let query = RangeQuery::all()
            .with_start(Bound::Included(sequence_key(since.0)))
            .with_end(Bound::Excluded(upper_bound(SEQUENCE_PREFIX)));

        let mut entries = Vec::new();
        for (key, value) in self.kv.range(&query)? {
            let hex = String::from_utf8(value)
                .map_err(|_| Error::OperationFailed(format!("bad sequence entry: {key}")))?;
            let id: EventId = hex.parse()?;
            // Deleted between the scan and the lookup.
            if let Some(record) = self.record(&id)? {
                entries.push((id, record.event));
            }
        }
        Ok(entries)
    }

    fn len(&self) -> Result<usize> {
        Ok(self.kv.scan_prefix(CONTENT_PREFIX)?.len())
    }
}
