//! Sorted key-value contract.
//!
//! The event store and the projection indexes both live in one ordered
//! string key space. Any engine offering point reads/writes and ordered
//! range scans can back them; [`MemoryKv`] is the in-process reference.

use crate::error::Result;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// Appended to a prefix to form the exclusive upper bound of a prefix scan.
pub const KEY_MAX: char = '\u{10FFFF}';

/// Exclusive upper bound for every key starting with `prefix`.
pub fn upper_bound(prefix: &str) -> String {
    let mut end = String::with_capacity(prefix.len() + 4);
    end.push_str(prefix);
    end.push(KEY_MAX);
    end
}

/// An ordered range scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeQuery {
    pub start: Bound<String>,
    pub end: Bound<String>,
    pub reverse: bool,
    pub limit: Option<usize>,
}

impl RangeQuery {
    /// Every key.
    pub fn all() -> Self {
        RangeQuery {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
            reverse: false,
            limit: None,
        }
    }

    /// Every key starting with `prefix`.
    pub fn prefix(prefix: &str) -> Self {
        RangeQuery {
            start: Bound::Included(prefix.to_string()),
            end: Bound::Excluded(upper_bound(prefix)),
            reverse: false,
            limit: None,
        }
    }

    pub fn with_start(mut self, start: Bound<String>) -> Self {
        self.start = start;
        self
    }

    pub fn with_end(mut self, end: Bound<String>) -> Self {
        self.end = end;
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Ordered key-value storage.
pub trait SortedKv: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Deleting an absent key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Entries in key order (or reverse), honouring the limit.
    fn range(&self, query: &RangeQuery) -> Result<Vec<(String, Vec<u8>)>>;

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.range(&RangeQuery::prefix(prefix))
    }
}

impl<K: SortedKv + ?Sized> SortedKv for Arc<K> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn range(&self, query: &RangeQuery) -> Result<Vec<(String, Vec<u8>)>> {
        (**self).range(query)
    }
}

/// In-memory sorted store backed by a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryKv {
    map: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// All keys, in order.
    pub fn keys(&self) -> Vec<String> {
        self.map.read().keys().cloned().collect()
    }
}

fn borrowed(bound: &Bound<String>) -> Bound<&str> {
    match bound {
        Bound::Included(s) => Bound::Included(s.as_str()),
        Bound::Excluded(s) => Bound::Excluded(s.as_str()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

// BTreeMap::range panics on inverted bounds, so those are answered up front.
fn is_empty_range(start: Bound<&str>, end: Bound<&str>) -> bool {
    match (start, end) {
        (Bound::Included(s) | Bound::Excluded(s), Bound::Included(e) | Bound::Excluded(e))
            if s > e =>
        {
            true
        }
        (Bound::Excluded(s), Bound::Excluded(e)) => s == e,
        _ => false,
    }
}

impl SortedKv for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.map.write().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn range(&self, query: &RangeQuery) -> Result<Vec<(String, Vec<u8>)>> {
        let start = borrowed(&query.start);
        let end = borrowed(&query.end);
        if is_empty_range(start, end) {
            return Ok(Vec::new());
        }

        let map = self.map.read();
        let range = map.range::<str, _>((start, end));
        let limit = query.limit.unwrap_or(usize::MAX);
        let entries = if query.reverse {
            range
                .rev()
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        } else {
            range
                .take(limit)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        Ok(entries)
    }
}
