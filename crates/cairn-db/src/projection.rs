//! Keyed multi-value register engine.
//!
//! Applying an event writes, per field operation, three coordinated rows
//! (see [`crate::keys`]):
//! - a Value row, the permanent record of what the event wrote
//! - a Head row, present while the entry is live
//! - an Event-index row, so a later event can find and retire the Head row
//!
//! A field may hold several live entries at once when writes were
//! concurrent. Only an event that explicitly names an entry in its
//! `supersedes` list retires it; Value rows are never removed.
//!
//! The engine is not internally synchronised: callers serialise `apply` per
//! aggregate root.

use crate::keys;
use crate::ops::{Operation, ProjectionKind};
use cairn_core::{Error, EventId, Result, SortedKv};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A value written to a field by an event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldEntry {
    pub field: String,
    pub event: EventId,
    pub value: Value,
}

/// Snapshot of the live entries of an aggregate, grouped by field.
///
/// Fields iterate in key order and the entries of a field in event id order,
/// so positional selections over a snapshot are the same on every replica
/// holding the same entries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeadSet {
    fields: BTreeMap<String, Vec<FieldEntry>>,
}

impl HeadSet {
    pub fn from_entries(entries: impl IntoIterator<Item = FieldEntry>) -> Self {
        let mut fields: BTreeMap<String, Vec<FieldEntry>> = BTreeMap::new();
        for entry in entries {
            fields.entry(entry.field.clone()).or_default().push(entry);
        }
        for entries in fields.values_mut() {
            entries.sort_by(|a, b| a.event.cmp(&b.event));
        }
        HeadSet { fields }
    }

    /// Live entries of a field (empty when the field has none).
    pub fn get(&self, field: &str) -> &[FieldEntry] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Event ids of the live entries of a field.
    pub fn ids(&self, field: &str) -> Vec<EventId> {
        self.get(field).iter().map(|entry| entry.event).collect()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Every live entry, by field then event id.
    pub fn entries(&self) -> impl Iterator<Item = &FieldEntry> {
        self.fields.values().flatten()
    }

    /// Number of fields with at least one live entry.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Metadata stored at `V::<root>` when an aggregate is created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateMeta {
    pub projection: ProjectionKind,
    #[serde(default)]
    pub name: String,
}

/// The projection engine.
pub struct Projector<K: SortedKv> {
    kv: Arc<K>,
}

impl<K: SortedKv> Clone for Projector<K> {
    fn clone(&self) -> Self {
        Projector {
            kv: Arc::clone(&self.kv),
        }
    }
}

impl<K: SortedKv> Projector<K> {
    pub fn new(kv: Arc<K>) -> Self {
        Projector { kv }
    }

    pub fn kv(&self) -> &Arc<K> {
        &self.kv
    }

    /// Whether the event has already been reduced.
    pub fn is_applied(&self, event: &EventId) -> Result<bool> {
        self.kv.contains(&keys::event_marker(event))
    }

    /// Root an applied event was reduced under.
    pub fn applied_root(&self, event: &EventId) -> Result<Option<EventId>> {
        match self.kv.get(&keys::event_marker(event))? {
            Some(bytes) => {
                let hex = String::from_utf8_lossy(&bytes);
                EventId::from_hex(&hex)
                    .map(Some)
                    .ok_or_else(|| Error::OperationFailed(format!("bad applied marker: {hex}")))
            }
            None => Ok(None),
        }
    }

    /// Record a new aggregate: metadata, a frontier holding the genesis
    /// event, and the genesis applied marker.
    pub fn activate(&self, root: &EventId, meta: &AggregateMeta) -> Result<()> {
        self.kv.put(&keys::value_root(root), serde_json::to_vec(meta)?)?;
        self.set_frontier(root, &BTreeSet::from([*root]))?;
        self.kv.put(&keys::event_marker(root), root.to_hex().into_bytes())
    }

    /// Metadata of an aggregate, if it exists.
    pub fn meta(&self, root: &EventId) -> Result<Option<AggregateMeta>> {
        match self.kv.get(&keys::value_root(root))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn frontier(&self, root: &EventId) -> Result<BTreeSet<EventId>> {
        match self.kv.get(&keys::head_root(root))? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(BTreeSet::new()),
        }
    }

    pub fn set_frontier(&self, root: &EventId, frontier: &BTreeSet<EventId>) -> Result<()> {
        self.kv.put(&keys::head_root(root), serde_json::to_vec(frontier)?)
    }

    /// Apply the operations of one event. Returns `false` (and changes
    /// nothing) when the event was already applied.
    pub fn apply(&self, root: &EventId, event: &EventId, ops: &[Operation]) -> Result<bool> {
        if self.is_applied(event)? {
            return Ok(false);
        }

        for op in ops {
            match op {
                Operation::Add {
                    field,
                    value,
                    supersedes,
                } => {
                    let bytes = serde_json::to_vec(value)?;
                    self.kv.put(&keys::value_key(root, field, event), bytes.clone())?;
                    self.kv.put(&keys::head_key(root, field, event), bytes)?;
                    self.kv.put(
                        &keys::event_field_key(event, field),
                        root.to_hex().into_bytes(),
                    )?;
                    self.retire(root, field, event, supersedes)?;
                }
                Operation::Delete { field, supersedes } => {
                    self.retire(root, field, event, supersedes)?;
                }
            }
        }

        // Written last: a partially applied event is simply applied again.
        self.kv
            .put(&keys::event_marker(event), root.to_hex().into_bytes())?;
        Ok(true)
    }

    fn retire(
        &self,
        root: &EventId,
        field: &str,
        by: &EventId,
        supersedes: &[EventId],
    ) -> Result<()> {
        for old in supersedes.iter().filter(|old| *old != by) {
            self.kv.delete(&keys::head_key(root, field, old))?;
            self.kv.delete(&keys::event_field_key(old, field))?;
        }
        Ok(())
    }

    /// Live entries of an aggregate, or of one field when given.
    pub fn heads(&self, root: &EventId, field: Option<&str>) -> Result<Vec<FieldEntry>> {
        let prefix = match field {
            Some(field) => keys::head_field_prefix(root, field),
            None => keys::head_fields_prefix(root),
        };
        self.scan_entries(&prefix, field)
    }

    pub fn head_set(&self, root: &EventId) -> Result<HeadSet> {
        Ok(HeadSet::from_entries(self.heads(root, None)?))
    }

    /// Every value ever written to a field, live or superseded.
    pub fn history(&self, root: &EventId, field: &str) -> Result<Vec<FieldEntry>> {
        self.scan_entries(&keys::value_field_prefix(root, field), Some(field))
    }

    /// The value an event wrote to a field.
    pub fn value_at(&self, root: &EventId, field: &str, event: &EventId) -> Result<Option<Value>> {
        match self.kv.get(&keys::value_key(root, field, event))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn has_value(&self, root: &EventId, field: &str, event: &EventId) -> Result<bool> {
        self.kv.contains(&keys::value_key(root, field, event))
    }

    /// Fields in which the event still holds a live entry.
    pub fn touched(&self, event: &EventId) -> Result<Vec<String>> {
        let mut fields = Vec::new();
        for (key, _) in self.kv.scan_prefix(&keys::event_fields_prefix(event))? {
            let (_, field) = keys::parse_event_field_key(&key)
                .ok_or_else(|| Error::OperationFailed(format!("bad index key: {key}")))?;
            fields.push(field.to_string());
        }
        Ok(fields)
    }

    /// Entries under `prefix`. A field prefix also matches longer fields
    /// that start with `<field>:E:`, so those rows are dropped here.
    fn scan_entries(&self, prefix: &str, field: Option<&str>) -> Result<Vec<FieldEntry>> {
        let mut entries = Vec::new();
        for (key, bytes) in self.kv.scan_prefix(prefix)? {
            let parsed = keys::parse_field_key(&key)
                .ok_or_else(|| Error::OperationFailed(format!("bad index key: {key}")))?;
            if field.is_some_and(|field| parsed.field != field) {
                continue;
            }
            entries.push(FieldEntry {
                field: parsed.field.to_string(),
                event: parsed.event,
                value: serde_json::from_slice(&bytes)?,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::{Hasher, MemoryKv};
    use serde_json::json;

    fn id(tag: &str) -> EventId {
        Hasher::hash(tag.as_bytes())
    }

    fn add(field: &str, value: Value, supersedes: &[EventId]) -> Operation {
        Operation::Add {
            field: field.into(),
            value,
            supersedes: supersedes.to_vec(),
        }
    }

    fn values(entries: Vec<FieldEntry>) -> Vec<Value> {
        entries.into_iter().map(|e| e.value).collect()
    }

    #[test]
    fn test_add_writes_three_rows() {
        let kv = Arc::new(MemoryKv::new());
        let projector = Projector::new(Arc::clone(&kv));
        let (root, a) = (id("root"), id("a"));

        assert!(projector.apply(&root, &a, &[add("x", json!(1), &[])]).unwrap());

        assert!(kv.contains(&keys::value_key(&root, "x", &a)).unwrap());
        assert!(kv.contains(&keys::head_key(&root, "x", &a)).unwrap());
        assert!(kv.contains(&keys::event_field_key(&a, "x")).unwrap());
        assert!(projector.is_applied(&a).unwrap());
        assert_eq!(projector.touched(&a).unwrap(), vec!["x".to_string()]);
    }

    #[test]
    fn test_supersede_keeps_history() {
        let projector = Projector::new(Arc::new(MemoryKv::new()));
        let (root, a, b) = (id("root"), id("a"), id("b"));

        projector.apply(&root, &a, &[add("x", json!(1), &[])]).unwrap();
        projector.apply(&root, &b, &[add("x", json!(2), &[a])]).unwrap();

        assert_eq!(values(projector.heads(&root, Some("x")).unwrap()), vec![json!(2)]);
        assert_eq!(projector.value_at(&root, "x", &a).unwrap(), Some(json!(1)));
        assert_eq!(projector.history(&root, "x").unwrap().len(), 2);
        assert!(projector.touched(&a).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_adds_coexist() {
        let projector = Projector::new(Arc::new(MemoryKv::new()));
        let (root, a, b) = (id("root"), id("a"), id("b"));

        projector.apply(&root, &a, &[add("x", json!("left"), &[])]).unwrap();
        projector.apply(&root, &b, &[add("x", json!("right"), &[])]).unwrap();

        let mut live = values(projector.heads(&root, Some("x")).unwrap());
        live.sort_by_key(|v| v.to_string());
        assert_eq!(live, vec![json!("left"), json!("right")]);
    }

    #[test]
    fn test_delete_retires_without_value() {
        let projector = Projector::new(Arc::new(MemoryKv::new()));
        let (root, a, b) = (id("root"), id("a"), id("b"));

        projector.apply(&root, &a, &[add("x", json!(1), &[])]).unwrap();
        projector
            .apply(
                &root,
                &b,
                &[Operation::Delete {
                    field: "x".into(),
                    supersedes: vec![a],
                }],
            )
            .unwrap();

        assert!(projector.heads(&root, Some("x")).unwrap().is_empty());
        assert!(projector.value_at(&root, "x", &b).unwrap().is_none());
        assert_eq!(projector.value_at(&root, "x", &a).unwrap(), Some(json!(1)));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let kv = Arc::new(MemoryKv::new());
        let projector = Projector::new(Arc::clone(&kv));
        let (root, a, b) = (id("root"), id("a"), id("b"));

        projector.apply(&root, &a, &[add("x", json!(1), &[])]).unwrap();
        projector.apply(&root, &b, &[add("x", json!(2), &[a])]).unwrap();
        let before = kv.keys();

        // Re-applying the superseded event must not resurrect its head.
        assert!(!projector.apply(&root, &a, &[add("x", json!(1), &[])]).unwrap());
        assert!(!projector.apply(&root, &b, &[add("x", json!(2), &[a])]).unwrap());
        assert_eq!(kv.keys(), before);
    }

    #[test]
    fn test_field_scans_are_isolated() {
        let projector = Projector::new(Arc::new(MemoryKv::new()));
        let (root, other_root, a, b) = (id("root"), id("other"), id("a"), id("b"));

        projector
            .apply(&root, &a, &[add("x", json!(1), &[]), add("xy", json!(2), &[])])
            .unwrap();
        projector.apply(&other_root, &b, &[add("x", json!(3), &[])]).unwrap();

        assert_eq!(values(projector.heads(&root, Some("x")).unwrap()), vec![json!(1)]);
        assert_eq!(projector.heads(&root, None).unwrap().len(), 2);
        assert_eq!(projector.head_set(&root).unwrap().len(), 2);
    }

    #[test]
    fn test_field_with_separator_text_stays_separate() {
        let projector = Projector::new(Arc::new(MemoryKv::new()));
        let (root, a, b) = (id("root"), id("a"), id("b"));

        projector.apply(&root, &a, &[add("a", json!(1), &[])]).unwrap();
        projector.apply(&root, &b, &[add("a:E:b", json!(2), &[])]).unwrap();

        assert_eq!(values(projector.heads(&root, Some("a")).unwrap()), vec![json!(1)]);
        assert_eq!(values(projector.history(&root, "a").unwrap()), vec![json!(1)]);
        assert_eq!(values(projector.heads(&root, Some("a:E:b")).unwrap()), vec![json!(2)]);
        assert_eq!(projector.head_set(&root).unwrap().len(), 2);
    }

    #[test]
    fn test_head_set_orders_by_event() {
        let (a, b) = (id("a"), id("b"));
        let entries = vec![
            FieldEntry { field: "f".into(), event: a.max(b), value: json!(1) },
            FieldEntry { field: "f".into(), event: a.min(b), value: json!(2) },
            FieldEntry { field: "e".into(), event: a, value: json!(3) },
        ];
        let heads = HeadSet::from_entries(entries);

        assert_eq!(heads.fields().collect::<Vec<_>>(), vec!["e", "f"]);
        assert_eq!(heads.ids("f"), vec![a.min(b), a.max(b)]);
        assert!(heads.get("missing").is_empty());
        assert_eq!(heads.entries().count(), 3);
    }

    #[test]
    fn test_activation_and_frontier() {
        let projector = Projector::new(Arc::new(MemoryKv::new()));
        let root = id("root");
        let meta = AggregateMeta {
            projection: ProjectionKind::Map,
            name: "prefs".into(),
        };

        assert!(projector.meta(&root).unwrap().is_none());
        projector.activate(&root, &meta).unwrap();

        assert_eq!(projector.meta(&root).unwrap(), Some(meta));
        assert_eq!(projector.frontier(&root).unwrap(), BTreeSet::from([root]));
        assert!(projector.is_applied(&root).unwrap());
        // Bare rows never show up in field scans.
        assert!(projector.heads(&root, None).unwrap().is_empty());
    }
}
