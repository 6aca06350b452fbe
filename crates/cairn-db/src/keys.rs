//! Index key layout.
//!
//! Three key families share one sorted key space:
//!
//! | Family | Shape | Holds |
//! |---|---|---|
//! | Value | `V::<root>[:F:<field>[:E:<event>]]` | value written by an event (never deleted) |
//! | Head  | `H::<root>[:F:<field>][:E:<event>]` | live, non-superseded entries |
//! | Event | `E::<event>[:F:<field>]` | fields an event still heads |
//!
//! The separators are part of the persisted format. Ids are fixed-width hex,
//! so field names may contain separator text without confusing the parsers.
//! A per-field prefix can still match a longer field such as `x:E:...`;
//! scans compare the parsed field.

use cairn_core::EventId;

pub const VALUE: &str = "V::";
pub const HEAD: &str = "H::";
pub const EVENT: &str = "E::";
pub const FIELD_SEP: &str = ":F:";
pub const EVENT_SEP: &str = ":E:";

/// `V::<root>`: aggregate metadata, written once at genesis.
pub fn value_root(root: &EventId) -> String {
    format!("{VALUE}{root}")
}

/// `V::<root>:F:<field>:E:<event>`
pub fn value_key(root: &EventId, field: &str, event: &EventId) -> String {
    format!("{VALUE}{root}{FIELD_SEP}{field}{EVENT_SEP}{event}")
}

/// Prefix of every Value row of one field.
pub fn value_field_prefix(root: &EventId, field: &str) -> String {
    format!("{VALUE}{root}{FIELD_SEP}{field}{EVENT_SEP}")
}

/// `H::<root>`: the aggregate's causal frontier.
pub fn head_root(root: &EventId) -> String {
    format!("{HEAD}{root}")
}

/// `H::<root>:F:<field>:E:<event>`
pub fn head_key(root: &EventId, field: &str, event: &EventId) -> String {
    format!("{HEAD}{root}{FIELD_SEP}{field}{EVENT_SEP}{event}")
}

/// Prefix of every Head row of an aggregate.
pub fn head_fields_prefix(root: &EventId) -> String {
    format!("{HEAD}{root}{FIELD_SEP}")
}

/// Prefix of every Head row of one field. The trailing event separator
/// keeps field `x` from matching field `xy`.
pub fn head_field_prefix(root: &EventId, field: &str) -> String {
    format!("{HEAD}{root}{FIELD_SEP}{field}{EVENT_SEP}")
}

/// `E::<event>`: applied marker.
pub fn event_marker(event: &EventId) -> String {
    format!("{EVENT}{event}")
}

/// `E::<event>:F:<field>`
pub fn event_field_key(event: &EventId, field: &str) -> String {
    format!("{EVENT}{event}{FIELD_SEP}{field}")
}

/// Prefix of every field row of one event.
pub fn event_fields_prefix(event: &EventId) -> String {
    format!("{EVENT}{event}{FIELD_SEP}")
}

/// A parsed `V::` or `H::` field key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldKey<'a> {
    pub root: EventId,
    pub field: &'a str,
    pub event: EventId,
}

/// Parse `V::<root>:F:<field>:E:<event>` or the `H::` equivalent.
pub fn parse_field_key(key: &str) -> Option<FieldKey<'_>> {
    let rest = key.strip_prefix(VALUE).or_else(|| key.strip_prefix(HEAD))?;
    let root = EventId::from_hex(rest.get(..EventId::HEX_LEN)?)?;
    let rest = rest.get(EventId::HEX_LEN..)?.strip_prefix(FIELD_SEP)?;

    let split = rest.len().checked_sub(EVENT_SEP.len() + EventId::HEX_LEN)?;
    let field = rest.get(..split)?;
    let event = rest.get(split..)?.strip_prefix(EVENT_SEP)?;
    let event = EventId::from_hex(event)?;

    Some(FieldKey { root, field, event })
}

/// Field name of a `V::`/`H::` field key.
pub fn field_of(key: &str) -> Option<&str> {
    parse_field_key(key).map(|parsed| parsed.field)
}

/// Parse `E::<event>:F:<field>`.
pub fn parse_event_field_key(key: &str) -> Option<(EventId, &str)> {
    let rest = key.strip_prefix(EVENT)?;
    let event = EventId::from_hex(rest.get(..EventId::HEX_LEN)?)?;
    let field = rest.get(EventId::HEX_LEN..)?.strip_prefix(FIELD_SEP)?;
    Some((event, field))
}
