//! Causal structure derived from event links.
//!
//! There is no separate graph store: parents are named by `link`, and every
//! query here walks the event store. An event is causally valid when all of
//! its parents are already stored and they all belong to the same root.

use crate::event::Event;
use crate::store::EventStore;
use cairn_core::{Error, EventId, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

/// The root an event belongs to. A genesis event is its own root, and an
/// event stored without one inherits the root of its first parent.
pub fn root_of<S: EventStore + ?Sized>(store: &S, id: &EventId, event: &Event) -> Result<EventId> {
    if let Some(root) = event.root {
        return Ok(root);
    }
    let mut current = match event.link.first() {
        Some(parent) => *parent,
        None => return Ok(*id),
    };
    // Content ids rule out cycles, so the walk ends at a rooted or genesis event.
    loop {
        let parent = store
            .get(&current)?
            .ok_or_else(|| Error::MissingParents(vec![current]))?;
        if let Some(root) = parent.root {
            return Ok(root);
        }
        match parent.link.first() {
            Some(next) => current = *next,
            None => return Ok(current),
        }
    }
}

/// Shape rules that need no store access.
pub fn check_shape(event: &Event) -> Result<()> {
    if event.kind.is_empty() {
        return Err(Error::Malformed("empty event type".into()));
    }
    if event.link.is_empty() && event.root.is_some() {
        return Err(Error::Malformed("event has a root but no parents".into()));
    }
    let distinct: HashSet<_> = event.link.iter().collect();
    if distinct.len() != event.link.len() {
        return Err(Error::Malformed("duplicate parent link".into()));
    }
    Ok(())
}

/// Validate causal soundness against the store and return the event's
/// effective root (its own id for a genesis event).
pub fn validate_causal<S: EventStore + ?Sized>(
    store: &S,
    id: &EventId,
    event: &Event,
) -> Result<EventId> {
    check_shape(event)?;
    if event.is_genesis() {
        return Ok(*id);
    }

    let mut parents = Vec::with_capacity(event.link.len());
    let mut missing = Vec::new();
    for link in &event.link {
        match store.get(link)? {
            Some(parent) => parents.push((*link, parent)),
            None => missing.push(*link),
        }
    }
    if !missing.is_empty() {
        return Err(Error::MissingParents(missing));
    }

    let mut expected = event.root;
    for (link, parent) in &parents {
        let found = root_of(store, link, parent)?;
        match expected {
            Some(expected) if expected != found => {
                return Err(Error::RootMismatch { expected, found });
            }
            Some(_) => {}
            None => expected = Some(found),
        }
    }

    // Non-genesis events always have parents, so a root was found.
    expected.ok_or_else(|| Error::Malformed("unable to derive root".into()))
}

/// All transitive ancestors of the given events (excluding the events).
pub fn ancestors<S: EventStore + ?Sized>(store: &S, from: &[EventId]) -> Result<HashSet<EventId>> {
    let mut result = HashSet::new();
    let mut queue: VecDeque<EventId> = VecDeque::new();

    for id in from {
        if let Some(event) = store.get(id)? {
            queue.extend(event.link.iter().copied());
        }
    }

    while let Some(current) = queue.pop_front() {
        if result.insert(current) {
            if let Some(event) = store.get(&current)? {
                queue.extend(event.link.iter().copied());
            }
        }
    }

    Ok(result)
}

/// Whether `ancestor` is reachable from `links` by following parents
/// (a link itself counts).
pub fn is_ancestor<S: EventStore + ?Sized>(
    store: &S,
    ancestor: &EventId,
    links: &[EventId],
) -> Result<bool> {
    let mut seen = HashSet::new();
    let mut queue: VecDeque<EventId> = links.iter().copied().collect();

    while let Some(current) = queue.pop_front() {
        if &current == ancestor {
            return Ok(true);
        }
        if !seen.insert(current) {
            continue;
        }
        if let Some(event) = store.get(&current)? {
            queue.extend(event.link.iter().copied());
        }
    }

    Ok(false)
}

/// Advance a frontier (set of heads) past a newly applied event.
pub fn advance_frontier(frontier: &mut BTreeSet<EventId>, id: EventId, event: &Event) {
    for parent in &event.link {
        frontier.remove(parent);
    }
    frontier.insert(id);
}

/// Order events so that parents precede children. Ties break by id, so the
/// result is deterministic. Links to events outside the set are ignored.
pub fn topological_order(events: &[(EventId, Event)]) -> Vec<EventId> {
    let known: HashMap<EventId, &Event> = events.iter().map(|(id, e)| (*id, e)).collect();
    let mut in_degree: BTreeMap<EventId, usize> = BTreeMap::new();
    let mut children: HashMap<EventId, Vec<EventId>> = HashMap::new();

    for (id, event) in &known {
        let degree = event.link.iter().filter(|p| known.contains_key(p)).count();
        in_degree.insert(*id, degree);
        for parent in event.link.iter().filter(|p| known.contains_key(p)) {
            children.entry(*parent).or_default().push(*id);
        }
    }

    let mut ready: BTreeSet<EventId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut result = Vec::with_capacity(known.len());

    while let Some(id) = ready.pop_first() {
        result.push(id);
        for child in children.get(&id).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(child) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    ready.insert(*child);
                }
            }
        }
    }

    result
}
