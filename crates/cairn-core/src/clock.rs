//! Hybrid logical clock.
//!
//! A tick returns `max(now, ref)` when that is strictly greater than the last
//! issued value, and `last + 1` otherwise. Timestamps therefore keep rising
//! when physical time stalls or jumps backwards, and they absorb remote
//! timestamps passed in as `ref`.
//!
//! References and physical readings above [`Timestamp::MAX`] are clamped to
//! it, which leaves the logical path room for 2^63 further ticks.
//!
//! [`SharedClock`] is the variant for concurrent producers: the last value
//! lives in an `AtomicU64` and every tick is a compare-and-swap retry loop.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Totally ordered causal timestamp (physical milliseconds plus logical
/// increments).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);
    /// Largest value a tick adopts from time or a reference.
    pub const MAX: Timestamp = Timestamp(u64::MAX >> 1);

    pub fn new(value: u64) -> Self {
        Timestamp(value)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Timestamp(value)
    }
}

/// Source of physical time in milliseconds.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> u64;
}

/// Wall-clock time from the system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Manually driven time, for tests and simulations.
#[derive(Clone, Debug, Default)]
pub struct ManualTimeSource {
    now: Arc<AtomicU64>,
}

impl ManualTimeSource {
    pub fn new(start: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start)),
        }
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: u64) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

fn next_after(last: u64, now: u64, reference: Option<Timestamp>) -> u64 {
    let candidate = now
        .max(reference.map_or(0, Timestamp::as_u64))
        .min(Timestamp::MAX.0);
    if candidate > last {
        candidate
    } else {
        last.saturating_add(1)
    }
}

/// Single-owner hybrid clock.
#[derive(Clone, Debug)]
pub struct HybridClock<T: TimeSource = SystemTimeSource> {
    last: u64,
    source: T,
}

impl HybridClock<SystemTimeSource> {
    pub fn new() -> Self {
        Self::with_source(SystemTimeSource)
    }
}

impl Default for HybridClock<SystemTimeSource> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeSource> HybridClock<T> {
    pub fn with_source(source: T) -> Self {
        Self { last: 0, source }
    }

    /// Issue the next timestamp, optionally absorbing a remote one.
    pub fn tick(&mut self, reference: Option<Timestamp>) -> Timestamp {
        self.last = next_after(self.last, self.source.now(), reference);
        Timestamp(self.last)
    }

    /// The last issued timestamp.
    pub fn last(&self) -> Timestamp {
        Timestamp(self.last)
    }
}

/// Hybrid clock safe to share between threads.
///
/// Clones share the same cell, so every clone observes one strictly
/// increasing sequence.
pub struct SharedClock<T: TimeSource = SystemTimeSource> {
    cell: Arc<AtomicU64>,
    source: Arc<T>,
}

impl SharedClock<SystemTimeSource> {
    pub fn new() -> Self {
        Self::with_source(SystemTimeSource)
    }
}

impl Default for SharedClock<SystemTimeSource> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeSource> Clone for SharedClock<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            source: Arc::clone(&self.source),
        }
    }
}

impl<T: TimeSource> fmt::Debug for SharedClock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedClock")
            .field("last", &self.cell.load(Ordering::Acquire))
            .finish()
    }
}

impl<T: TimeSource> SharedClock<T> {
    pub fn with_source(source: T) -> Self {
        Self::from_cell(Arc::new(AtomicU64::new(0)), source)
    }

    /// Adopt an existing counter cell, e.g. one shared with another clock.
    pub fn from_cell(cell: Arc<AtomicU64>, source: T) -> Self {
        Self {
            cell,
            source: Arc::new(source),
        }
    }

    /// The shared counter cell.
    pub fn cell(&self) -> &Arc<AtomicU64> {
        &self.cell
    }

    /// Issue the next timestamp, optionally absorbing a remote one.
    ///
    /// Never blocks; contention only costs another compare-and-swap round.
    pub fn tick(&self, reference: Option<Timestamp>) -> Timestamp {
        let mut last = self.cell.load(Ordering::Acquire);
        loop {
            let candidate = next_after(last, self.source.now(), reference);
            match self.cell.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Timestamp(candidate),
                Err(actual) => last = actual,
            }
        }
    }

    /// The last issued timestamp.
    pub fn last(&self) -> Timestamp {
        Timestamp(self.cell.load(Ordering::Acquire))
    }
}
