//! Merging events received from peers.
//!
//! Every input yields exactly one [`MergeResult`], in input order and
//! lazily, so a caller can stop early or stream results. A failing item
//! never stops the batch: later items are still attempted, and whatever
//! they depend on decides whether they succeed.

use crate::aggregate::{Aggregate, ReduceOptions};
use cairn_core::{Error, EventId, SortedKv};
use cairn_log::Event;
use tokio_util::sync::CancellationToken;

/// Outcome of merging one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeResult {
    pub id: EventId,
    pub error: Option<Error>,
}

impl MergeResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Counts over a finished merge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub applied: usize,
    pub failed: usize,
}

impl MergeSummary {
    pub fn record(&mut self, result: &MergeResult) {
        if result.is_ok() {
            self.applied += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.applied + self.failed
    }
}

impl FromIterator<MergeResult> for MergeSummary {
    fn from_iter<I: IntoIterator<Item = MergeResult>>(iter: I) -> Self {
        let mut summary = MergeSummary::default();
        for result in iter {
            summary.record(&result);
        }
        summary
    }
}

impl<K: SortedKv> Aggregate<K> {
    /// Merge `(claimed id, event)` pairs into this aggregate.
    ///
    /// Once `token` is cancelled every remaining item yields
    /// [`Error::Aborted`]; results already produced stand.
    pub fn merge<'a, I>(
        &'a self,
        events: I,
        token: &'a CancellationToken,
    ) -> impl Iterator<Item = MergeResult> + 'a
    where
        I: IntoIterator<Item = (EventId, Event)>,
        I::IntoIter: 'a,
    {
        events.into_iter().map(move |(id, event)| {
            let outcome = if token.is_cancelled() {
                Err(Error::Aborted)
            } else {
                self.merge_one(&id, &event)
            };

            match outcome {
                Ok(()) => MergeResult { id, error: None },
                Err(error) => {
                    tracing::warn!(id = %id.short(), code = error.code(), %error, "rejected merge item");
                    MergeResult {
                        id,
                        error: Some(error),
                    }
                }
            }
        })
    }

    fn merge_one(&self, id: &EventId, event: &Event) -> cairn_core::Result<()> {
        self.store().codec().verify(id, event)?;
        self.reduce(event, ReduceOptions::default())?;
        Ok(())
    }
}
