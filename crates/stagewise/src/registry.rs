//! Pending shutdown entries, grouped by stage.

use crate::notifier::{Entry, EntryKey};
use crate::stage::Stage;
use std::collections::BTreeMap;

/// How far the shutdown sequence has progressed.
///
/// `reached` is the number of the last stage whose entries were taken for
/// dispatch: 0 before any stage ran, 1..=3 while stages run, 4 once done.
/// A stage accepts new entries only while its number is above `reached`.
#[derive(Default)]
pub(crate) struct Registry {
    reached: u8,
    next_id: u64,
    pending: [BTreeMap<u64, Entry>; 3],
}

const DONE: u8 = 4;

impl Registry {
    /// Record an entry for `stage`.
    ///
    /// Returns the entry back if its stage has already been dispatched; the
    /// caller drops it outside the lock.
    pub(crate) fn admit(&mut self, stage: Stage, entry: Entry) -> Result<EntryKey, Entry> {
        if stage.number() <= self.reached {
            return Err(entry);
        }
        let id = self.next_id;
        self.next_id += 1;
        self.pending[stage.index()].insert(id, entry);
        Ok(EntryKey { stage, id })
    }

    /// Remove a pending entry. Returns `None` if it was already dispatched or
    /// cancelled.
    pub(crate) fn cancel(&mut self, key: EntryKey) -> Option<Entry> {
        self.pending[key.stage.index()].remove(&key.id)
    }

    /// Close `stage` for new entries and take everything registered for it,
    /// in registration order.
    pub(crate) fn open(&mut self, stage: Stage) -> Vec<Entry> {
        self.reached = self.reached.max(stage.number());
        std::mem::take(&mut self.pending[stage.index()])
            .into_values()
            .collect()
    }

    /// Mark the sequence finished. Nothing is admitted afterwards.
    ///
    /// Returns anything left pending, which can only happen when a stage was
    /// skipped.
    pub(crate) fn finish(&mut self) -> Vec<Entry> {
        self.reached = DONE;
        self.pending
            .iter_mut()
            .flat_map(|stage| std::mem::take(stage).into_values())
            .collect()
    }

    pub(crate) fn pending(&self, stage: Stage) -> usize {
        self.pending[stage.index()].len()
    }

    /// The last stage taken for dispatch, if any.
    pub(crate) fn reached(&self) -> Option<Stage> {
        match self.reached {
            0 => None,
            1 => Some(Stage::First),
            2 => Some(Stage::Second),
            _ => Some(Stage::Third),
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.reached == DONE
    }
}
