use bitflags::bitflags;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use pmobj_types::Epoch;

/// Kind of event recorded in an incarnation log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IlogEvent {
    /// The object (re)comes into existence at this epoch.
    Create,
    /// The object is punched (logically removed) at this epoch.
    Punch,
}

/// One epoch-stamped event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IlogEntry {
    pub epoch: Epoch,
    pub event: IlogEvent,
    /// `false` while the writing transaction is still in flight.
    pub committed: bool,
}

impl IlogEntry {
    pub fn committed(epoch: impl Into<Epoch>, event: IlogEvent) -> Self {
        Self {
            epoch: epoch.into(),
            event,
            committed: true,
        }
    }

    pub fn prepared(epoch: impl Into<Epoch>, event: IlogEvent) -> Self {
        Self {
            epoch: epoch.into(),
            event,
            committed: false,
        }
    }
}

bitflags! {
    /// Conditions attached to an incarnation log update.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct IlogCond: u32 {
        /// The object must already be visible; report `NotFound` otherwise
        /// and record nothing.
        const UPDATE = 0b0001;
    }
}

/// Root of one object's incarnation log, embedded in its durable record.
///
/// Entries are kept sorted by epoch.
#[derive(Debug, Default)]
pub struct IlogRoot {
    entries: RwLock<Vec<IlogEntry>>,
}

impl IlogRoot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an event in epoch order. An event already present at the same
    /// epoch with the same kind is updated in place (its commit state).
    pub fn insert(&self, entry: IlogEntry) {
        let mut entries = self.entries.write();
        if let Some(existing) = entries
            .iter_mut()
            .find(|e| e.epoch == entry.epoch && e.event == entry.event)
        {
            existing.committed = entry.committed;
            return;
        }
        let pos = entries.partition_point(|e| e.epoch <= entry.epoch);
        entries.insert(pos, entry);
    }

    /// Mark every prepared event at `epoch` as committed.
    pub fn commit(&self, epoch: Epoch) -> usize {
        let mut entries = self.entries.write();
        let mut count = 0;
        for entry in entries.iter_mut().filter(|e| e.epoch == epoch && !e.committed) {
            entry.committed = true;
            count += 1;
        }
        count
    }

    /// Drop every event in `[lo, hi]`. Used by discard.
    pub fn remove_range(&self, lo: Epoch, hi: Epoch) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.epoch < lo || e.epoch > hi);
        before - entries.len()
    }

    pub fn snapshot(&self) -> Vec<IlogEntry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Cached result of an incarnation log fetch.
///
/// Filled by [`IncarnationLog::fetch`](crate::IncarnationLog::fetch), kept on
/// the object handle and cleared whenever the log changes structurally.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IlogInfo {
    /// Epoch the log was fetched at; `None` until the first fetch.
    pub epoch: Option<Epoch>,
    /// Uncertainty bound of the fetch.
    pub bound: Epoch,
    /// Events with epoch `<= bound`, in epoch order.
    pub entries: Vec<IlogEntry>,
}

impl IlogInfo {
    pub fn is_fetched(&self) -> bool {
        self.epoch.is_some()
    }

    /// Reset to the unfetched state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Latest committed event at or below `epoch`.
    pub fn latest_committed(&self, epoch: Epoch) -> Option<&IlogEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.committed && e.epoch <= epoch)
    }

    /// Earliest event that makes a read at `epoch` with uncertainty `bound`
    /// indeterminate: an event in `(epoch, bound]`, or a prepared event at
    /// or below `epoch`.
    pub fn uncertain_epoch(&self, epoch: Epoch, bound: Epoch) -> Option<Epoch> {
        self.entries
            .iter()
            .filter(|e| (e.epoch > epoch && e.epoch <= bound) || (!e.committed && e.epoch <= epoch))
            .map(|e| e.epoch)
            .min()
    }
}
