use std::fmt;

use serde::{Deserialize, Serialize};

use crate::staging::StagingSlot;

/// Identifier of the transaction a hold runs under.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxnId(pub u64);

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxnId({})", self.0)
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn-{}", self.0)
    }
}

/// Per-thread state handed to every hold.
///
/// Owns the thread's [`StagingSlot`] and the transaction currently active on
/// the thread. Without an active transaction the holder is treated as a
/// rebuild or maintenance path and the sync-epoch gate is skipped.
#[derive(Debug, Default)]
pub struct HoldContext {
    pub(crate) staging: StagingSlot,
    txn: Option<TxnId>,
}

impl HoldContext {
    /// A context with no active transaction.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_txn(txn: TxnId) -> Self {
        Self {
            staging: StagingSlot::new(),
            txn: Some(txn),
        }
    }

    pub fn set_txn(&mut self, txn: TxnId) {
        self.txn = Some(txn);
    }

    pub fn clear_txn(&mut self) {
        self.txn = None;
    }

    pub fn active_txn(&self) -> Option<TxnId> {
        self.txn
    }

    pub fn staging_is_empty(&self) -> bool {
        self.staging.is_empty()
    }
}
