use std::sync::atomic::{AtomicU64, Ordering};

use pmobj_types::{ContainerId, Epoch, UnitOid};

use crate::ilog::IlogRoot;

/// On-media index record of one object.
///
/// Shared as `Arc<DurableRecord>` between the index and every handle that
/// resolved it. The record address never changes once allocated.
#[derive(Debug)]
pub struct DurableRecord {
    container: ContainerId,
    oid: UnitOid,
    /// Epoch the record was allocated at.
    allocated_at: Epoch,
    /// Highest epoch the object has been synced at.
    sync: AtomicU64,
    ilog: IlogRoot,
}

impl DurableRecord {
    pub fn new(container: ContainerId, oid: UnitOid, allocated_at: Epoch) -> Self {
        Self {
            container,
            oid,
            allocated_at,
            sync: AtomicU64::new(0),
            ilog: IlogRoot::new(),
        }
    }

    pub fn container(&self) -> ContainerId {
        self.container
    }

    pub fn oid(&self) -> UnitOid {
        self.oid
    }

    pub fn allocated_at(&self) -> Epoch {
        self.allocated_at
    }

    pub fn sync_epoch(&self) -> Epoch {
        Epoch::new(self.sync.load(Ordering::Acquire))
    }

    /// Raise the sync epoch to `epoch` if higher. Returns the resulting value.
    pub fn raise_sync(&self, epoch: Epoch) -> Epoch {
        let prev = self.sync.fetch_max(epoch.get(), Ordering::AcqRel);
        Epoch::new(prev.max(epoch.get()))
    }

    pub fn ilog(&self) -> &IlogRoot {
        &self.ilog
    }
}
