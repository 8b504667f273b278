use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use pmobj_types::{ContainerId, Epoch, EpochRange, UnitOid};

use crate::error::{IlogError, IlogResult, StoreError, StoreResult};
use crate::ilog::{IlogCond, IlogEntry, IlogEvent, IlogInfo, IlogRoot};
use crate::record::DurableRecord;
use crate::traits::{DurableIndex, IncarnationLog};

/// In-memory, HashMap-based object index.
///
/// Intended for tests and embedding. Optionally bounded: once `limit`
/// records exist, allocation fails with [`StoreError::NoSpace`].
pub struct InMemoryDurableIndex {
    records: RwLock<HashMap<(ContainerId, UnitOid), Arc<DurableRecord>>>,
    limit: Option<usize>,
    finds: AtomicU64,
    allocs: AtomicU64,
}

impl InMemoryDurableIndex {
    /// Create an unbounded index.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            limit: None,
            finds: AtomicU64::new(0),
            allocs: AtomicU64::new(0),
        }
    }

    /// Create an index that holds at most `limit` records.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new()
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Number of `find` calls served.
    pub fn find_count(&self) -> u64 {
        self.finds.load(Ordering::Relaxed)
    }

    /// Number of records actually allocated.
    pub fn alloc_count(&self) -> u64 {
        self.allocs.load(Ordering::Relaxed)
    }

    /// Drop every record of `container`.
    pub fn destroy_container(&self, container: ContainerId) -> usize {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|(cont, _), _| *cont != container);
        before - records.len()
    }
}

impl Default for InMemoryDurableIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl DurableIndex for InMemoryDurableIndex {
    fn find(
        &self,
        container: ContainerId,
        oid: UnitOid,
    ) -> StoreResult<Option<Arc<DurableRecord>>> {
        self.finds.fetch_add(1, Ordering::Relaxed);
        Ok(self.records.read().get(&(container, oid)).cloned())
    }

    fn allocate(
        &self,
        container: ContainerId,
        oid: UnitOid,
        epoch: Epoch,
    ) -> StoreResult<Arc<DurableRecord>> {
        let mut records = self.records.write();
        if let Some(existing) = records.get(&(container, oid)) {
            return Ok(Arc::clone(existing));
        }
        if self.limit.is_some_and(|limit| records.len() >= limit) {
            return Err(StoreError::NoSpace { container, oid });
        }
        let record = Arc::new(DurableRecord::new(container, oid, epoch));
        records.insert((container, oid), Arc::clone(&record));
        self.allocs.fetch_add(1, Ordering::Relaxed);
        debug!(%container, %oid, %epoch, "allocated durable record");
        Ok(record)
    }
}

impl std::fmt::Debug for InMemoryDurableIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDurableIndex")
            .field("record_count", &self.len())
            .field("limit", &self.limit)
            .finish()
    }
}

/// Incarnation log engine over [`IlogRoot`] entry lists.
///
/// Updates are committed immediately; prepared entries only appear when a
/// caller inserts them into a root directly.
#[derive(Debug, Default)]
pub struct InMemoryIncarnationLog;

impl InMemoryIncarnationLog {
    pub fn new() -> Self {
        Self
    }
}

impl IncarnationLog for InMemoryIncarnationLog {
    fn fetch(
        &self,
        info: &mut IlogInfo,
        log: &IlogRoot,
        epoch: Epoch,
        bound: Epoch,
        visible_only: bool,
    ) -> IlogResult<()> {
        let bound = bound.max(epoch);
        info.epoch = Some(epoch);
        info.bound = bound;
        info.entries = log
            .snapshot()
            .into_iter()
            .filter(|e| e.epoch <= bound && (e.committed || !visible_only))
            .collect();

        if info.entries.iter().any(|e| e.epoch <= epoch) {
            Ok(())
        } else {
            trace!(%epoch, %bound, "no incarnation at or below epoch");
            Err(IlogError::NotFound)
        }
    }

    fn update(
        &self,
        container: ContainerId,
        log: &IlogRoot,
        epr: EpochRange,
        bound: Epoch,
        cond: IlogCond,
    ) -> IlogResult<()> {
        let entries = log.snapshot();

        if let Some(conflict) = entries
            .iter()
            .find(|e| e.epoch > epr.hi && e.epoch <= bound)
        {
            return Err(IlogError::Restart {
                epoch: epr.hi,
                conflict: conflict.epoch,
            });
        }

        let exists_now = entries
            .iter()
            .any(|e| e.epoch == epr.hi && e.event == IlogEvent::Create);
        let prior_visible = entries
            .iter()
            .rev()
            .find(|e| e.epoch < epr.hi)
            .is_some_and(|e| e.event == IlogEvent::Create);

        if exists_now || prior_visible {
            if !exists_now {
                log.insert(IlogEntry::committed(epr.hi, IlogEvent::Create));
            }
            return Ok(());
        }

        if cond.contains(IlogCond::UPDATE) {
            debug!(%container, epoch = %epr.hi, "conditional update of absent object");
            return Err(IlogError::NotFound);
        }
        log.insert(IlogEntry::committed(epr.hi, IlogEvent::Create));
        Err(IlogError::NotFound)
    }

    fn check(
        &self,
        info: &IlogInfo,
        epr_query: EpochRange,
        epr_check: EpochRange,
        visible_only: bool,
    ) -> IlogResult<()> {
        let visible = info
            .latest_committed(epr_query.hi)
            .is_some_and(|e| e.event == IlogEvent::Create);
        if visible {
            return Ok(());
        }
        if !visible_only
            && info
                .entries
                .iter()
                .any(|e| e.committed && e.event == IlogEvent::Create && epr_check.contains(e.epoch))
        {
            return Ok(());
        }
        Err(IlogError::NotFound)
    }
}
