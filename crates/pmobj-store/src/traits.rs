use std::sync::Arc;

use pmobj_types::{ContainerId, Epoch, EpochRange, UnitOid};

use crate::error::{IlogResult, StoreResult};
use crate::ilog::{IlogCond, IlogInfo, IlogRoot};
use crate::record::DurableRecord;

/// Durable object index: maps an identity to its on-media record.
///
/// Implementations may block on media I/O. Records are shared: every call
/// for the same identity returns the same `Arc<DurableRecord>`.
pub trait DurableIndex: Send + Sync {
    /// Look up the record of `oid` in `container`.
    ///
    /// Returns `Ok(None)` if the object has no durable record.
    fn find(&self, container: ContainerId, oid: UnitOid)
        -> StoreResult<Option<Arc<DurableRecord>>>;

    /// Allocate a record for `oid` at `epoch`.
    ///
    /// Idempotent: if a record already exists it is returned unchanged.
    fn allocate(
        &self,
        container: ContainerId,
        oid: UnitOid,
        epoch: Epoch,
    ) -> StoreResult<Arc<DurableRecord>>;
}

/// Incarnation log engine.
pub trait IncarnationLog: Send + Sync {
    /// Load the events of `log` relevant to a read at `epoch` with
    /// uncertainty `bound` into `info`.
    ///
    /// `info` is filled even when the call fails so that the caller can ask
    /// [`has_uncertainty`](Self::has_uncertainty) about the failure. Fails
    /// with `NotFound` if no event exists at or below `epoch`. With
    /// `visible_only`, prepared (uncommitted) events are left out.
    fn fetch(
        &self,
        info: &mut IlogInfo,
        log: &IlogRoot,
        epoch: Epoch,
        bound: Epoch,
        visible_only: bool,
    ) -> IlogResult<()>;

    /// Record a create event at `epr.hi`.
    ///
    /// Returns `NotFound` if the object had no visible incarnation before
    /// `epr.hi`. Without [`IlogCond::UPDATE`] the event is recorded anyway;
    /// with it nothing is written. Fails with `Restart` if an event lies in
    /// `(epr.hi, bound]`.
    fn update(
        &self,
        container: ContainerId,
        log: &IlogRoot,
        epr: EpochRange,
        bound: Epoch,
        cond: IlogCond,
    ) -> IlogResult<()>;

    /// Decide visibility from a fetched `info`.
    ///
    /// Succeeds if the object is visible at `epr_query.hi`, or, unless
    /// `visible_only` is set, if it was created anywhere inside `epr_check`.
    fn check(
        &self,
        info: &IlogInfo,
        epr_query: EpochRange,
        epr_check: EpochRange,
        visible_only: bool,
    ) -> IlogResult<()>;

    /// Whether a concurrent transaction may still change the answer for a
    /// read at `epoch` with uncertainty `bound`.
    fn has_uncertainty(&self, info: &IlogInfo, epoch: Epoch, bound: Epoch) -> bool {
        info.uncertain_epoch(epoch, bound).is_some()
    }
}
