//! Durable state resolution for a hold.
//!
//! Works on any [`ObjectHandle`], cached or staged. No handle lock is held
//! across a collaborator call; anything decided before such a call is
//! re-checked after it.

use std::sync::Arc;

use tracing::{debug, info};

use pmobj_store::{DurableIndex, DurableRecord, IlogError, IlogInfo, IncarnationLog};
use pmobj_types::{Epoch, EpochRange};

use crate::context::TxnId;
use crate::error::{ObjError, ObjResult};
use crate::flags::{HoldFlags, HoldRequest, Intent};
use crate::handle::{Incarnating, ObjectHandle};

pub(crate) struct Resolver<'a> {
    pub(crate) index: &'a dyn DurableIndex,
    pub(crate) ilog: &'a dyn IncarnationLog,
}

impl Resolver<'_> {
    /// The handle's durable record, looked up in the index if the handle is
    /// not resolved yet. `Ok(None)` if the object has no record.
    pub(crate) fn resolve_record(
        &self,
        handle: &ObjectHandle,
    ) -> ObjResult<Option<Arc<DurableRecord>>> {
        if let Some(record) = handle.state().record.clone() {
            return Ok(Some(record));
        }
        match self.index.find(handle.container().id(), handle.oid())? {
            Some(record) => Ok(Some(handle.state().attach(record))),
            None => Ok(None),
        }
    }

    /// Resolve the record of an existing object, failing with `NotExist`.
    pub(crate) fn require_record(&self, handle: &ObjectHandle) -> ObjResult<Arc<DurableRecord>> {
        self.resolve_record(handle)?.ok_or_else(|| {
            debug!(container = %handle.container().id(), oid = %handle.oid(), "object does not exist");
            ObjError::NotExist { oid: handle.oid() }
        })
    }

    /// Bring the object into existence at `req.epr.hi` for an update or punch.
    ///
    /// Runs against the handle every later hold will find: a discard is
    /// held off from the guard check until the incarnation log is written.
    pub(crate) fn incarnate(
        &self,
        handle: &ObjectHandle,
        req: &HoldRequest,
        txn: Option<TxnId>,
    ) -> ObjResult<Arc<DurableRecord>> {
        let container = handle.container().id();
        let oid = handle.oid();
        let epoch = req.epr.hi;
        let _running = Incarnating::start(handle, req.flags)?;

        let record = match self.resolve_record(handle)? {
            Some(record) => {
                handle.state().admits(req.flags)?;
                record
            }
            None => {
                let record = self.index.allocate(container, oid, epoch)?;
                let mut state = handle.state();
                // Aggregation may have started while the index was allocating.
                state.admits(req.flags)?;
                state.attach(record)
            }
        };

        let sync = {
            let mut state = handle.state();
            state.raise_sync(record.sync_epoch());
            state.sync_epoch
        };
        if let Some(txn) = txn {
            if !sync.is_zero() && epoch <= sync {
                info!(%container, %oid, %epoch, sync_epoch = %sync, %txn, "write at or below sync epoch, restarting");
                return Err(ObjError::TxRestart {
                    epoch,
                    floor: sync,
                });
            }
        }

        if req.intent == Intent::Punch {
            return Ok(record);
        }

        let cond = req.cond.ilog_cond();
        let result = self
            .ilog
            .update(container, record.ilog(), req.epr, req.effective_bound(), cond);
        handle.state().ilog.clear();

        match result {
            Ok(()) => Ok(record),
            Err(IlogError::NotFound) if cond.is_empty() => Ok(record),
            Err(IlogError::NotFound) => {
                debug!(%container, %oid, %epoch, "conditional update of absent object");
                Err(ObjError::NotExist { oid })
            }
            Err(IlogError::Restart { conflict, .. }) => {
                debug!(%container, %oid, %epoch, %conflict, "incarnation log conflict");
                Err(ObjError::TxRestart {
                    epoch,
                    floor: conflict,
                })
            }
            Err(err) => Err(ObjError::Ilog(err)),
        }
    }

    /// Decide whether the object is visible to a read hold.
    ///
    /// Returns `true` if the object is only provisionally visible.
    pub(crate) fn check_visibility(
        &self,
        handle: &ObjectHandle,
        record: &DurableRecord,
        req: &HoldRequest,
    ) -> ObjResult<bool> {
        if req.flags.contains(HoldFlags::DISCARD) {
            return Ok(false);
        }
        let visible_only = req.flags.contains(HoldFlags::VISIBLE_ONLY);
        let epoch = req.epr.hi;
        let bound = req.effective_bound();
        let oid = handle.oid();

        let mut info = IlogInfo::default();
        let fetched = self.ilog.fetch(&mut info, record.ilog(), epoch, bound, false);
        let uncertain = self.ilog.has_uncertainty(&info, epoch, bound);

        let outcome = match fetched {
            Ok(()) => match self.ilog.check(&info, req.epr, req.epr, visible_only) {
                Ok(()) => Ok(false),
                Err(IlogError::NotFound) if uncertain => {
                    debug!(%oid, %epoch, %bound, "object provisionally visible");
                    Ok(true)
                }
                Err(IlogError::NotFound) => Err(ObjError::NotExist { oid }),
                Err(err) => Err(ObjError::Ilog(err)),
            },
            Err(IlogError::NotFound) if uncertain => Err(ObjError::Uncertain { epoch, bound }),
            Err(IlogError::NotFound) => Err(ObjError::NotExist { oid }),
            Err(err) => Err(ObjError::Ilog(err)),
        };
        if let Err(ObjError::NotExist { .. }) = &outcome {
            debug!(%oid, %epoch, "object not visible");
        }
        handle.state().ilog = info;
        outcome
    }

    /// Second phase of a provisional read: settle visibility at `epoch`.
    pub(crate) fn settle(
        &self,
        handle: &ObjectHandle,
        record: &DurableRecord,
        epoch: Epoch,
        bound: Epoch,
    ) -> ObjResult<()> {
        let bound = bound.max(epoch);
        let mut info = IlogInfo::default();
        let fetched = self.ilog.fetch(&mut info, record.ilog(), epoch, bound, false);
        let outcome = if self.ilog.has_uncertainty(&info, epoch, bound) {
            Err(ObjError::Uncertain { epoch, bound })
        } else {
            let epr = EpochRange::up_to(epoch);
            match fetched.and_then(|()| self.ilog.check(&info, epr, epr, true)) {
                Ok(()) => Ok(()),
                Err(IlogError::NotFound) => Err(ObjError::NotExist { oid: handle.oid() }),
                Err(err) => Err(ObjError::Ilog(err)),
            }
        };
        handle.state().ilog = info;
        outcome
    }
}
