use std::sync::Arc;

use tracing::{debug, info, warn};

use pmobj_lru::{LruCache, LruStats};
use pmobj_store::{DurableIndex, IncarnationLog};
use pmobj_types::{Epoch, UnitOid};

use crate::config::CacheConfig;
use crate::context::{HoldContext, TxnId};
use crate::error::{ConfigError, ObjError, ObjResult};
use crate::flags::{HoldFlags, HoldRequest, Intent};
use crate::handle::{ObjectHandle, ObjectKey, ObjectRef};
use crate::pool::Container;
use crate::resolver::Resolver;

/// Object cache of one pool.
///
/// Shared by every execution context of the pool (`Send + Sync`); each
/// context brings its own [`HoldContext`].
pub struct ObjectCache {
    lru: LruCache<ObjectHandle>,
    index: Arc<dyn DurableIndex>,
    ilog: Arc<dyn IncarnationLog>,
    config: CacheConfig,
}

impl ObjectCache {
    /// Create a cache over the given durable collaborators.
    pub fn new(
        config: CacheConfig,
        index: Arc<dyn DurableIndex>,
        ilog: Arc<dyn IncarnationLog>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(capacity = config.capacity(), "object cache created");
        Ok(Self {
            lru: LruCache::with_capacity_bits(config.capacity_bits),
            index,
            ilog,
            config,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Number of cached handles, referenced or idle.
    pub fn len(&self) -> usize {
        self.lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    /// Backing store counters. `entries` is the number of live cached objects.
    pub fn stats(&self) -> LruStats {
        self.lru.stats()
    }

    fn resolver(&self) -> Resolver<'_> {
        Resolver {
            index: self.index.as_ref(),
            ilog: self.ilog.as_ref(),
        }
    }

    // -----------------------------------------------------------------------
    // Hold / release
    // -----------------------------------------------------------------------

    /// Hold the object `req.oid` of `container`.
    ///
    /// On a cache miss the object is looked up in the context's staging
    /// slot. A lookup only enters the cache if the hold succeeds. A create
    /// is promoted before it changes any durable state, so the guard sees
    /// every maintenance operation on the object. The returned reference
    /// must be handed back through [`release`](Self::release) with the same
    /// flags.
    pub fn hold(
        &self,
        ctx: &mut HoldContext,
        container: &Arc<Container>,
        req: &HoldRequest,
    ) -> ObjResult<ObjectRef> {
        req.validate()?;
        if container.pool().is_dying() {
            debug!(pool = %container.pool().id(), oid = %req.oid, "hold rejected, pool dying");
            return Err(ObjError::Shutdown);
        }

        let key = ObjectKey::new(Arc::clone(container), req.oid);
        match self.lru.hold(&key) {
            Some(handle) => self.hold_cached(ctx.active_txn(), handle, req),
            None => self.hold_staged(ctx, key, req),
        }
    }

    fn hold_cached(
        &self,
        txn: Option<TxnId>,
        handle: Arc<ObjectHandle>,
        req: &HoldRequest,
    ) -> ObjResult<ObjectRef> {
        let result = self
            .prepare(&handle, req, txn)
            .and_then(|provisional| self.admit(&handle, req).map(|()| provisional));
        match result {
            Ok(provisional) => Ok(ObjectRef::new(handle, provisional)),
            Err(err) => {
                self.put_back(handle, self.evict_after(&err));
                Err(err)
            }
        }
    }

    fn hold_staged(
        &self,
        ctx: &mut HoldContext,
        key: ObjectKey,
        req: &HoldRequest,
    ) -> ObjResult<ObjectRef> {
        let txn = ctx.active_txn();
        let staged = ctx.staging.occupy(key)?;
        let result = if req.flags.contains(HoldFlags::CREATE) {
            self.resolver()
                .resolve_record(staged)
                .and_then(|_| self.promote(staged, req))
                .and_then(|handle| self.incarnate_cached(handle, req, txn))
        } else {
            self.prepare(staged, req, txn).and_then(|provisional| {
                self.promote(staged, req)
                    .map(|handle| ObjectRef::new(handle, provisional))
            })
        };
        ctx.staging.reset();
        result
    }

    /// Incarnate a freshly promoted handle for a create hold.
    fn incarnate_cached(
        &self,
        handle: Arc<ObjectHandle>,
        req: &HoldRequest,
        txn: Option<TxnId>,
    ) -> ObjResult<ObjectRef> {
        match self.resolver().incarnate(&handle, req, txn) {
            Ok(_) => Ok(ObjectRef::new(handle, false)),
            Err(err) => {
                self.put_back(handle, self.evict_after(&err));
                Err(err)
            }
        }
    }

    /// Resolve durable state for `req` on `handle`. Returns whether the
    /// object is only provisionally visible.
    fn prepare(
        &self,
        handle: &ObjectHandle,
        req: &HoldRequest,
        txn: Option<TxnId>,
    ) -> ObjResult<bool> {
        {
            let state = handle.state();
            if state.zombie {
                debug!(key = ?handle.key(), "hold on zombie object");
                return Err(ObjError::Again);
            }
            state.admits(req.flags)?;
        }

        let resolver = self.resolver();
        match req.intent {
            Intent::Update | Intent::Punch if req.flags.contains(HoldFlags::CREATE) => {
                resolver.incarnate(handle, req, txn)?;
                Ok(false)
            }
            intent => {
                let record = resolver.require_record(handle)?;
                if intent.skips_visibility() {
                    Ok(false)
                } else {
                    resolver.check_visibility(handle, &record, req)
                }
            }
        }
    }

    /// Record the maintenance operation the hold was made for.
    fn admit(&self, handle: &ObjectHandle, req: &HoldRequest) -> ObjResult<()> {
        let mut state = handle.state();
        if state.zombie {
            return Err(ObjError::Again);
        }
        state.begin(req.flags)
    }

    /// Move a successfully staged handle into the cache.
    ///
    /// The staging slot is left untouched; the caller resets it.
    fn promote(&self, staged: &ObjectHandle, req: &HoldRequest) -> ObjResult<Arc<ObjectHandle>> {
        let cached = self
            .lru
            .hold_or_create(staged.key().clone(), |key| ObjectHandle::new(key.clone()))
            .map_err(|err| {
                warn!(key = ?staged.key(), error = %err, "cannot promote staged object");
                ObjError::ResourceExhausted(err.to_string())
            })?;

        let admitted = {
            let mut from = staged.state();
            let mut to = cached.state();
            if to.zombie {
                Err(ObjError::Again)
            } else {
                to.begin(req.flags).map(|()| {
                    if to.record.is_none() {
                        to.record = from.record.take();
                        to.ilog = std::mem::take(&mut from.ilog);
                    }
                    to.raise_sync(from.sync_epoch);
                    to.zombie |= from.zombie;
                })
            }
        };

        match admitted {
            Ok(()) => {
                debug!(key = ?cached.key(), "staged object promoted");
                Ok(cached)
            }
            Err(err) => {
                self.put_back(cached, self.evict_after(&err));
                Err(err)
            }
        }
    }

    fn evict_after(&self, err: &ObjError) -> bool {
        self.config.evict_on_failure && !err.is_conflict()
    }

    /// Give back one reference to `handle`; with `evict` it leaves the cache.
    ///
    /// A busy handle is only doomed: it stays findable until its last
    /// release, so a new handle never starts without its maintenance state.
    fn put_back(&self, handle: Arc<ObjectHandle>, evict: bool) {
        if !evict {
            self.lru.release(handle, false);
            return;
        }
        let pinned = Arc::clone(&handle);
        let mut state = pinned.state();
        if state.is_busy() {
            debug!(key = ?pinned.key(), maintenance = ?state.maintenance, "eviction deferred to last release");
            self.lru.doom(&handle);
            self.lru.release(handle, false);
        } else {
            state.detached = true;
            self.lru.release(handle, true);
        }
    }

    /// Give back a reference obtained from [`hold`](Self::hold).
    ///
    /// `flags` must be the flags the hold was made with; they end the
    /// maintenance operation the hold started. With `evict` the handle
    /// leaves the cache and the next hold resolves the object afresh, or at
    /// its last release if another context still runs maintenance on it.
    pub fn release(&self, obj: ObjectRef, flags: HoldFlags, evict: bool) {
        let handle = obj.into_handle();
        let zombie = {
            let mut state = handle.state();
            state.maintenance = state.maintenance.end(flags);
            state.zombie
        };
        self.put_back(handle, evict || zombie);
    }

    // -----------------------------------------------------------------------
    // Conflict check and eviction
    // -----------------------------------------------------------------------

    /// Whether a request with `flags` on a cached object would conflict.
    ///
    /// Objects that are not cached never conflict. The check does not count
    /// as a cache hit or miss and leaves the LRU order alone.
    pub fn check_conflict(
        &self,
        container: &Arc<Container>,
        oid: UnitOid,
        flags: HoldFlags,
    ) -> ObjResult<()> {
        if container.pool().is_dying() {
            return Err(ObjError::Shutdown);
        }
        let key = ObjectKey::new(Arc::clone(container), oid);
        match self.lru.peek(&key) {
            Some(handle) => {
                let state = handle.state();
                state.admits(flags)
            }
            None => Ok(()),
        }
    }

    /// Evict every unreferenced handle of `container`.
    ///
    /// Referenced handles are evicted at their last release. Returns the
    /// number of handles evicted now.
    pub fn evict(&self, container: &Arc<Container>) -> usize {
        let count = self
            .lru
            .evict_if(|handle| Arc::ptr_eq(handle.container(), container));
        debug!(container = %container.id(), count, "container objects evicted");
        count
    }

    /// Detach a held handle from the cache. Later holds resolve the object
    /// into a new handle.
    ///
    /// A handle busy with maintenance or an incarnation is doomed instead
    /// and leaves the cache at its last release.
    pub fn evict_object(&self, obj: &ObjectRef) -> bool {
        let handle = obj.handle();
        let mut state = handle.state();
        if state.is_busy() {
            self.lru.doom(handle)
        } else {
            let evicted = self.lru.evict(handle);
            state.detached |= evicted;
            evicted
        }
    }

    /// Evict `oid` of `container` if it is cached.
    ///
    /// Returns whether a handle was cached. A handle busy elsewhere leaves
    /// the cache at its last release. Nothing is evicted once the pool is
    /// dying.
    pub fn evict_by_oid(&self, container: &Arc<Container>, oid: UnitOid) -> bool {
        if container.pool().is_dying() {
            debug!(container = %container.id(), %oid, "evict skipped, pool dying");
            return false;
        }
        let key = ObjectKey::new(Arc::clone(container), oid);
        match self.lru.hold(&key) {
            Some(handle) => {
                self.put_back(handle, true);
                debug!(container = %container.id(), %oid, "object evicted");
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Operations on held objects
    // -----------------------------------------------------------------------

    /// Incarnate a held object for an update or punch at `req.epr.hi`.
    ///
    /// For holders that looked the object up without `CREATE` and later
    /// decided to write.
    pub fn incarnate(
        &self,
        ctx: &HoldContext,
        obj: &ObjectRef,
        req: &HoldRequest,
    ) -> ObjResult<()> {
        if !matches!(req.intent, Intent::Update | Intent::Punch) {
            return Err(ObjError::InvalidRequest(format!(
                "incarnation requires update or punch intent, got {:?}",
                req.intent
            )));
        }
        if req.flags.intersects(HoldFlags::AGGREGATE | HoldFlags::DISCARD) {
            return Err(ObjError::InvalidRequest(
                "incarnation cannot carry maintenance flags".into(),
            ));
        }
        if req.oid != obj.oid() {
            return Err(ObjError::InvalidRequest(format!(
                "request for {} on handle of {}",
                req.oid,
                obj.oid()
            )));
        }
        if obj.container().pool().is_dying() {
            return Err(ObjError::Shutdown);
        }

        let req = req.with_flags(req.flags | HoldFlags::CREATE);
        self.resolver()
            .incarnate(obj, &req, ctx.active_txn())
            .map(|_| ())
    }

    /// Raise the sync epoch of a held object. Returns the resulting value.
    pub fn mark_synced(&self, obj: &ObjectRef, epoch: Epoch) -> ObjResult<Epoch> {
        let record = obj
            .record()
            .ok_or(ObjError::NotExist { oid: obj.oid() })?;
        let synced = record.raise_sync(epoch);
        obj.state().raise_sync(synced);
        debug!(key = ?obj.key(), sync_epoch = %synced, "object synced");
        Ok(synced)
    }

    /// Flag a held object for reclamation.
    ///
    /// Every new hold on the handle fails with [`ObjError::Again`]. The
    /// handle leaves the cache at its next release.
    pub fn mark_zombie(&self, obj: &ObjectRef) {
        obj.state().zombie = true;
        info!(key = ?obj.key(), "object marked zombie");
    }

    /// Settle a provisional hold: check visibility at `epoch` again.
    ///
    /// Fails with `Uncertain` while a transaction in `(epoch, bound]`, or an
    /// uncommitted one at or below `epoch`, may still change the answer.
    pub fn check_uncertainty(&self, obj: &ObjectRef, epoch: Epoch, bound: Epoch) -> ObjResult<()> {
        let record = obj
            .record()
            .ok_or(ObjError::NotExist { oid: obj.oid() })?;
        self.resolver().settle(obj, &record, epoch, bound)
    }

    #[cfg(test)]
    pub(crate) fn ref_count(&self, key: &ObjectKey) -> Option<usize> {
        self.lru.ref_count(key)
    }
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("config", &self.config)
            .field("lru", &self.lru)
            .finish()
    }
}
