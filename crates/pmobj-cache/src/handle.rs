use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use pmobj_lru::Keyed;
use pmobj_store::{DurableRecord, IlogInfo};
use pmobj_types::{Epoch, UnitOid};

use crate::error::{ObjError, ObjResult};
use crate::flags::HoldFlags;
use crate::guard::{conflict_error, may_proceed, Maintenance};
use crate::pool::Container;

/// Identity of a cached object: the container instance plus the oid.
///
/// Two keys are equal only if they name the same open container (pointer
/// identity) and the same oid, layout version included.
#[derive(Clone)]
pub struct ObjectKey {
    container: Arc<Container>,
    oid: UnitOid,
}

impl ObjectKey {
    pub fn new(container: Arc<Container>, oid: UnitOid) -> Self {
        Self { container, oid }
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn oid(&self) -> UnitOid {
        self.oid
    }
}

impl PartialEq for ObjectKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.container, &other.container) && self.oid == other.oid
    }
}

impl Eq for ObjectKey {}

impl Hash for ObjectKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.container.id().hash(state);
        self.oid.hash(state);
    }
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({}/{})", self.container.id().short_id(), self.oid)
    }
}

/// Mutable part of a handle.
#[derive(Debug, Default)]
pub(crate) struct HandleState {
    /// `None` until resolved against the object index.
    pub(crate) record: Option<Arc<DurableRecord>>,
    pub(crate) sync_epoch: Epoch,
    pub(crate) ilog: IlogInfo,
    pub(crate) maintenance: Maintenance,
    /// Incarnations running against the durable state. A discard may not
    /// start while any is in flight.
    pub(crate) incarnating: u32,
    pub(crate) zombie: bool,
    /// No longer the cached handle of its identity.
    pub(crate) detached: bool,
}

impl HandleState {
    /// Attach `record` unless one is already attached. Never replaces.
    pub(crate) fn attach(&mut self, record: Arc<DurableRecord>) -> Arc<DurableRecord> {
        match &self.record {
            Some(existing) => Arc::clone(existing),
            None => {
                self.sync_epoch = self.sync_epoch.max(record.sync_epoch());
                self.record = Some(Arc::clone(&record));
                record
            }
        }
    }

    pub(crate) fn raise_sync(&mut self, epoch: Epoch) {
        self.sync_epoch = self.sync_epoch.max(epoch);
    }

    /// Conflict check of a request with `requested` against this handle.
    ///
    /// Structural work on a detached handle fails with `Again`: the retry
    /// finds the handle that is cached now.
    pub(crate) fn admits(&self, requested: HoldFlags) -> ObjResult<()> {
        let structural = HoldFlags::CREATE | HoldFlags::DISCARD | HoldFlags::AGGREGATE;
        if self.detached && requested.intersects(structural) {
            return Err(ObjError::Again);
        }
        if !may_proceed(self.maintenance, requested) {
            return Err(conflict_error(requested));
        }
        if requested.contains(HoldFlags::DISCARD) && self.incarnating > 0 {
            debug!(incarnating = self.incarnating, "discard waits for incarnation");
            return Err(conflict_error(requested));
        }
        Ok(())
    }

    /// Record the maintenance operation of an admitted request.
    pub(crate) fn begin(&mut self, requested: HoldFlags) -> ObjResult<()> {
        self.admits(requested)?;
        self.maintenance = self.maintenance.begin(requested)?;
        Ok(())
    }

    /// Another context relies on this handle staying findable: it runs
    /// maintenance or an incarnation on it.
    pub(crate) fn is_busy(&self) -> bool {
        !self.maintenance.is_idle() || self.incarnating > 0
    }
}

/// An incarnation in flight on a handle. Ends on drop.
pub(crate) struct Incarnating<'a> {
    handle: &'a ObjectHandle,
}

impl<'a> Incarnating<'a> {
    /// Start an incarnation for `requested` unless the guard rejects it.
    pub(crate) fn start(handle: &'a ObjectHandle, requested: HoldFlags) -> ObjResult<Self> {
        let mut state = handle.state();
        if state.zombie {
            return Err(ObjError::Again);
        }
        state.admits(requested)?;
        state.incarnating += 1;
        Ok(Self { handle })
    }
}

impl Drop for Incarnating<'_> {
    fn drop(&mut self) {
        let mut state = self.handle.state();
        state.incarnating = state.incarnating.saturating_sub(1);
    }
}

/// In-memory handle to one object.
///
/// Lives either in the cache (shared through [`ObjectRef`]s) or in a
/// context's staging slot. Dropping it releases the container reference and
/// the cached incarnation log state.
pub struct ObjectHandle {
    key: ObjectKey,
    state: Mutex<HandleState>,
}

impl ObjectHandle {
    pub(crate) fn new(key: ObjectKey) -> Self {
        trace!(key = ?key, "object handle initialised");
        Self {
            key,
            state: Mutex::new(HandleState::default()),
        }
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.key.container
    }

    pub fn oid(&self) -> UnitOid {
        self.key.oid
    }

    /// The resolved durable record, if any.
    pub fn record(&self) -> Option<Arc<DurableRecord>> {
        self.state.lock().record.clone()
    }

    pub fn sync_epoch(&self) -> Epoch {
        self.state.lock().sync_epoch
    }

    pub fn maintenance(&self) -> Maintenance {
        self.state.lock().maintenance
    }

    pub fn is_zombie(&self) -> bool {
        self.state.lock().zombie
    }

    /// Copy of the cached incarnation log fetch.
    pub fn ilog_info(&self) -> IlogInfo {
        self.state.lock().ilog.clone()
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock()
    }
}

impl Keyed for ObjectHandle {
    type Key = ObjectKey;

    fn key(&self) -> &ObjectKey {
        &self.key
    }
}

impl Drop for ObjectHandle {
    fn drop(&mut self) {
        trace!(key = ?self.key, "object handle freed");
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ObjectHandle")
            .field("key", &self.key)
            .field("resolved", &state.record.is_some())
            .field("sync_epoch", &state.sync_epoch)
            .field("maintenance", &state.maintenance)
            .field("zombie", &state.zombie)
            .field("detached", &state.detached)
            .finish()
    }
}

/// One successful hold on a cached object.
///
/// Must be handed back through [`ObjectCache::release`](crate::ObjectCache::release).
#[must_use = "a held object must be released"]
pub struct ObjectRef {
    handle: Arc<ObjectHandle>,
    provisional: bool,
}

impl ObjectRef {
    pub(crate) fn new(handle: Arc<ObjectHandle>, provisional: bool) -> Self {
        Self {
            handle,
            provisional,
        }
    }

    /// `true` if the object was not visible but a concurrent transaction
    /// may still make it so. The caller must run
    /// [`ObjectCache::check_uncertainty`](crate::ObjectCache::check_uncertainty)
    /// before relying on the object.
    pub fn is_provisional(&self) -> bool {
        self.provisional
    }

    pub fn handle(&self) -> &Arc<ObjectHandle> {
        &self.handle
    }

    /// Whether two refs point at the same handle instance.
    pub fn ptr_eq(a: &ObjectRef, b: &ObjectRef) -> bool {
        Arc::ptr_eq(&a.handle, &b.handle)
    }

    pub(crate) fn into_handle(self) -> Arc<ObjectHandle> {
        self.handle
    }
}

impl Deref for ObjectRef {
    type Target = ObjectHandle;

    fn deref(&self) -> &ObjectHandle {
        &self.handle
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("handle", &self.handle)
            .field("provisional", &self.provisional)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Pool;
    use pmobj_types::{ContainerId, PoolId};
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(key: &ObjectKey) -> u64 {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        h.finish()
    }

    #[test]
    fn key_equality_requires_same_container_instance() {
        let pool = Pool::new(PoolId::generate());
        let id = ContainerId::generate();
        let c1 = Container::open(&pool, id);
        let c2 = Container::open(&pool, id);
        let oid = UnitOid::from_lo(42);

        let a = ObjectKey::new(Arc::clone(&c1), oid);
        let b = ObjectKey::new(Arc::clone(&c1), oid);
        let other_instance = ObjectKey::new(c2, oid);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, other_instance);
        assert_ne!(a, ObjectKey::new(c1, oid.with_layout(1)));
    }

    #[test]
    fn attach_never_replaces_record() {
        let pool = Pool::new(PoolId::generate());
        let cont = Container::open(&pool, ContainerId::generate());
        let oid = UnitOid::from_lo(1);
        let first = Arc::new(DurableRecord::new(cont.id(), oid, Epoch::new(1)));
        first.raise_sync(Epoch::new(4));
        let second = Arc::new(DurableRecord::new(cont.id(), oid, Epoch::new(2)));

        let mut state = HandleState::default();
        let kept = state.attach(Arc::clone(&first));
        assert!(Arc::ptr_eq(&kept, &first));
        assert_eq!(state.sync_epoch, Epoch::new(4));
        let kept = state.attach(second);
        assert!(Arc::ptr_eq(&kept, &first));
    }

    #[test]
    fn handle_holds_container_reference() {
        let pool = Pool::new(PoolId::generate());
        let cont = Container::open(&pool, ContainerId::generate());
        let handle = ObjectHandle::new(ObjectKey::new(Arc::clone(&cont), UnitOid::from_lo(7)));
        assert_eq!(Arc::strong_count(&cont), 2);
        assert!(handle.record().is_none());
        assert!(handle.maintenance().is_idle());
        drop(handle);
        assert_eq!(Arc::strong_count(&cont), 1);
    }

    #[test]
    fn incarnation_in_flight_holds_off_discard() {
        let pool = Pool::new(PoolId::generate());
        let cont = Container::open(&pool, ContainerId::generate());
        let handle = ObjectHandle::new(ObjectKey::new(cont, UnitOid::from_lo(3)));

        let running = Incarnating::start(&handle, HoldFlags::CREATE).unwrap();
        assert!(handle.state().is_busy());
        assert_eq!(
            handle.state().begin(HoldFlags::DISCARD),
            Err(ObjError::Busy)
        );
        // Aggregation and further creates interleave with it.
        let second = Incarnating::start(&handle, HoldFlags::CREATE).unwrap();
        assert!(handle.state().admits(HoldFlags::AGGREGATE).is_ok());
        drop(second);
        drop(running);

        assert!(!handle.state().is_busy());
        handle.state().begin(HoldFlags::DISCARD).unwrap();
        assert_eq!(handle.maintenance(), Maintenance::Discarding);
        assert_eq!(
            Incarnating::start(&handle, HoldFlags::CREATE).err(),
            Some(ObjError::UpdateAgain)
        );
    }
}
