//! End-to-end hold/release behaviour over the in-memory backends.

use std::sync::Arc;

use pmobj_cache::{
    CacheConfig, CondFlags, Container, HoldContext, HoldFlags, HoldRequest, Maintenance,
    ObjError, ObjectCache, ObjectRef, Pool, TxnId,
};
use pmobj_store::{
    DurableIndex, IlogEntry, IlogEvent, InMemoryDurableIndex, InMemoryIncarnationLog,
};
use pmobj_types::{ContainerId, Epoch, EpochRange, PoolId, UnitOid};

struct Harness {
    cache: ObjectCache,
    index: Arc<InMemoryDurableIndex>,
    pool: Arc<Pool>,
    container: Arc<Container>,
}

impl Harness {
    fn new() -> Self {
        Self::with(CacheConfig::with_capacity_bits(6), InMemoryDurableIndex::new())
    }

    fn with(config: CacheConfig, index: InMemoryDurableIndex) -> Self {
        let index = Arc::new(index);
        let cache = ObjectCache::new(
            config,
            Arc::clone(&index) as Arc<dyn DurableIndex>,
            Arc::new(InMemoryIncarnationLog::new()),
        )
        .expect("valid config");
        let pool = Pool::new(PoolId::generate());
        let container = Container::open(&pool, ContainerId::generate());
        Self {
            cache,
            index,
            pool,
            container,
        }
    }

    fn hold(&self, ctx: &mut HoldContext, req: &HoldRequest) -> Result<ObjectRef, ObjError> {
        self.cache.hold(ctx, &self.container, req)
    }

    fn create(&self, lo: u64, epoch: u64) {
        let mut ctx = HoldContext::new();
        let req = HoldRequest::update(oid(lo), epoch);
        let obj = self.hold(&mut ctx, &req).expect("create");
        self.cache.release(obj, req.flags, false);
    }
}

fn oid(lo: u64) -> UnitOid {
    UnitOid::from_lo(lo)
}

fn range(lo: u64, hi: u64) -> EpochRange {
    EpochRange::new(lo, hi).expect("ordered range")
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn create_on_empty_cache() {
    let h = Harness::new();
    let mut ctx = HoldContext::with_txn(TxnId(1));
    let req = HoldRequest::update(oid(1), 10u64);
    let obj = h.hold(&mut ctx, &req).unwrap();

    assert_eq!(h.cache.len(), 1);
    assert!(obj.record().is_some());
    assert_eq!(h.index.len(), 1);
    assert!(ctx.staging_is_empty());
    h.cache.release(obj, req.flags, false);
    assert_eq!(h.cache.stats().idle, 1);
}

#[test]
fn create_during_discard_is_rejected() {
    let h = Harness::new();
    h.create(1, 5);
    let mut ctx = HoldContext::new();
    let disc = HoldRequest::discard(oid(1), range(1, 5));
    let discarding = h.hold(&mut ctx, &disc).unwrap();
    assert_eq!(discarding.maintenance(), Maintenance::Discarding);

    let before = h.cache.stats();
    let mut other = HoldContext::with_txn(TxnId(2));
    let err = h
        .hold(&mut other, &HoldRequest::update(oid(1), 20u64))
        .unwrap_err();
    assert_eq!(err, ObjError::UpdateAgain);
    assert!(err.is_retryable());
    assert_eq!(h.cache.len(), before.entries);
    assert!(other.staging_is_empty());

    h.cache.release(discarding, disc.flags, false);
    let obj = h
        .hold(&mut other, &HoldRequest::update(oid(1), 20u64))
        .expect("discard finished");
    h.cache.release(obj, HoldFlags::CREATE, false);
}

#[test]
fn write_below_sync_epoch_restarts() {
    let h = Harness::new();
    let mut ctx = HoldContext::with_txn(TxnId(7));
    let req = HoldRequest::update(oid(1), 10u64);
    let obj = h.hold(&mut ctx, &req).unwrap();
    h.cache.mark_synced(&obj, Epoch::new(50)).unwrap();
    h.cache.release(obj, req.flags, false);

    let err = h
        .hold(&mut ctx, &HoldRequest::update(oid(1), 50u64))
        .unwrap_err();
    assert_eq!(
        err,
        ObjError::TxRestart {
            epoch: Epoch::new(50),
            floor: Epoch::new(50)
        }
    );

    // A rebuild context carries no transaction and is exempt.
    let mut rebuild = HoldContext::new();
    let obj = h
        .hold(&mut rebuild, &HoldRequest::update(oid(1), 40u64))
        .expect("rebuild bypasses sync gate");
    assert_eq!(obj.sync_epoch(), Epoch::new(50));
    h.cache.release(obj, HoldFlags::CREATE, false);
}

#[test]
fn container_evict_spares_referenced_handles() {
    let h = Harness::new();
    for lo in 1..=3 {
        h.create(lo, 10);
    }
    let mut ctx = HoldContext::new();
    let read = HoldRequest::read(oid(2), 10u64);
    let held = h.hold(&mut ctx, &read).unwrap();

    assert_eq!(h.cache.evict(&h.container), 2);
    assert_eq!(h.cache.len(), 1);

    // The held handle stays usable and leaves at its last release.
    assert!(held.record().is_some());
    h.cache.release(held, read.flags, false);
    assert!(h.cache.is_empty());
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn every_release_balances_a_hold() {
    let h = Harness::new();
    h.create(1, 10);
    let mut ctx = HoldContext::new();
    let read = HoldRequest::read(oid(1), 10u64);
    let refs: Vec<_> = (0..5).map(|_| h.hold(&mut ctx, &read).unwrap()).collect();
    assert_eq!(h.cache.stats().idle, 0);
    for obj in refs {
        h.cache.release(obj, read.flags, false);
    }
    let stats = h.cache.stats();
    assert_eq!((stats.entries, stats.idle), (1, 1));
}

#[test]
fn aggregation_admits_creates_but_not_discard() {
    let h = Harness::new();
    h.create(1, 10);
    let mut ctx = HoldContext::new();
    let agg = HoldRequest::aggregate(oid(1), range(1, 10));
    let aggregating = h.hold(&mut ctx, &agg).unwrap();

    let mut writer = HoldContext::new();
    let update = HoldRequest::update(oid(1), 20u64);
    let obj = h.hold(&mut writer, &update).expect("create admitted");
    h.cache.release(obj, update.flags, false);

    let err = h
        .hold(&mut writer, &HoldRequest::discard(oid(1), range(1, 10)))
        .unwrap_err();
    assert_eq!(err, ObjError::Busy);
    let err = h.hold(&mut writer, &agg).unwrap_err();
    assert_eq!(err, ObjError::Busy);
    assert_eq!(h.cache.len(), 1, "conflicts never evict");

    h.cache.release(aggregating, agg.flags, false);
    let obj = h
        .hold(&mut writer, &HoldRequest::discard(oid(1), range(1, 10)))
        .expect("aggregation finished");
    h.cache.release(obj, HoldFlags::DISCARD, false);
}

#[test]
fn staging_slot_is_free_after_every_outcome() {
    let h = Harness::new();
    let mut ctx = HoldContext::new();

    assert!(h.hold(&mut ctx, &HoldRequest::read(oid(1), 5u64)).is_err());
    assert!(ctx.staging_is_empty());

    let req = HoldRequest::update(oid(1), 5u64);
    let obj = h.hold(&mut ctx, &req).unwrap();
    assert!(ctx.staging_is_empty());
    h.cache.release(obj, req.flags, false);

    let bad = HoldRequest::update(oid(2), 5u64).with_cond(CondFlags::UPDATE);
    assert!(h.hold(&mut ctx, &bad).is_err());
    assert!(ctx.staging_is_empty());
}

#[test]
fn promotion_keeps_resolved_state() {
    let h = Harness::new();
    let mut ctx = HoldContext::new();
    let req = HoldRequest::update(oid(1), 10u64);
    let obj = h.hold(&mut ctx, &req).unwrap();
    h.cache.mark_synced(&obj, Epoch::new(12)).unwrap();
    h.cache.release(obj, req.flags, true);
    assert!(h.cache.is_empty());

    let read = HoldRequest::read(oid(1), 15u64);
    let obj = h.hold(&mut ctx, &read).unwrap();
    assert_eq!(obj.sync_epoch(), Epoch::new(12));
    assert!(obj.ilog_info().is_fetched(), "ilog fetch carried into cache");
    assert_eq!(obj.maintenance(), Maintenance::Idle);
    h.cache.release(obj, read.flags, false);
}

#[test]
fn handles_release_container_when_evicted() {
    let h = Harness::new();
    h.create(1, 10);
    h.create(2, 10);
    assert!(Arc::strong_count(&h.container) > 1);
    assert_eq!(h.cache.evict(&h.container), 2);
    assert_eq!(Arc::strong_count(&h.container), 1);
}

#[test]
fn identity_is_per_container_instance() {
    let h = Harness::new();
    h.create(1, 10);
    let reopened = Container::open(&h.pool, h.container.id());
    let mut ctx = HoldContext::new();
    let read = HoldRequest::read(oid(1), 10u64);
    let a = h.hold(&mut ctx, &read).unwrap();
    let b = h.cache.hold(&mut ctx, &reopened, &read).unwrap();
    assert!(!ObjectRef::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a.record().unwrap(), &b.record().unwrap()));
    assert_eq!(h.cache.len(), 2);
    h.cache.release(a, read.flags, false);
    h.cache.release(b, read.flags, false);
}

// ---------------------------------------------------------------------------
// Failure modes
// ---------------------------------------------------------------------------

#[test]
fn dying_pool_fails_every_hold() {
    let h = Harness::new();
    h.create(1, 10);
    h.pool.begin_teardown();
    let mut ctx = HoldContext::new();
    assert_eq!(
        h.hold(&mut ctx, &HoldRequest::read(oid(1), 10u64))
            .unwrap_err(),
        ObjError::Shutdown
    );
    assert_eq!(
        h.cache.check_conflict(&h.container, oid(1), HoldFlags::DISCARD),
        Err(ObjError::Shutdown)
    );
    assert!(!h.cache.evict_by_oid(&h.container, oid(1)));
}

#[test]
fn zombie_hold_returns_again() {
    let h = Harness::with(
        CacheConfig {
            evict_on_failure: false,
            ..CacheConfig::with_capacity_bits(4)
        },
        InMemoryDurableIndex::new(),
    );
    let mut ctx = HoldContext::new();
    let req = HoldRequest::update(oid(1), 10u64);
    let obj = h.hold(&mut ctx, &req).unwrap();
    h.cache.mark_zombie(&obj);

    for _ in 0..2 {
        let err = h
            .hold(&mut ctx, &HoldRequest::read(oid(1), 10u64))
            .unwrap_err();
        assert_eq!(err, ObjError::Again);
    }
    h.cache.release(obj, req.flags, false);
    assert!(h.cache.is_empty(), "zombie leaves at release");
}

#[test]
fn conditional_update_of_absent_object() {
    let h = Harness::new();
    let mut ctx = HoldContext::new();
    let req = HoldRequest::update(oid(3), 10u64).with_cond(CondFlags::DKEY_UPDATE);
    assert_eq!(
        h.hold(&mut ctx, &req).unwrap_err(),
        ObjError::NotExist { oid: oid(3) }
    );
    assert!(h.cache.is_empty());

    h.create(3, 10);
    let obj = h
        .hold(&mut ctx, &HoldRequest::update(oid(3), 11u64).with_cond(CondFlags::UPDATE))
        .expect("object visible");
    h.cache.release(obj, HoldFlags::CREATE, false);
}

#[test]
fn provisional_visibility_then_settle() {
    let h = Harness::new();
    let mut ctx = HoldContext::new();
    let punch = HoldRequest::punch(oid(1), 1u64);
    let obj = h.hold(&mut ctx, &punch).unwrap();
    let record = obj.record().unwrap();
    h.cache.release(obj, punch.flags, false);
    record.ilog().insert(IlogEntry::prepared(8u64, IlogEvent::Create));

    let read = HoldRequest::read(oid(1), 10u64);
    let obj = h.hold(&mut ctx, &read).unwrap();
    assert!(obj.is_provisional());
    assert!(matches!(
        h.cache.check_uncertainty(&obj, Epoch::new(10), Epoch::new(10)),
        Err(ObjError::Uncertain { .. })
    ));
    record.ilog().commit(Epoch::new(8));
    assert_eq!(
        h.cache.check_uncertainty(&obj, Epoch::new(10), Epoch::new(10)),
        Ok(())
    );
    h.cache.release(obj, read.flags, false);

    let visible_only = read.with_flags(HoldFlags::VISIBLE_ONLY);
    let obj = h.hold(&mut ctx, &visible_only).unwrap();
    assert!(!obj.is_provisional());
    h.cache.release(obj, visible_only.flags, false);
}

#[test]
fn uncertain_read_fails() {
    let h = Harness::new();
    h.create(1, 10);
    let mut ctx = HoldContext::new();
    let read = HoldRequest::read(oid(1), 5u64).with_bound(12u64);
    assert_eq!(
        h.hold(&mut ctx, &read).unwrap_err(),
        ObjError::Uncertain {
            epoch: Epoch::new(5),
            bound: Epoch::new(12)
        }
    );
}

#[test]
fn full_cache_is_resource_exhaustion() {
    let h = Harness::with(CacheConfig::with_capacity_bits(1), InMemoryDurableIndex::new());
    let mut ctx = HoldContext::new();
    let a = h.hold(&mut ctx, &HoldRequest::update(oid(1), 1u64)).unwrap();
    let b = h.hold(&mut ctx, &HoldRequest::update(oid(2), 1u64)).unwrap();

    let err = h
        .hold(&mut ctx, &HoldRequest::update(oid(3), 1u64))
        .unwrap_err();
    assert!(matches!(err, ObjError::ResourceExhausted(_)));
    assert!(ctx.staging_is_empty());
    assert_eq!(h.cache.len(), 2);
    assert_eq!(h.index.len(), 2, "nothing allocated for the rejected create");

    h.cache.release(a, HoldFlags::CREATE, false);
    let c = h
        .hold(&mut ctx, &HoldRequest::update(oid(3), 1u64))
        .expect("idle entry evicted");
    h.cache.release(b, HoldFlags::CREATE, false);
    h.cache.release(c, HoldFlags::CREATE, false);
}

#[test]
fn full_index_is_resource_exhaustion() {
    let h = Harness::with(CacheConfig::default(), InMemoryDurableIndex::with_limit(1));
    h.create(1, 1);
    let mut ctx = HoldContext::new();
    let err = h
        .hold(&mut ctx, &HoldRequest::update(oid(2), 1u64))
        .unwrap_err();
    assert!(matches!(err, ObjError::ResourceExhausted(_)));
    assert!(ctx.staging_is_empty());
    assert_eq!(h.cache.len(), 1);
}

#[test]
fn failed_hold_keeps_discarding_handle_findable() {
    let h = Harness::new();
    h.create(1, 10);
    let mut a = HoldContext::new();
    let disc = HoldRequest::discard(oid(1), range(1, 10));
    let discarding = h.hold(&mut a, &disc).unwrap();

    // Invisible below the create epoch: the failed hold asks for eviction.
    let mut b = HoldContext::new();
    assert_eq!(
        h.hold(&mut b, &HoldRequest::read(oid(1), 5u64)).unwrap_err(),
        ObjError::NotExist { oid: oid(1) }
    );
    assert_eq!(h.cache.len(), 1);

    let mut c = HoldContext::new();
    let agg = HoldRequest::aggregate(oid(1), range(1, 10));
    assert_eq!(h.hold(&mut c, &agg).unwrap_err(), ObjError::Busy);
    assert_eq!(
        h.cache.check_conflict(&h.container, oid(1), HoldFlags::AGGREGATE),
        Err(ObjError::Busy)
    );

    // The deferred eviction happens at the discard's release.
    h.cache.release(discarding, disc.flags, false);
    assert!(h.cache.is_empty());
    let aggregating = h.hold(&mut c, &agg).expect("discard finished");
    assert_eq!(aggregating.maintenance(), Maintenance::Aggregating);
    h.cache.release(aggregating, agg.flags, false);
}

#[test]
fn explicit_eviction_waits_for_maintenance() {
    let h = Harness::new();
    h.create(1, 10);
    let mut a = HoldContext::new();
    let agg = HoldRequest::aggregate(oid(1), range(1, 10));
    let aggregating = h.hold(&mut a, &agg).unwrap();

    let mut b = HoldContext::new();
    let read = HoldRequest::read(oid(1), 10u64);
    let reader = h.hold(&mut b, &read).unwrap();
    assert!(h.cache.evict_object(&reader));
    assert!(h.cache.evict_by_oid(&h.container, oid(1)));
    h.cache.release(reader, read.flags, true);
    assert_eq!(h.cache.len(), 1);

    let disc = HoldRequest::discard(oid(1), range(1, 10));
    assert_eq!(h.hold(&mut b, &disc).unwrap_err(), ObjError::Busy);
    let again = h.hold(&mut b, &read).unwrap();
    assert!(ObjectRef::ptr_eq(&again, &aggregating));
    h.cache.release(again, read.flags, false);

    h.cache.release(aggregating, agg.flags, false);
    assert!(h.cache.is_empty());
}
