//! Synthetic hold/release workload over the in-memory backends.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use pmobj_cache::{
    CacheConfig, Container, HoldContext, HoldFlags, HoldRequest, ObjError, ObjectCache, Pool,
    TxnId,
};
use pmobj_lru::LruStats;
use pmobj_store::{InMemoryDurableIndex, InMemoryIncarnationLog};
use pmobj_types::{ContainerId, Epoch, EpochRange, PoolId, UnitOid};

/// Shape of a synthetic workload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Number of distinct object ids.
    pub objects: u64,
    pub threads: usize,
    /// Operations per thread.
    pub operations: u64,
    /// Share of plain reads among all operations.
    pub read_ratio: f64,
    /// Share of aggregate/discard holds among all operations.
    pub maintenance_ratio: f64,
    /// Every n-th successful update marks the object synced. 0 disables.
    pub sync_every: u64,
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            objects: 1024,
            threads: 4,
            operations: 10_000,
            read_ratio: 0.7,
            maintenance_ratio: 0.02,
            sync_every: 16,
            seed: 0x5eed,
        }
    }
}

impl WorkloadConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: WorkloadConfig = toml::from_str(text).context("parsing workload")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.objects == 0 || self.threads == 0 {
            bail!("objects and threads must be non-zero");
        }
        if !(0.0..=1.0).contains(&self.read_ratio) || !(0.0..=1.0).contains(&self.maintenance_ratio)
        {
            bail!("ratios must lie within 0.0..=1.0");
        }
        if self.read_ratio + self.maintenance_ratio > 1.0 {
            bail!("read_ratio + maintenance_ratio must not exceed 1.0");
        }
        Ok(())
    }
}

/// Outcome counters of one run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct WorkloadReport {
    pub holds: u64,
    pub not_exist: u64,
    pub conflicts: u64,
    pub restarts: u64,
    pub uncertain: u64,
    pub exhausted: u64,
    pub other_errors: u64,
    /// Incarnation log events removed by discard holds.
    pub discarded_events: u64,
    pub elapsed: Duration,
    pub cache: LruStats,
}

impl WorkloadReport {
    fn merge(&mut self, other: &WorkloadReport) {
        self.holds += other.holds;
        self.not_exist += other.not_exist;
        self.conflicts += other.conflicts;
        self.restarts += other.restarts;
        self.uncertain += other.uncertain;
        self.exhausted += other.exhausted;
        self.other_errors += other.other_errors;
        self.discarded_events += other.discarded_events;
    }

    fn count_error(&mut self, err: &ObjError) {
        match err {
            ObjError::NotExist { .. } => self.not_exist += 1,
            ObjError::UpdateAgain | ObjError::Busy | ObjError::Again => self.conflicts += 1,
            ObjError::TxRestart { .. } => self.restarts += 1,
            ObjError::Uncertain { .. } => self.uncertain += 1,
            ObjError::ResourceExhausted(_) => self.exhausted += 1,
            other => {
                debug!(error = %other, "unexpected hold failure");
                self.other_errors += 1;
            }
        }
    }

    pub fn total_ops(&self) -> u64 {
        self.holds
            + self.not_exist
            + self.conflicts
            + self.restarts
            + self.uncertain
            + self.exhausted
            + self.other_errors
    }

    pub fn ops_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.total_ops() as f64 / secs
        }
    }
}

/// Run `workload` against a fresh cache built from `cache_config`.
pub fn run(cache_config: &CacheConfig, workload: &WorkloadConfig) -> anyhow::Result<WorkloadReport> {
    workload.validate()?;
    let cache = ObjectCache::new(
        cache_config.clone(),
        Arc::new(InMemoryDurableIndex::new()),
        Arc::new(InMemoryIncarnationLog::new()),
    )?;
    let pool = Pool::new(PoolId::generate());
    let container = Container::open(&pool, ContainerId::generate());
    let clock = AtomicU64::new(1);
    info!(
        threads = workload.threads,
        operations = workload.operations,
        objects = workload.objects,
        "starting workload"
    );

    let started = Instant::now();
    let reports: Vec<WorkloadReport> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..workload.threads)
            .map(|t| {
                let cache = &cache;
                let container = &container;
                let clock = &clock;
                scope.spawn(move || worker(cache, container, clock, workload, t as u64))
            })
            .collect();
        workers
            .into_iter()
            .map(|w| w.join().unwrap_or_default())
            .collect()
    });

    let mut report = WorkloadReport::default();
    for r in &reports {
        report.merge(r);
    }
    report.elapsed = started.elapsed();
    report.cache = cache.stats();
    cache.evict(&container);
    Ok(report)
}

fn worker(
    cache: &ObjectCache,
    container: &Arc<Container>,
    clock: &AtomicU64,
    workload: &WorkloadConfig,
    thread: u64,
) -> WorkloadReport {
    let mut rng = StdRng::seed_from_u64(workload.seed.wrapping_add(thread));
    let mut ctx = HoldContext::with_txn(TxnId(thread));
    let mut report = WorkloadReport::default();
    let mut updates = 0u64;

    for _ in 0..workload.operations {
        let epoch = Epoch::new(clock.fetch_add(1, Ordering::Relaxed));
        let oid = UnitOid::from_lo(rng.gen_range(0..workload.objects));
        let roll: f64 = rng.gen();

        let req = if roll < workload.maintenance_ratio {
            let lo = Epoch::new(epoch.get().saturating_sub(8).max(1));
            let epr = EpochRange { lo, hi: epoch };
            if rng.gen_bool(0.5) {
                HoldRequest::aggregate(oid, epr)
            } else {
                HoldRequest::discard(oid, epr)
            }
        } else if roll < workload.maintenance_ratio + workload.read_ratio {
            HoldRequest::read(oid, epoch)
        } else {
            HoldRequest::update(oid, epoch)
        };

        let obj = match cache.hold(&mut ctx, container, &req) {
            Ok(obj) => obj,
            Err(err) => {
                report.count_error(&err);
                continue;
            }
        };
        report.holds += 1;

        if req.flags.contains(HoldFlags::DISCARD) {
            if let Some(record) = obj.record() {
                report.discarded_events += record.ilog().remove_range(req.epr.lo, req.epr.hi) as u64;
            }
        } else if req.flags.contains(HoldFlags::CREATE) {
            updates += 1;
            if workload.sync_every > 0 && updates % workload.sync_every == 0 {
                if let Err(err) = cache.mark_synced(&obj, epoch) {
                    debug!(error = %err, "mark synced failed");
                }
            }
        }
        cache.release(obj, req.flags, false);
    }
    debug!(thread, holds = report.holds, "worker finished");
    report
}
