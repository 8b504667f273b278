use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use pmobj_types::{ContainerId, PoolId};

/// A storage pool as seen by the object cache.
#[derive(Debug)]
pub struct Pool {
    id: PoolId,
    dying: AtomicBool,
}

impl Pool {
    pub fn new(id: PoolId) -> Arc<Self> {
        Arc::new(Self {
            id,
            dying: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Whether teardown has started. Holds fail with `Shutdown` from then on.
    pub fn is_dying(&self) -> bool {
        self.dying.load(Ordering::Acquire)
    }

    pub fn begin_teardown(&self) {
        if !self.dying.swap(true, Ordering::AcqRel) {
            info!(pool = %self.id, "pool teardown started");
        }
    }
}

/// An open container. Handles keep it alive through `Arc<Container>`.
#[derive(Debug)]
pub struct Container {
    id: ContainerId,
    pool: Arc<Pool>,
}

impl Container {
    pub fn open(pool: &Arc<Pool>, id: ContainerId) -> Arc<Self> {
        Arc::new(Self {
            id,
            pool: Arc::clone(pool),
        })
    }

    pub fn id(&self) -> ContainerId {
        self.id
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }
}
