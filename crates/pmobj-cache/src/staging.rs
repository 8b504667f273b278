use tracing::trace;

use crate::error::{ObjError, ObjResult};
use crate::handle::{ObjectHandle, ObjectKey};

/// Per-context scratch handle for cache misses.
///
/// A miss is resolved in the slot first and only promoted into the cache if
/// the hold succeeds, so negative lookups never consume a cache slot. The
/// slot is exclusive to its owning context: `occupy` takes `&mut self`.
#[derive(Debug, Default)]
pub struct StagingSlot {
    handle: Option<ObjectHandle>,
}

impl StagingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.handle.is_none()
    }

    /// Initialise the slot for `key`.
    ///
    /// Fails with [`ObjError::StagingBusy`] if a previous staged hold was
    /// never resolved.
    pub fn occupy(&mut self, key: ObjectKey) -> ObjResult<&ObjectHandle> {
        if let Some(stale) = &self.handle {
            trace!(staged = ?stale.key(), requested = ?key, "staging slot busy");
            return Err(ObjError::StagingBusy);
        }
        Ok(self.handle.insert(ObjectHandle::new(key)))
    }

    pub fn get(&self) -> Option<&ObjectHandle> {
        self.handle.as_ref()
    }

    /// Return the slot to empty, dropping the staged handle and with it the
    /// container reference and cached ilog state.
    pub fn reset(&mut self) {
        self.handle = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Container, Pool};
    use pmobj_types::{ContainerId, PoolId, UnitOid};
    use std::sync::Arc;

    #[test]
    fn occupy_reset_cycle() {
        let pool = Pool::new(PoolId::generate());
        let cont = Container::open(&pool, ContainerId::generate());
        let mut slot = StagingSlot::new();
        assert!(slot.is_empty());

        let staged = slot
            .occupy(ObjectKey::new(Arc::clone(&cont), UnitOid::from_lo(1)))
            .unwrap();
        assert_eq!(staged.oid(), UnitOid::from_lo(1));
        assert!(!slot.is_empty());

        let err = slot
            .occupy(ObjectKey::new(Arc::clone(&cont), UnitOid::from_lo(2)))
            .unwrap_err();
        assert_eq!(err, ObjError::StagingBusy);
        assert_eq!(slot.get().map(|h| h.oid()), Some(UnitOid::from_lo(1)));

        slot.reset();
        assert!(slot.is_empty());
        assert_eq!(Arc::strong_count(&cont), 1);
    }
}
