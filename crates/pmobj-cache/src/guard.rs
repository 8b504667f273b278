//! Conflict arbitration between holds and maintenance operations.
//!
//! Discard removes epoch history outright and excludes every other
//! structural request. Aggregation compacts history; it excludes further
//! aggregation and discard but admits creates and updates.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ObjError;
use crate::flags::HoldFlags;

/// Maintenance operation currently active on a handle.
///
/// A single enum rather than two booleans: discard and aggregation can never
/// be active together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Maintenance {
    #[default]
    Idle,
    Aggregating,
    Discarding,
}

/// Whether a request carrying `requested` may run alongside `current`.
///
/// Only `CREATE`, `DISCARD` and `AGGREGATE` take part in the decision.
pub fn may_proceed(current: Maintenance, requested: HoldFlags) -> bool {
    let conflicting = match current {
        Maintenance::Discarding => HoldFlags::CREATE | HoldFlags::DISCARD | HoldFlags::AGGREGATE,
        Maintenance::Aggregating => HoldFlags::DISCARD | HoldFlags::AGGREGATE,
        Maintenance::Idle => HoldFlags::empty(),
    };
    if requested.intersects(conflicting) {
        debug!(?current, ?requested, "conflict detected");
        return false;
    }
    true
}

/// Error reported for a rejected request: creators retry, others back off.
pub fn conflict_error(requested: HoldFlags) -> ObjError {
    if requested.contains(HoldFlags::CREATE) {
        ObjError::UpdateAgain
    } else {
        ObjError::Busy
    }
}

impl Maintenance {
    /// State after admitting a request with `requested`.
    ///
    /// Fails with the conflict error if the request may not proceed.
    pub fn begin(self, requested: HoldFlags) -> Result<Maintenance, ObjError> {
        if !may_proceed(self, requested) {
            return Err(conflict_error(requested));
        }
        Ok(if requested.contains(HoldFlags::AGGREGATE) {
            Maintenance::Aggregating
        } else if requested.contains(HoldFlags::DISCARD) {
            Maintenance::Discarding
        } else {
            self
        })
    }

    /// State after the holder that requested `released` lets go.
    pub fn end(self, released: HoldFlags) -> Maintenance {
        match self {
            Maintenance::Aggregating if released.contains(HoldFlags::AGGREGATE) => {
                Maintenance::Idle
            }
            Maintenance::Discarding
                if released.contains(HoldFlags::DISCARD)
                    && !released.contains(HoldFlags::AGGREGATE) =>
            {
                Maintenance::Idle
            }
            other => other,
        }
    }

    pub fn is_idle(self) -> bool {
        self == Maintenance::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn discard_excludes_everything_structural() {
        let d = Maintenance::Discarding;
        assert!(!may_proceed(d, HoldFlags::CREATE));
        assert!(!may_proceed(d, HoldFlags::DISCARD));
        assert!(!may_proceed(d, HoldFlags::AGGREGATE));
        assert!(may_proceed(d, HoldFlags::empty()));
        assert!(may_proceed(d, HoldFlags::VISIBLE_ONLY));
    }

    #[test]
    fn aggregation_admits_create() {
        let a = Maintenance::Aggregating;
        assert!(may_proceed(a, HoldFlags::CREATE));
        assert!(!may_proceed(a, HoldFlags::DISCARD));
        assert!(!may_proceed(a, HoldFlags::AGGREGATE));
    }

    #[test]
    fn conflict_error_depends_on_create() {
        assert_eq!(conflict_error(HoldFlags::CREATE), ObjError::UpdateAgain);
        assert_eq!(conflict_error(HoldFlags::AGGREGATE), ObjError::Busy);
    }

    #[test]
    fn begin_and_end_transitions() {
        let s = Maintenance::Idle.begin(HoldFlags::AGGREGATE).unwrap();
        assert_eq!(s, Maintenance::Aggregating);
        assert_eq!(s.begin(HoldFlags::DISCARD), Err(ObjError::Busy));
        assert_eq!(s.begin(HoldFlags::CREATE), Ok(Maintenance::Aggregating));
        assert_eq!(s.end(HoldFlags::DISCARD), Maintenance::Aggregating);
        assert_eq!(s.end(HoldFlags::AGGREGATE), Maintenance::Idle);

        let s = Maintenance::Idle.begin(HoldFlags::DISCARD).unwrap();
        assert_eq!(s, Maintenance::Discarding);
        assert_eq!(s.end(HoldFlags::empty()), Maintenance::Discarding);
        assert!(s.end(HoldFlags::DISCARD).is_idle());
    }

    fn any_state() -> impl Strategy<Value = Maintenance> {
        prop_oneof![
            Just(Maintenance::Idle),
            Just(Maintenance::Aggregating),
            Just(Maintenance::Discarding),
        ]
    }

    fn any_flags() -> impl Strategy<Value = HoldFlags> {
        (0u32..16).prop_map(HoldFlags::from_bits_truncate)
    }

    proptest! {
        #[test]
        fn prop_begin_matches_may_proceed(state in any_state(), flags in any_flags()) {
            prop_assert_eq!(state.begin(flags).is_ok(), may_proceed(state, flags));
        }

        #[test]
        fn prop_maintenance_requests_never_stack(state in any_state(), flags in any_flags()) {
            let maintenance = flags & (HoldFlags::AGGREGATE | HoldFlags::DISCARD);
            if !state.is_idle() && !maintenance.is_empty() {
                prop_assert!(state.begin(flags).is_err());
            }
        }

        #[test]
        fn prop_begin_then_end_returns_to_start(flags in any_flags()) {
            let maintenance = flags & (HoldFlags::AGGREGATE | HoldFlags::DISCARD);
            prop_assume!(maintenance.bits().count_ones() == 1);
            let next = Maintenance::Idle.begin(flags).unwrap();
            prop_assert!(!next.is_idle());
            prop_assert_eq!(next.end(flags), Maintenance::Idle);
        }
    }
}
