use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use pmobj_store::IlogCond;
use pmobj_types::{Epoch, EpochRange, UnitOid};

use crate::error::{ObjError, ObjResult};

bitflags! {
    /// Flags recognised by [`ObjectCache::hold`](crate::ObjectCache::hold).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct HoldFlags: u32 {
        /// Create the durable record if it does not exist.
        const CREATE = 0b0001;
        /// The holder aggregates the object's history.
        const AGGREGATE = 0b0010;
        /// The holder discards the object's history.
        const DISCARD = 0b0100;
        /// Only succeed if the object is visible at the upper epoch.
        const VISIBLE_ONLY = 0b1000;
    }
}

bitflags! {
    /// Caller-side conditions of the operation the hold is made for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct CondFlags: u32 {
        /// Conditional update of the object.
        const UPDATE = 0b0001;
        /// Conditional update of a distribution key.
        const DKEY_UPDATE = 0b0010;
        /// Conditional update of an attribute key.
        const AKEY_UPDATE = 0b0100;
        /// Conditional fetch; not an update condition.
        const FETCH = 0b1000;

        const UPDATE_OPS = Self::UPDATE.bits() | Self::DKEY_UPDATE.bits() | Self::AKEY_UPDATE.bits();
    }
}

impl CondFlags {
    /// Incarnation log condition derived from these flags.
    pub fn ilog_cond(self) -> IlogCond {
        if self.intersects(CondFlags::UPDATE_OPS) {
            IlogCond::UPDATE
        } else {
            IlogCond::empty()
        }
    }
}

/// What the holder intends to do with the object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Intent {
    /// Plain read / lookup.
    #[default]
    Read,
    Update,
    Punch,
    /// Removal of the object itself.
    Kill,
}

impl Intent {
    /// Intents that finish without an incarnation log visibility check.
    pub fn skips_visibility(self) -> bool {
        matches!(self, Intent::Update | Intent::Punch | Intent::Kill)
    }
}

/// Parameters of one hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HoldRequest {
    pub oid: UnitOid,
    pub epr: EpochRange,
    /// Uncertainty bound; never below `epr.hi`.
    pub bound: Epoch,
    pub flags: HoldFlags,
    pub intent: Intent,
    pub cond: CondFlags,
}

impl HoldRequest {
    /// Read of everything up to `epoch`.
    pub fn read(oid: UnitOid, epoch: impl Into<Epoch>) -> Self {
        let epoch = epoch.into();
        Self {
            oid,
            epr: EpochRange::up_to(epoch),
            bound: epoch,
            flags: HoldFlags::empty(),
            intent: Intent::Read,
            cond: CondFlags::empty(),
        }
    }

    /// Update at `epoch`, creating the object if needed.
    pub fn update(oid: UnitOid, epoch: impl Into<Epoch>) -> Self {
        let epoch = epoch.into();
        Self {
            oid,
            epr: EpochRange::at(epoch),
            bound: epoch,
            flags: HoldFlags::CREATE,
            intent: Intent::Update,
            cond: CondFlags::empty(),
        }
    }

    /// Punch at `epoch`, creating the record if needed.
    pub fn punch(oid: UnitOid, epoch: impl Into<Epoch>) -> Self {
        Self {
            intent: Intent::Punch,
            ..Self::update(oid, epoch)
        }
    }

    /// Hold for removal of the object.
    pub fn kill(oid: UnitOid, epoch: impl Into<Epoch>) -> Self {
        Self {
            flags: HoldFlags::empty(),
            intent: Intent::Kill,
            ..Self::update(oid, epoch)
        }
    }

    /// Hold for aggregation of `epr`.
    pub fn aggregate(oid: UnitOid, epr: EpochRange) -> Self {
        Self {
            epr,
            bound: epr.hi,
            flags: HoldFlags::AGGREGATE,
            ..Self::read(oid, epr.hi)
        }
    }

    /// Hold for discard of `epr`.
    pub fn discard(oid: UnitOid, epr: EpochRange) -> Self {
        Self {
            flags: HoldFlags::DISCARD,
            ..Self::aggregate(oid, epr)
        }
    }

    pub fn with_flags(mut self, flags: HoldFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_bound(mut self, bound: impl Into<Epoch>) -> Self {
        self.bound = bound.into();
        self
    }

    pub fn with_range(mut self, epr: EpochRange) -> Self {
        self.epr = epr;
        self
    }

    pub fn with_cond(mut self, cond: CondFlags) -> Self {
        self.cond = cond;
        self
    }

    /// The bound actually used for uncertainty decisions.
    pub fn effective_bound(&self) -> Epoch {
        self.bound.max(self.epr.hi)
    }

    /// Reject flag/intent combinations the cache cannot honour.
    pub fn validate(&self) -> ObjResult<()> {
        let maintenance = self.flags & (HoldFlags::AGGREGATE | HoldFlags::DISCARD);
        if maintenance.bits().count_ones() > 1 {
            return Err(ObjError::InvalidRequest(
                "aggregate and discard cannot be requested together".into(),
            ));
        }
        if self.flags.contains(HoldFlags::CREATE)
            && !matches!(self.intent, Intent::Update | Intent::Punch)
        {
            return Err(ObjError::InvalidRequest(format!(
                "create requires update or punch intent, got {:?}",
                self.intent
            )));
        }
        if self.intent.skips_visibility() && !maintenance.is_empty() {
            return Err(ObjError::InvalidRequest(format!(
                "{:?} intent cannot carry maintenance flags",
                self.intent
            )));
        }
        Ok(())
    }
}
