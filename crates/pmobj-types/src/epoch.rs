use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Logical timestamp used to order and version object mutations.
///
/// Epochs are assigned monotonically by the surrounding transaction system.
/// [`Epoch::MAX`] is reserved and means "latest" (unbounded).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Epoch(u64);

impl Epoch {
    /// The zero epoch. Nothing is ever durable at epoch zero.
    pub const ZERO: Epoch = Epoch(0);

    /// Reserved "latest / unbounded" epoch.
    pub const MAX: Epoch = Epoch(u64::MAX);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` for the reserved "latest" value.
    pub fn is_latest(self) -> bool {
        self.0 == u64::MAX
    }

    /// Next epoch, saturating at [`Epoch::MAX`].
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl From<u64> for Epoch {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Epoch> for u64 {
    fn from(epoch: Epoch) -> Self {
        epoch.0
    }
}

impl fmt::Debug for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_latest() {
            write!(f, "Epoch(MAX)")
        } else {
            write!(f, "Epoch({})", self.0)
        }
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_latest() {
            write!(f, "max")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

/// Inclusive epoch interval `[lo, hi]`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpochRange {
    pub lo: Epoch,
    pub hi: Epoch,
}

impl EpochRange {
    /// Build a range, rejecting `lo > hi`.
    pub fn new(lo: impl Into<Epoch>, hi: impl Into<Epoch>) -> Result<Self, TypeError> {
        let (lo, hi) = (lo.into(), hi.into());
        if lo > hi {
            return Err(TypeError::InvalidEpochRange {
                lo: lo.get(),
                hi: hi.get(),
            });
        }
        Ok(Self { lo, hi })
    }

    /// Single-epoch range `[epoch, epoch]`.
    pub fn at(epoch: impl Into<Epoch>) -> Self {
        let epoch = epoch.into();
        Self {
            lo: epoch,
            hi: epoch,
        }
    }

    /// `[0, epoch]`: everything up to and including `epoch`.
    pub fn up_to(epoch: impl Into<Epoch>) -> Self {
        Self {
            lo: Epoch::ZERO,
            hi: epoch.into(),
        }
    }

    /// Returns `true` if `epoch` falls inside the range.
    pub fn contains(&self, epoch: Epoch) -> bool {
        self.lo <= epoch && epoch <= self.hi
    }
}

impl fmt::Debug for EpochRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EpochRange({:?}..={:?})", self.lo, self.hi)
    }
}

impl fmt::Display for EpochRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.lo, self.hi)
    }
}
