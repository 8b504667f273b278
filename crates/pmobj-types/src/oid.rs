use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identifier of one shard of an object.
///
/// Two `UnitOid`s are equal only if every field matches, including the
/// layout version tag carried alongside the id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitOid {
    /// High 64 bits of the object id (type and class bits live here).
    pub hi: u64,
    /// Low 64 bits of the object id.
    pub lo: u64,
    /// Shard index within the object layout.
    pub shard: u32,
    /// Layout version the id was generated under.
    pub layout_ver: u16,
}

impl UnitOid {
    pub const fn new(hi: u64, lo: u64, shard: u32) -> Self {
        Self {
            hi,
            lo,
            shard,
            layout_ver: 0,
        }
    }

    /// Convenience constructor for tests and tools: shard 0, `hi` 0.
    pub const fn from_lo(lo: u64) -> Self {
        Self::new(0, lo, 0)
    }

    /// Same id under a different layout version.
    pub const fn with_layout(mut self, layout_ver: u16) -> Self {
        self.layout_ver = layout_ver;
        self
    }
}

impl fmt::Debug for UnitOid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitOid({self}@v{})", self.layout_ver)
    }
}

impl fmt::Display for UnitOid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}.{:x}.{}", self.hi, self.lo, self.shard)
    }
}

/// Parses the `hi.lo.shard` form produced by `Display` (hex `hi`/`lo`).
impl FromStr for UnitOid {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let (Some(hi), Some(lo), Some(shard), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TypeError::InvalidOid(format!("expected hi.lo.shard, got {s:?}")));
        };
        let hi = u64::from_str_radix(hi, 16).map_err(|e| TypeError::InvalidOid(e.to_string()))?;
        let lo = u64::from_str_radix(lo, 16).map_err(|e| TypeError::InvalidOid(e.to_string()))?;
        let shard = shard
            .parse::<u32>()
            .map_err(|e| TypeError::InvalidOid(e.to_string()))?;
        Ok(Self::new(hi, lo, shard))
    }
}
