//! Foundation types for the pmobj object cache.
//!
//! Every other pmobj crate depends on `pmobj-types`.
//!
//! # Key Types
//!
//! - [`Epoch`]: logical timestamp assigned by the transaction system
//! - [`EpochRange`]: inclusive `[lo, hi]` epoch interval
//! - [`UnitOid`]: object id within a shard, carrying its layout version
//! - [`ContainerId`] / [`PoolId`]: UUID identities of containers and pools

pub mod epoch;
pub mod error;
pub mod identity;
pub mod oid;

pub use epoch::{Epoch, EpochRange};
pub use error::TypeError;
pub use identity::{ContainerId, PoolId};
pub use oid::UnitOid;
