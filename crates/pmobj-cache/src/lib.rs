//! In-memory object access layer of the pmobj storage engine.
//!
//! Given a `(container, oid)` pair, [`ObjectCache::hold`] produces a live,
//! reference-counted [`ObjectRef`] to the object's durable state. Holds are
//! arbitrated against maintenance operations in flight on the same object
//! (discard, aggregation) and against epoch visibility recorded in the
//! object's incarnation log.
//!
//! # Pieces
//!
//! - [`ObjectHandle`]: the cached unit; one per identity (see [`ObjectKey`]).
//! - [`guard`]: which maintenance states admit which requests.
//! - `resolver`: durable index lookup/allocation, sync-epoch gate and
//!   incarnation log fetch/check/update.
//! - [`StagingSlot`]: a per-context scratch handle used on cache misses so
//!   that failed or negative lookups never occupy a cache slot.
//! - [`ObjectCache`]: ties the above to a bounded [`pmobj_lru::LruCache`].
//!
//! # Rules
//!
//! 1. At most one handle per identity lives in the cache.
//! 2. A handle's durable record, once resolved, is never reset.
//! 3. Discard and aggregation are never active together on one handle.
//! 4. Zombie handles are never handed to a new caller.
//! 5. Every successful hold must be returned through [`ObjectCache::release`].

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod flags;
pub mod guard;
pub mod handle;
pub mod pool;
mod resolver;
pub mod staging;

pub use cache::ObjectCache;
pub use config::CacheConfig;
pub use context::{HoldContext, TxnId};
pub use error::{ConfigError, ObjError, ObjResult};
pub use flags::{CondFlags, HoldFlags, HoldRequest, Intent};
pub use guard::{may_proceed, Maintenance};
pub use handle::{ObjectHandle, ObjectKey, ObjectRef};
pub use pool::{Container, Pool};
pub use staging::StagingSlot;
