//! Durable-side collaborators of the object cache.
//!
//! The object cache sits above two durable structures it does not own:
//!
//! - the **object index**, mapping `(container, oid)` to an on-media
//!   [`DurableRecord`] ([`DurableIndex`]);
//! - the **incarnation log** (ilog) stored in each record, an epoch-ordered
//!   log of create/punch events answering "was this object visible at
//!   epoch E" ([`IncarnationLog`]).
//!
//! Both are consumed through traits. [`InMemoryDurableIndex`] and
//! [`InMemoryIncarnationLog`] are reference backends for tests, tools and
//! embedding; they commit every mutation immediately.

pub mod error;
pub mod ilog;
pub mod memory;
pub mod record;
pub mod traits;

pub use error::{IlogError, IlogResult, StoreError, StoreResult};
pub use ilog::{IlogCond, IlogEntry, IlogEvent, IlogInfo, IlogRoot};
pub use memory::{InMemoryDurableIndex, InMemoryIncarnationLog};
pub use record::DurableRecord;
pub use traits::{DurableIndex, IncarnationLog};
