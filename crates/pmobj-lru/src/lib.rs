//! Bounded, hash-indexed LRU of reference-counted entries.
//!
//! This is the backing store of the object cache. It knows nothing about
//! objects: it maps a key to one shared entry, counts the holders of each
//! entry and ages out idle (zero-reference) entries in least-recently-released
//! order once capacity is reached.
//!
//! # Rules
//!
//! 1. At most one entry per key. Lookup-or-insert is atomic.
//! 2. An entry with a live reference is never evicted by capacity pressure.
//! 3. A release with `evict` set detaches the entry immediately; later holds
//!    miss and must create a fresh entry.
//! 4. Entries hand out `Arc<V>`; the entry is dropped once it has left the
//!    index and its last holder has released it.

pub mod cache;
pub mod error;

pub use cache::{Keyed, LruCache, LruStats};
pub use error::{LruError, LruResult};
