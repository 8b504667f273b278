use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{LruError, LruResult};

/// An entry that knows its own cache key.
///
/// `release` locates the slot through this key, so the key must not change
/// for the life of the entry.
pub trait Keyed {
    type Key: Eq + Hash + Clone;

    fn key(&self) -> &Self::Key;
}

/// Point-in-time counters for an [`LruCache`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LruStats {
    pub capacity: usize,
    pub entries: usize,
    /// Entries with no holder, eligible for eviction.
    pub idle: usize,
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
}

struct Slot<V> {
    value: Arc<V>,
    refs: usize,
    /// Position in the idle queue while `refs == 0`.
    idle_tick: Option<u64>,
    /// Removed from the index at its last release instead of going idle.
    doomed: bool,
}

struct LruState<K, V> {
    slots: HashMap<K, Slot<V>>,
    /// Zero-reference entries ordered by release time, oldest first.
    idle: BTreeMap<u64, K>,
    tick: u64,
    hits: u64,
    misses: u64,
    inserts: u64,
    evictions: u64,
}

impl<K: Eq + Hash + Clone, V> LruState<K, V> {
    fn take_ref(&mut self, key: &K) -> Option<Arc<V>> {
        let slot = self.slots.get_mut(key)?;
        if let Some(tick) = slot.idle_tick.take() {
            self.idle.remove(&tick);
        }
        slot.refs += 1;
        Some(Arc::clone(&slot.value))
    }

    fn park(&mut self, key: &K) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(slot) = self.slots.get_mut(key) {
            slot.idle_tick = Some(tick);
            self.idle.insert(tick, key.clone());
        }
    }

    fn remove(&mut self, key: &K) -> Option<Arc<V>> {
        let slot = self.slots.remove(key)?;
        if let Some(tick) = slot.idle_tick {
            self.idle.remove(&tick);
        }
        Some(slot.value)
    }

    /// Evict the least recently released idle entry.
    fn evict_oldest_idle(&mut self) -> Option<Arc<V>> {
        let (_, key) = self.idle.pop_first()?;
        let slot = self.slots.remove(&key)?;
        self.evictions += 1;
        Some(slot.value)
    }
}

/// Bounded LRU keyed by `V::Key`, handing out `Arc<V>` references.
///
/// Holders are counted per slot. Capacity pressure only ever evicts idle
/// entries; if every slot is referenced an insertion fails with
/// [`LruError::Full`]. Safe for concurrent use: one lock guards the index
/// and the idle queue, so lookup-or-insert of a key is atomic.
pub struct LruCache<V: Keyed> {
    capacity: usize,
    state: Mutex<LruState<V::Key, V>>,
}

impl<V: Keyed> LruCache<V> {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(LruState {
                slots: HashMap::new(),
                idle: BTreeMap::new(),
                tick: 0,
                hits: 0,
                misses: 0,
                inserts: 0,
                evictions: 0,
            }),
        }
    }

    /// Create a cache of `1 << bits` entries.
    pub fn with_capacity_bits(bits: u32) -> Self {
        Self::new(1usize << bits.min(usize::BITS - 1))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of indexed entries, referenced or idle.
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().slots.is_empty()
    }

    /// Take a reference on the entry for `key`, if indexed.
    pub fn hold(&self, key: &V::Key) -> Option<Arc<V>> {
        let mut state = self.state.lock();
        match state.take_ref(key) {
            Some(value) => {
                state.hits += 1;
                Some(value)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// The entry for `key` without taking a reference.
    ///
    /// Not counted as a hit or miss and leaves the LRU order alone. The
    /// returned `Arc` keeps the value alive but does not pin the slot.
    pub fn peek(&self, key: &V::Key) -> Option<Arc<V>> {
        self.state
            .lock()
            .slots
            .get(key)
            .map(|slot| Arc::clone(&slot.value))
    }

    /// Take a reference on the entry for `key`, creating it with `ctor` if
    /// it is not indexed.
    ///
    /// `ctor` runs under the cache lock and at most once. When the cache is
    /// at capacity the oldest idle entry is evicted first.
    pub fn hold_or_create<F>(&self, key: V::Key, ctor: F) -> LruResult<Arc<V>>
    where
        F: FnOnce(&V::Key) -> V,
    {
        let victim;
        let value = {
            let mut state = self.state.lock();
            if let Some(value) = state.take_ref(&key) {
                state.hits += 1;
                return Ok(value);
            }
            state.misses += 1;

            victim = if state.slots.len() >= self.capacity {
                match state.evict_oldest_idle() {
                    Some(v) => Some(v),
                    None => {
                        debug!(capacity = self.capacity, "lru full, no idle entry to evict");
                        return Err(LruError::Full {
                            capacity: self.capacity,
                        });
                    }
                }
            } else {
                None
            };

            let value = Arc::new(ctor(&key));
            state.slots.insert(
                key,
                Slot {
                    value: Arc::clone(&value),
                    refs: 1,
                    idle_tick: None,
                    doomed: false,
                },
            );
            state.inserts += 1;
            value
        };
        // Dropped outside the lock: entry destructors may be non-trivial.
        drop(victim);
        Ok(value)
    }

    /// Give back one reference taken by `hold` or `hold_or_create`.
    ///
    /// With `evict` set the entry leaves the index now, even if other
    /// holders remain; they keep their `Arc` and later releases of it are
    /// no-ops. Releasing an entry that is no longer indexed does nothing
    /// beyond dropping `value`.
    pub fn release(&self, value: Arc<V>, evict: bool) {
        let removed = {
            let mut state = self.state.lock();
            let key = value.key();
            let Some(slot) = state.slots.get_mut(key) else {
                trace!("release of detached entry");
                return;
            };
            if !Arc::ptr_eq(&slot.value, &value) {
                trace!("release of detached entry");
                return;
            }
            debug_assert!(slot.refs > 0, "release without hold");
            slot.refs = slot.refs.saturating_sub(1);
            let last = slot.refs == 0;
            let doomed = slot.doomed;

            if evict || (last && doomed) {
                state.evictions += 1;
                state.remove(key)
            } else {
                if last {
                    state.park(key);
                }
                None
            }
        };
        drop(removed);
        drop(value);
    }

    /// Detach `value` from the index without giving back a reference.
    ///
    /// Current holders keep their `Arc`; their later releases are no-ops.
    /// Returns `false` if `value` was not the indexed entry for its key.
    pub fn evict(&self, value: &Arc<V>) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let key = value.key();
            match state.slots.get(key) {
                Some(slot) if Arc::ptr_eq(&slot.value, value) => {}
                _ => return false,
            }
            state.evictions += 1;
            state.remove(key)
        };
        drop(removed);
        true
    }

    /// Mark a referenced entry to leave the index at its last release.
    ///
    /// Until then holds still find it. Returns `false` if `value` was not
    /// the indexed entry for its key.
    pub fn doom(&self, value: &Arc<V>) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let key = value.key();
            let Some(slot) = state.slots.get_mut(key) else {
                return false;
            };
            if !Arc::ptr_eq(&slot.value, value) {
                return false;
            }
            if slot.refs > 0 {
                slot.doomed = true;
                None
            } else {
                state.evictions += 1;
                state.remove(key)
            }
        };
        drop(removed);
        true
    }

    /// Drop every entry for which `pred` returns `true`.
    ///
    /// Idle matches are removed immediately. Referenced matches stay usable
    /// and are removed at their last release. Returns the number removed now.
    pub fn evict_if<P>(&self, mut pred: P) -> usize
    where
        P: FnMut(&V) -> bool,
    {
        let removed: Vec<Arc<V>> = {
            let mut state = self.state.lock();
            let mut idle_keys = Vec::new();
            for (key, slot) in state.slots.iter_mut() {
                if !pred(&slot.value) {
                    continue;
                }
                if slot.refs == 0 {
                    idle_keys.push(key.clone());
                } else {
                    slot.doomed = true;
                }
            }
            let removed: Vec<Arc<V>> = idle_keys.iter().filter_map(|k| state.remove(k)).collect();
            state.evictions += removed.len() as u64;
            removed
        };
        let count = removed.len();
        if count > 0 {
            debug!(count, "evicted idle entries by predicate");
        }
        count
    }

    /// Number of holders of the indexed entry for `key`.
    pub fn ref_count(&self, key: &V::Key) -> Option<usize> {
        self.state.lock().slots.get(key).map(|slot| slot.refs)
    }

    pub fn stats(&self) -> LruStats {
        let state = self.state.lock();
        LruStats {
            capacity: self.capacity,
            entries: state.slots.len(),
            idle: state.idle.len(),
            hits: state.hits,
            misses: state.misses,
            inserts: state.inserts,
            evictions: state.evictions,
        }
    }
}

impl<V: Keyed> std::fmt::Debug for LruCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("LruCache")
            .field("capacity", &stats.capacity)
            .field("entries", &stats.entries)
            .field("idle", &stats.idle)
            .finish()
    }
}
