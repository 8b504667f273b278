/// Errors from the LRU backing store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LruError {
    /// Every slot holds a referenced entry; nothing can be evicted.
    #[error("lru cache full: {capacity} entries, none evictable")]
    Full { capacity: usize },
}

/// Result alias for LRU operations.
pub type LruResult<T> = Result<T, LruError>;
