use pmobj_store::{IlogError, StoreError};
use pmobj_types::{Epoch, UnitOid};

/// Errors returned by object cache operations.
///
/// Every variant is a typed outcome for the immediate caller; the variant
/// tells the caller whether retrying makes sense.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjError {
    /// No durable record and creation was not requested.
    #[error("object {oid} does not exist")]
    NotExist { oid: UnitOid },

    /// A creating request collided with discard or aggregation. Retry the
    /// whole operation after backoff.
    #[error("conflicting maintenance in progress, retry the update")]
    UpdateAgain,

    /// A non-creating request collided with discard or aggregation.
    #[error("object busy with conflicting maintenance")]
    Busy,

    /// The requested epoch is not newer than `floor` (an already synced
    /// epoch, or a conflicting event). Restart at a newer epoch.
    #[error("epoch {epoch} is not newer than {floor}, restart the transaction")]
    TxRestart { epoch: Epoch, floor: Epoch },

    /// Visibility depends on a transaction that may still commit.
    #[error("visibility at {epoch} is uncertain up to {bound}")]
    Uncertain { epoch: Epoch, bound: Epoch },

    /// The owning pool is being torn down.
    #[error("pool is shutting down")]
    Shutdown,

    /// The object is being reclaimed; retry later.
    #[error("object is being reclaimed, retry later")]
    Again,

    /// Allocation failed (cache full, object index full).
    #[error("out of resources: {0}")]
    ResourceExhausted(String),

    /// The context's staging slot is still occupied.
    #[error("staging slot of this context is already in use")]
    StagingBusy,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("object index: {0}")]
    Store(StoreError),

    #[error("incarnation log: {0}")]
    Ilog(IlogError),
}

impl ObjError {
    /// Whether the same operation may succeed if retried (possibly at a
    /// newer epoch).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ObjError::UpdateAgain | ObjError::TxRestart { .. } | ObjError::Again
        )
    }

    /// Whether this is a maintenance conflict (`UpdateAgain` or `Busy`).
    pub fn is_conflict(&self) -> bool {
        matches!(self, ObjError::UpdateAgain | ObjError::Busy)
    }
}

impl From<StoreError> for ObjError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NoSpace { .. } => ObjError::ResourceExhausted(err.to_string()),
            other => ObjError::Store(other),
        }
    }
}

/// Result alias for object cache operations.
pub type ObjResult<T> = Result<T, ObjError>;

/// Errors loading or validating a [`CacheConfig`](crate::CacheConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
