use pmobj_types::{ContainerId, Epoch, UnitOid};

/// Errors from the durable object index.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No room left to allocate a durable record.
    #[error("object index full: cannot allocate {oid} in {container}")]
    NoSpace { container: ContainerId, oid: UnitOid },

    /// The index refused the operation (e.g. container being destroyed).
    #[error("object index unavailable: {0}")]
    Unavailable(String),

    /// On-media record failed validation.
    #[error("corrupt record for {oid}: {reason}")]
    Corrupt { oid: UnitOid, reason: String },
}

/// Result alias for object index operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from the incarnation log engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IlogError {
    /// No incarnation matches the query.
    #[error("no incarnation found")]
    NotFound,

    /// An event inside the uncertainty window forbids this mutation at
    /// `epoch`; the transaction must restart at a newer epoch.
    #[error("conflicting incarnation at {conflict} inside uncertainty window of {epoch}")]
    Restart { epoch: Epoch, conflict: Epoch },

    /// Log contents are inconsistent.
    #[error("corrupt incarnation log: {0}")]
    Corrupt(String),
}

/// Result alias for incarnation log operations.
pub type IlogResult<T> = Result<T, IlogError>;
