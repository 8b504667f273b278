use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid epoch range: lo {lo} is above hi {hi}")]
    InvalidEpochRange { lo: u64, hi: u64 },

    #[error("invalid object id: {0}")]
    InvalidOid(String),

    #[error("invalid uuid: {0}")]
    InvalidUuid(String),
}
