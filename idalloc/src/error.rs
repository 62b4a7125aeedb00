//! Error types for id allocation.

use common::{DeserializeError, DurableError};

use crate::model::IdType;

/// Error type for id allocation operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Persisting or recovering local state failed.
    Storage(String),

    /// Encoding or decoding errors.
    Encoding(String),

    /// Invalid input or parameter errors.
    InvalidInput(String),

    /// Local state disagrees with the replicated state. Not recoverable.
    IllegalState(String),

    /// No more ids can be handed out for this type.
    IdCapacityExceeded { id_type: IdType, max_id: u64 },

    /// The replication layer failed to deliver a command.
    Replication(String),

    /// Internal errors indicating bugs or invariant violations.
    Internal(String),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Storage(msg) => write!(f, "Storage error: {}", msg),
            Error::Encoding(msg) => write!(f, "Encoding error: {}", msg),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Error::IllegalState(msg) => write!(f, "Illegal state: {}", msg),
            Error::IdCapacityExceeded { id_type, max_id } => {
                write!(f, "Id capacity exceeded for {}: max id is {}", id_type, max_id)
            }
            Error::Replication(msg) => write!(f, "Replication error: {}", msg),
            Error::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<DurableError> for Error {
    fn from(err: DurableError) -> Self {
        match err {
            DurableError::Io(msg) => Error::Storage(msg),
            DurableError::NoRecoverableState(msg) => Error::IllegalState(msg),
            DurableError::Corrupt(msg) => Error::Storage(format!("corrupt state: {}", msg)),
        }
    }
}

impl From<DeserializeError> for Error {
    fn from(err: DeserializeError) -> Self {
        Error::Encoding(err.message)
    }
}

/// Result type alias for id allocation operations.
pub type Result<T> = std::result::Result<T, Error>;
