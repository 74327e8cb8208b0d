//! Storage implementations.
//!
//! [`EventStore`] is the persistence contract for one aggregate kind.
//! Implementations:
//! - [`memory::InMemoryEventStore`]: in-process maps behind one lock
//! - [`dynamo::DynamoEventStore`]: journal and snapshot tables with
//!   transactional, version-checked writes

use thiserror::Error;

use crate::codec::CodecError;

pub mod dynamo;
mod event_store;
pub mod helpers;
pub mod memory;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use dynamo::{BackendError, DynamoEventStore};
pub use event_store::{EventStore, IdOf};
pub use memory::InMemoryEventStore;

/// Errors returned by [`EventStore`] operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The caller passed arguments the operation does not accept.
    #[error("Invalid argument: {0}")]
    Validation(String),

    /// The stored version did not match the caller's.
    ///
    /// `expected: None` means the caller tried to create an aggregate that
    /// already exists. Re-read the aggregate and retry.
    #[error("Optimistic lock failed for {aggregate_id}: expected version {expected:?}, found {actual:?}")]
    OptimisticLock {
        aggregate_id: String,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    /// A versioned write targeted an aggregate with no snapshot.
    #[error("Aggregate not found: {aggregate_id}")]
    NotFound { aggregate_id: String },

    /// A record for this aggregate and sequence was already written.
    #[error("Duplicate event: aggregate={aggregate_id}, sequence={sequence}")]
    DuplicateEvent { aggregate_id: String, sequence: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[source] CodecError),

    #[error("Deserialization error: {0}")]
    Deserialization(#[source] CodecError),

    /// A stored item lacks an attribute or holds one of the wrong type.
    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Backend error: {0}")]
    Backend(#[source] BackendError),
}

impl From<CodecError> for StorageError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Encode(_) => StorageError::Serialization(err),
            CodecError::Decode(_) => StorageError::Deserialization(err),
        }
    }
}

impl From<BackendError> for StorageError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::MalformedItem { .. } => StorageError::MalformedRecord(err.to_string()),
            other => StorageError::Backend(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
