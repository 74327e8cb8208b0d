//! DynamoDB-backed event store.
//!
//! [`DynamoEventStore`] speaks to its tables through the [`TableBackend`]
//! seam. [`DynamoBackend`] implements it over `aws-sdk-dynamodb`;
//! `MockTableBackend` implements it in memory for tests.

pub mod backend;
#[cfg(feature = "dynamo")]
mod client;
mod event_store;
pub mod retention;
pub mod schema;


pub use backend::{
    BackendError, BackendResult, IndexQuery, ItemKey, JournalRecord, SequenceBound,
    SnapshotCondition, SnapshotRecord, TableBackend, TransactWrite,
};
#[cfg(feature = "dynamo")]
pub use client::DynamoBackend;
pub use event_store::DynamoEventStore;
pub use retention::{RetentionPolicy, SnapshotRetention};
pub use schema::TableNames;
