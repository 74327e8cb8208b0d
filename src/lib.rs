//! Eventide - event and snapshot persistence for event-sourced aggregates.
//!
//! Stores one aggregate's event stream in an append-only journal table and
//! its latest state in a snapshot table, over a partitioned key-value store
//! modeled on DynamoDB tables with secondary indexes. Every write is checked
//! against the aggregate's stored version (optimistic concurrency) and issued
//! as a single atomic transaction.
//!
//! Two stores implement the same [`storage::EventStore`] contract:
//! - [`storage::memory::InMemoryEventStore`]: in-process reference store
//! - [`storage::dynamo::DynamoEventStore`]: journal + snapshot tables over a
//!   [`storage::dynamo::TableBackend`], with snapshot retention

pub mod codec;
pub mod config;
pub mod domain;
pub mod keys;
pub mod replay;
pub mod storage;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use codec::{CodecError, JsonSerializer, Serializer};
pub use domain::{Aggregate, AggregateId, DomainEvent};
pub use keys::{DefaultKeyResolver, KeyResolver};
pub use storage::{EventStore, Result, StorageError};
