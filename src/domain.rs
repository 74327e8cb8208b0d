//! Capabilities the stores need from domain types.
//!
//! A store is generic over one aggregate type and its event type. Both refer
//! to the same identity type, which supplies the aggregate kind name and the
//! string form used in storage keys and index lookups.

use std::fmt::Debug;
use std::hash::Hash;

use chrono::{DateTime, Utc};

/// Identity of one aggregate instance.
pub trait AggregateId: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    /// Name shared by every instance of this aggregate kind.
    ///
    /// Prefixes partition and sort keys, so it must never change once data
    /// has been written.
    const TYPE_NAME: &'static str;

    /// Lossless string encoding, unique within [`Self::TYPE_NAME`].
    fn encode(&self) -> String;
}

/// An immutable fact recording one state transition of an aggregate.
pub trait DomainEvent: Send + Sync + 'static {
    type Id: AggregateId;

    /// Unique id of this event, distinct from the aggregate identity.
    fn event_id(&self) -> String;

    fn aggregate_id(&self) -> &Self::Id;

    /// The aggregate's sequence number when this event was produced.
    ///
    /// Starts at 1 with the creation event and increases by 1 per event.
    fn sequence(&self) -> u64;

    fn occurred_at(&self) -> DateTime<Utc>;

    /// True for the single event that starts the aggregate's lifeline.
    fn is_created(&self) -> bool;
}

/// Point-in-time state of an aggregate, as stored in a snapshot.
pub trait Aggregate: Send + Sync + 'static {
    type Id: AggregateId;

    fn id(&self) -> &Self::Id;

    /// Number of events applied so far.
    fn sequence(&self) -> u64;

    /// Optimistic-lock counter. 1 after creation, +1 per successful write.
    fn version(&self) -> u64;

    /// Return this state with its version replaced.
    ///
    /// Stores call this on read so the returned value carries the version
    /// tracked on the stored record.
    fn with_version(self, version: u64) -> Self
    where
        Self: Sized;

    fn last_updated_at(&self) -> DateTime<Utc>;
}
