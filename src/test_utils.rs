//! Test fixtures.
//!
//! A small `UserAccount` aggregate with creation and rename events, used by
//! the store tests in this crate and by the contract suites in `tests/`.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Aggregate, AggregateId, DomainEvent};
use crate::replay::Replay;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserAccountId(pub String);

impl UserAccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl AggregateId for UserAccountId {
    const TYPE_NAME: &'static str = "UserAccount";

    fn encode(&self) -> String {
        self.0.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UserAccountChange {
    Created { name: String },
    Renamed { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccountEvent {
    pub id: String,
    pub aggregate_id: UserAccountId,
    pub sequence: u64,
    pub occurred_at: DateTime<Utc>,
    pub change: UserAccountChange,
}

impl DomainEvent for UserAccountEvent {
    type Id = UserAccountId;

    fn event_id(&self) -> String {
        self.id.clone()
    }

    fn aggregate_id(&self) -> &UserAccountId {
        &self.aggregate_id
    }

    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    fn is_created(&self) -> bool {
        matches!(self.change, UserAccountChange::Created { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserAccountId,
    pub name: String,
    pub sequence: u64,
    pub version: u64,
    pub last_updated_at: DateTime<Utc>,
}

impl Aggregate for UserAccount {
    type Id = UserAccountId;

    fn id(&self) -> &UserAccountId {
        &self.id
    }

    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn with_version(self, version: u64) -> Self {
        Self { version, ..self }
    }

    fn last_updated_at(&self) -> DateTime<Utc> {
        self.last_updated_at
    }
}

impl Replay<UserAccountEvent> for UserAccount {
    fn apply(self, event: &UserAccountEvent) -> Self {
        let name = match &event.change {
            UserAccountChange::Created { name } | UserAccountChange::Renamed { name } => {
                name.clone()
            }
        };
        Self {
            name,
            sequence: event.sequence,
            last_updated_at: event.occurred_at,
            ..self
        }
    }
}

/// Fixed base time so event payloads are reproducible.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

impl UserAccount {
    /// New account at sequence 1, version 1, with its creation event.
    pub fn create(id: UserAccountId, name: &str) -> (Self, UserAccountEvent) {
        let event = UserAccountEvent {
            id: format!("{}-1", id.0),
            aggregate_id: id.clone(),
            sequence: 1,
            occurred_at: base_time(),
            change: UserAccountChange::Created {
                name: name.to_string(),
            },
        };
        let account = Self {
            id,
            name: name.to_string(),
            sequence: 1,
            version: 1,
            last_updated_at: event.occurred_at,
        };
        (account, event)
    }

    /// Rename event for the next sequence, and this account with it applied.
    ///
    /// The returned account keeps the current version; the store advances
    /// the stored version when the write succeeds.
    pub fn rename(&self, name: &str) -> (Self, UserAccountEvent) {
        let sequence = self.sequence + 1;
        let event = UserAccountEvent {
            id: format!("{}-{}", self.id.0, sequence),
            aggregate_id: self.id.clone(),
            sequence,
            occurred_at: base_time() + Duration::seconds(sequence as i64),
            change: UserAccountChange::Renamed {
                name: name.to_string(),
            },
        };
        (self.clone().apply(&event), event)
    }
}
