use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use memstate_core::{Partition, RecordId};

/// A command persisted in a partition, tagged with its position.
///
/// This is the unit a writer appends and a reader or subscription yields.
///
/// Notes:
/// - **Positions** are zero-based and contiguous within a partition; the
///   writer assigns them in append order.
/// - **Immutable**: once created by a writer a record never changes.
/// - `command` is the opaque, already-encoded command payload. Storage never
///   interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    record_id: RecordId,
    partition: Partition,

    /// Zero-based offset within the partition.
    position: u64,

    written_at: DateTime<Utc>,
    command: JsonValue,
}

impl JournalRecord {
    pub fn new(partition: Partition, position: u64, command: JsonValue) -> Self {
        Self {
            record_id: RecordId::new(),
            partition,
            position,
            written_at: Utc::now(),
            command,
        }
    }

    pub fn record_id(&self) -> RecordId {
        self.record_id
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn written_at(&self) -> DateTime<Utc> {
        self.written_at
    }

    pub fn command(&self) -> &JsonValue {
        &self.command
    }

    pub fn into_command(self) -> JsonValue {
        self.command
    }
}
