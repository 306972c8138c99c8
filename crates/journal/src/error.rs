use thiserror::Error;

use memstate_core::Partition;

/// Journal operation error.
///
/// These are **infrastructure errors** (persistence, decoding, capability and
/// ownership violations) as opposed to domain errors raised by a model.
///
/// ## Error Categories
///
/// - **WriteFailure**: the backend could not persist accepted appends; the
///   partition position did not advance
/// - **ReadFailure** / **Corrupt**: stored records could not be read or decoded
/// - **DuplicateWriter**: single-writer discipline violated
/// - **UnsupportedSubscription**: catch-up requested from an incapable backend
/// - **Closed**: the writer was already closed
/// - **Poisoned**: an internal lock was poisoned by a panicking thread
/// - **Spawn**: a delivery thread could not be started
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("write failed: {0}")]
    WriteFailure(String),

    #[error("read failed: {0}")]
    ReadFailure(String),

    #[error("corrupt record at position {position}: {reason}")]
    Corrupt { position: u64, reason: String },

    #[error("partition {0} already has an active writer")]
    DuplicateWriter(Partition),

    #[error(
        "catch-up subscriptions are not supported (partition {partition}, requested position {requested}, tip {tip})"
    )]
    UnsupportedSubscription {
        partition: Partition,
        requested: u64,
        tip: u64,
    },

    #[error("writer for partition {0} is closed")]
    Closed(Partition),

    #[error("lock poisoned: {0}")]
    Poisoned(&'static str),

    #[error("failed to spawn {0}")]
    Spawn(String),
}

impl JournalError {
    pub fn write(msg: impl Into<String>) -> Self {
        Self::WriteFailure(msg.into())
    }

    pub fn read(msg: impl Into<String>) -> Self {
        Self::ReadFailure(msg.into())
    }

    pub fn corrupt(position: u64, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            position,
            reason: reason.into(),
        }
    }
}
