//! Journal storage abstraction (mechanics only, no IO).
//!
//! Commands are appended to a partition by a single [`JournalWriter`], read
//! back as bounded snapshots through a [`JournalReader`], and pushed to
//! subscribers through a [`JournalSubscriptionSource`]. Concrete backends
//! implement [`StorageProvider`] and plug a [`JournalSink`] into the shared
//! [`BatchingWriter`].

pub mod error;
pub mod lease;
pub mod live_tail;
pub mod provider;
pub mod reader;
pub mod record;
pub mod splice;
pub mod subscription;
pub mod worker;
pub mod writer;

pub use error::JournalError;
pub use lease::{WriterLease, WriterRegistry};
pub use live_tail::{LiveTail, TailListener};
pub use provider::StorageProvider;
pub use reader::{JournalReader, RecordIter};
pub use record::JournalRecord;
pub use splice::{CatchUpSplice, SplicePhase};
pub use subscription::{
    JournalSubscriptionSource, LiveTailSubscriptionSource, RecordHandler, SubscriptionHandle,
};
pub use writer::{BatchingWriter, JournalSink, JournalWriter, WriterOptions};
