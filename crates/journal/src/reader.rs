use memstate_core::Partition;

use crate::error::JournalError;
use crate::record::JournalRecord;

/// Lazily produced, position-ordered records of one partition.
///
/// Decode failures of individual records are yielded in-band so a consumer
/// can tell exactly which position is unreadable.
pub type RecordIter = Box<dyn Iterator<Item = Result<JournalRecord, JournalError>> + Send>;

/// Sequential, snapshot-bounded reads from one partition.
///
/// ## Read Semantics
///
/// `records_from(position)`:
/// - yields records in strictly ascending position order, starting at
///   `position`
/// - is **bounded** by the tip at the moment of the call; records appended
///   afterwards are not included (this is not a live feed)
/// - is **restartable**: calling it again re-reads the same records
/// - yields an empty sequence (not an error) for a range with no data
///
/// Multiple readers may run concurrently with each other and with the
/// partition's writer.
pub trait JournalReader: Send + Sync {
    fn partition(&self) -> &Partition;

    /// Number of durable records in the partition right now.
    fn tip(&self) -> Result<u64, JournalError>;

    fn records_from(&self, position: u64) -> Result<RecordIter, JournalError>;
}

impl<R> JournalReader for std::sync::Arc<R>
where
    R: JournalReader + ?Sized,
{
    fn partition(&self) -> &Partition {
        (**self).partition()
    }

    fn tip(&self) -> Result<u64, JournalError> {
        (**self).tip()
    }

    fn records_from(&self, position: u64) -> Result<RecordIter, JournalError> {
        (**self).records_from(position)
    }
}

impl<R> JournalReader for Box<R>
where
    R: JournalReader + ?Sized,
{
    fn partition(&self) -> &Partition {
        (**self).partition()
    }

    fn tip(&self) -> Result<u64, JournalError> {
        (**self).tip()
    }

    fn records_from(&self, position: u64) -> Result<RecordIter, JournalError> {
        (**self).records_from(position)
    }
}
