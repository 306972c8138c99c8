use std::sync::Arc;

use memstate_core::Partition;

use crate::error::JournalError;
use crate::reader::JournalReader;
use crate::subscription::JournalSubscriptionSource;
use crate::writer::JournalWriter;

/// Pluggable storage backend: factory for writers, readers and subscription
/// sources over a fixed capability set.
///
/// Backends are selected at configuration time and used through
/// `Arc<dyn StorageProvider>`; the engine never depends on a concrete type.
///
/// ## Implementation Requirements
///
/// Implementations must:
/// - make `initialize` idempotent
/// - fail a second `create_journal_writer` for a partition that still has an
///   open writer with [`JournalError::DuplicateWriter`]
/// - only expose durable records to readers and subscribers
/// - report honestly whether catch-up subscriptions are supported
pub trait StorageProvider: Send + Sync {
    /// Prepare backend resources (directories, tables, connections).
    fn initialize(&self) -> Result<(), JournalError>;

    fn create_journal_writer(&self, partition: &Partition) -> Result<Box<dyn JournalWriter>, JournalError>;

    fn create_journal_reader(&self, partition: &Partition) -> Result<Box<dyn JournalReader>, JournalError>;

    fn create_journal_subscription_source(
        &self,
        partition: &Partition,
    ) -> Result<Box<dyn JournalSubscriptionSource>, JournalError>;

    fn supports_catchup_subscriptions(&self) -> bool;
}

impl<S> StorageProvider for Arc<S>
where
    S: StorageProvider + ?Sized,
{
    fn initialize(&self) -> Result<(), JournalError> {
        (**self).initialize()
    }

    fn create_journal_writer(&self, partition: &Partition) -> Result<Box<dyn JournalWriter>, JournalError> {
        (**self).create_journal_writer(partition)
    }

    fn create_journal_reader(&self, partition: &Partition) -> Result<Box<dyn JournalReader>, JournalError> {
        (**self).create_journal_reader(partition)
    }

    fn create_journal_subscription_source(
        &self,
        partition: &Partition,
    ) -> Result<Box<dyn JournalSubscriptionSource>, JournalError> {
        (**self).create_journal_subscription_source(partition)
    }

    fn supports_catchup_subscriptions(&self) -> bool {
        (**self).supports_catchup_subscriptions()
    }
}
