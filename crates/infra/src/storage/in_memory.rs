use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use memstate_core::Partition;
use memstate_journal::{
    BatchingWriter, JournalError, JournalReader, JournalRecord, JournalSink,
    JournalSubscriptionSource, JournalWriter, LiveTail, LiveTailSubscriptionSource, RecordIter,
    StorageProvider, WriterOptions, WriterRegistry,
};

type Journals = Arc<RwLock<HashMap<Partition, Vec<JournalRecord>>>>;

/// In-memory storage provider.
///
/// Intended for tests/dev. Supports catch-up subscriptions. Clones share the
/// same journals, so an engine can be disposed and restarted against the same
/// data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorageProvider {
    journals: Journals,
    writers: Arc<WriterRegistry>,
    tail: Arc<LiveTail>,
    options: WriterOptions,
}

impl InMemoryStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: WriterOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    fn reader(&self, partition: &Partition) -> InMemoryReader {
        InMemoryReader {
            partition: partition.clone(),
            journals: Arc::clone(&self.journals),
        }
    }
}

impl StorageProvider for InMemoryStorageProvider {
    fn initialize(&self) -> Result<(), JournalError> {
        Ok(())
    }

    fn create_journal_writer(&self, partition: &Partition) -> Result<Box<dyn JournalWriter>, JournalError> {
        let lease = self.writers.acquire(partition)?;
        let durable = self.reader(partition).tip()?;
        let sink = InMemorySink {
            partition: partition.clone(),
            journals: Arc::clone(&self.journals),
        };
        let writer = BatchingWriter::new(lease, sink, durable, Arc::clone(&self.tail), self.options);
        Ok(Box::new(writer))
    }

    fn create_journal_reader(&self, partition: &Partition) -> Result<Box<dyn JournalReader>, JournalError> {
        Ok(Box::new(self.reader(partition)))
    }

    fn create_journal_subscription_source(
        &self,
        partition: &Partition,
    ) -> Result<Box<dyn JournalSubscriptionSource>, JournalError> {
        Ok(Box::new(LiveTailSubscriptionSource::new(
            Arc::new(self.reader(partition)),
            Arc::clone(&self.tail),
            true,
        )))
    }

    fn supports_catchup_subscriptions(&self) -> bool {
        true
    }
}

struct InMemorySink {
    partition: Partition,
    journals: Journals,
}

impl JournalSink for InMemorySink {
    fn commit(&mut self, batch: &[JournalRecord]) -> Result<(), JournalError> {
        let mut journals = self
            .journals
            .write()
            .map_err(|_| JournalError::write("lock poisoned"))?;
        let stream = journals.entry(self.partition.clone()).or_default();

        // Append-only: the batch must continue exactly where the stream ends.
        let expected = stream.len() as u64;
        match batch.first() {
            Some(first) if first.position() != expected => {
                return Err(JournalError::write(format!(
                    "batch starts at {}, stream ends at {expected}",
                    first.position()
                )));
            }
            _ => {}
        }

        stream.extend_from_slice(batch);
        Ok(())
    }
}

#[derive(Debug)]
struct InMemoryReader {
    partition: Partition,
    journals: Journals,
}

impl JournalReader for InMemoryReader {
    fn partition(&self) -> &Partition {
        &self.partition
    }

    fn tip(&self) -> Result<u64, JournalError> {
        let journals = self
            .journals
            .read()
            .map_err(|_| JournalError::read("lock poisoned"))?;
        Ok(journals.get(&self.partition).map(|s| s.len() as u64).unwrap_or(0))
    }

    fn records_from(&self, position: u64) -> Result<RecordIter, JournalError> {
        let journals = self
            .journals
            .read()
            .map_err(|_| JournalError::read("lock poisoned"))?;

        // Snapshot up to the current tip; later appends are not included.
        let snapshot = journals
            .get(&self.partition)
            .map(|stream| {
                let from = usize::try_from(position).unwrap_or(usize::MAX).min(stream.len());
                stream[from..].to_vec()
            })
            .unwrap_or_default();

        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }
}
