use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use memstate_core::Partition;

use crate::error::JournalError;
use crate::lease::WriterLease;
use crate::live_tail::LiveTail;
use crate::record::JournalRecord;

/// Appends commands to one partition (single writer per partition).
///
/// ## Append Semantics
///
/// `append()` accepts a command, assigns it the next position and queues it.
/// Queued records become durable on `flush()` (or automatically once the
/// buffer is full). Positions are assigned in the exact order `append` is
/// called.
///
/// ## Failure Semantics
///
/// If the backend cannot persist a batch, every record of that batch is
/// dropped, the position counter rolls back to the last durable position, and
/// [`JournalError::WriteFailure`] is returned to whoever triggered the flush.
/// Records are never silently lost: a caller either sees a successful flush or
/// an error.
///
/// ## Disposal
///
/// `close()` flushes everything accepted so far, then releases backend
/// handles and the partition's writer lease. Dropping an open writer closes
/// it too.
pub trait JournalWriter: Send {
    fn partition(&self) -> &Partition;

    /// Position the next accepted command will receive (counts queued records).
    fn next_position(&self) -> u64;

    /// One past the last durable record.
    fn durable_position(&self) -> u64;

    /// Queue a command; returns its assigned position.
    fn append(&mut self, command: JsonValue) -> Result<u64, JournalError>;

    /// Make every queued record durable and visible to readers and subscribers.
    fn flush(&mut self) -> Result<(), JournalError>;

    /// Flush and release. Idempotent; later appends fail with [`JournalError::Closed`].
    fn close(&mut self) -> Result<(), JournalError>;

    fn is_closed(&self) -> bool;
}

/// Backend half of a writer: durably stores batches of records.
pub trait JournalSink: Send {
    /// Persist a batch atomically.
    ///
    /// On error no record of the batch may be visible to readers.
    fn commit(&mut self, batch: &[JournalRecord]) -> Result<(), JournalError>;

    /// Release backend handles. Called once, after the final flush.
    fn release(&mut self) -> Result<(), JournalError> {
        Ok(())
    }
}

/// Writer tuning shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterOptions {
    /// Queue length that triggers an automatic flush.
    pub max_batch_size: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self { max_batch_size: 64 }
    }
}

/// Buffering [`JournalWriter`] over any [`JournalSink`].
///
/// Owns position assignment, the flush/rollback protocol, publication to the
/// [`LiveTail`] after each successful commit, and release of the writer lease.
pub struct BatchingWriter<S: JournalSink> {
    partition: Partition,
    sink: S,
    tail: Arc<LiveTail>,
    lease: Option<WriterLease>,
    options: WriterOptions,
    pending: Vec<JournalRecord>,
    durable: u64,
    closed: bool,
}

impl<S: JournalSink> BatchingWriter<S> {
    /// Wrap a sink whose partition already holds `durable` records.
    pub fn new(
        lease: WriterLease,
        sink: S,
        durable: u64,
        tail: Arc<LiveTail>,
        options: WriterOptions,
    ) -> Self {
        Self {
            partition: lease.partition().clone(),
            sink,
            tail,
            lease: Some(lease),
            options,
            pending: Vec::new(),
            durable,
            closed: false,
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl<S: JournalSink> JournalWriter for BatchingWriter<S> {
    fn partition(&self) -> &Partition {
        &self.partition
    }

    fn next_position(&self) -> u64 {
        self.durable + self.pending.len() as u64
    }

    fn durable_position(&self) -> u64 {
        self.durable
    }

    fn append(&mut self, command: JsonValue) -> Result<u64, JournalError> {
        if self.closed {
            return Err(JournalError::Closed(self.partition.clone()));
        }

        let position = self.next_position();
        self.pending
            .push(JournalRecord::new(self.partition.clone(), position, command));

        if self.pending.len() >= self.options.max_batch_size.max(1) {
            self.flush()?;
        }

        Ok(position)
    }

    fn flush(&mut self) -> Result<(), JournalError> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.pending);
        if let Err(err) = self.sink.commit(&batch) {
            warn!(
                partition = %self.partition,
                first = batch[0].position(),
                count = batch.len(),
                error = %err,
                "journal commit failed; batch discarded"
            );
            return Err(err);
        }

        self.durable += batch.len() as u64;
        debug!(partition = %self.partition, count = batch.len(), tip = self.durable, "journal batch committed");

        // Durable already; a publication failure only affects live subscribers.
        if let Err(err) = self.tail.publish(&self.partition, &batch) {
            warn!(partition = %self.partition, error = %err, "live tail publication failed");
        }

        Ok(())
    }

    fn close(&mut self) -> Result<(), JournalError> {
        if self.closed {
            return Ok(());
        }

        let flushed = self.flush();
        self.closed = true;
        // Records that failed to flush are gone; the queue must not outlive the writer.
        self.pending.clear();
        let released = self.sink.release();
        self.lease.take();

        flushed.and(released)
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<S: JournalSink> Drop for BatchingWriter<S> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(partition = %self.partition, error = %err, "journal writer close on drop failed");
        }
    }
}
