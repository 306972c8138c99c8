//! In-process live fan-out of committed records.

use std::collections::HashMap;
use std::sync::{Mutex, mpsc};

use memstate_core::{Partition, SubscriptionId};

use crate::error::JournalError;
use crate::record::JournalRecord;

type Listeners = Vec<(SubscriptionId, mpsc::Sender<JournalRecord>)>;

/// Per-partition pub/sub for records that have just become durable.
///
/// - No IO
/// - Publication happens only after a record is visible to readers
/// - Unbounded per-listener queues: a slow listener grows its own backlog and
///   never blocks the writer
/// - Listeners whose receiver is gone are dropped while publishing
/// - A partition's entry is removed once its last listener is gone
///
/// The tip handed to a new listener is read from storage while registration
/// holds the lock. A batch that is already durable but not yet published can
/// therefore still reach the listener; positions below its tip are stale and
/// the delivery side discards them.
#[derive(Debug, Default)]
pub struct LiveTail {
    partitions: Mutex<HashMap<Partition, Listeners>>,
}

/// Receiving side of a live registration.
#[derive(Debug)]
pub struct TailListener {
    id: SubscriptionId,
    partition: Partition,
    tip: u64,
    receiver: mpsc::Receiver<JournalRecord>,
}

impl TailListener {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Durable tip of the partition at registration time.
    pub fn tip(&self) -> u64 {
        self.tip
    }

    pub fn receiver(&self) -> &mpsc::Receiver<JournalRecord> {
        &self.receiver
    }
}

impl LiveTail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for records committed from now on.
    ///
    /// `current_tip` must report the durable tip from storage; it runs under
    /// the registration lock.
    pub fn listen(
        &self,
        partition: &Partition,
        current_tip: impl FnOnce() -> Result<u64, JournalError>,
    ) -> Result<TailListener, JournalError> {
        let mut partitions = self
            .partitions
            .lock()
            .map_err(|_| JournalError::Poisoned("live tail"))?;

        let tip = current_tip()?;
        let (tx, rx) = mpsc::channel();
        let id = SubscriptionId::new();
        partitions.entry(partition.clone()).or_default().push((id, tx));

        Ok(TailListener {
            id,
            partition: partition.clone(),
            tip,
            receiver: rx,
        })
    }

    /// Remove a listener; its receiver observes disconnection.
    pub fn unlisten(&self, partition: &Partition, id: SubscriptionId) {
        let mut partitions = match self.partitions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(listeners) = partitions.get_mut(partition) {
            listeners.retain(|(listener, _)| *listener != id);
            if listeners.is_empty() {
                partitions.remove(partition);
            }
        }
    }

    /// Fan out freshly committed records, in position order.
    pub fn publish(&self, partition: &Partition, records: &[JournalRecord]) -> Result<(), JournalError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut partitions = self
            .partitions
            .lock()
            .map_err(|_| JournalError::Poisoned("live tail"))?;
        let Some(listeners) = partitions.get_mut(partition) else {
            return Ok(());
        };

        listeners.retain(|(_, tx)| records.iter().all(|r| tx.send(r.clone()).is_ok()));
        if listeners.is_empty() {
            partitions.remove(partition);
        }

        Ok(())
    }

    pub fn listener_count(&self, partition: &Partition) -> usize {
        self.partitions
            .lock()
            .map(|p| p.get(partition).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Number of partitions with at least one listener.
    pub fn partition_count(&self) -> usize {
        self.partitions.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(partition: &Partition, position: u64) -> JournalRecord {
        JournalRecord::new(partition.clone(), position, json!(position))
    }

    #[test]
    fn listener_sees_only_later_records() {
        let tail = LiveTail::new();
        let p = Partition::of("s").unwrap();
        tail.publish(&p, &[record(&p, 0)]).unwrap();

        let listener = tail.listen(&p, || Ok(1)).unwrap();
        assert_eq!(listener.tip(), 1);

        tail.publish(&p, &[record(&p, 1), record(&p, 2)]).unwrap();
        let got: Vec<u64> = listener.receiver().try_iter().map(|r| r.position()).collect();
        assert_eq!(got, vec![1, 2]);
    }

    #[test]
    fn tip_comes_from_storage_on_every_listen() {
        let tail = LiveTail::new();
        let p = Partition::of("s").unwrap();
        let _first = tail.listen(&p, || Ok(3)).unwrap();
        // Storage moved ahead before the writer published; the new listener must see it.
        let second = tail.listen(&p, || Ok(7)).unwrap();
        assert_eq!(second.tip(), 7);
    }

    #[test]
    fn dropped_listeners_are_pruned() {
        let tail = LiveTail::new();
        let p = Partition::of("s").unwrap();
        let a = tail.listen(&p, || Ok(0)).unwrap();
        let b = tail.listen(&p, || Ok(0)).unwrap();
        assert_eq!(tail.listener_count(&p), 2);

        drop(a);
        tail.publish(&p, &[record(&p, 0)]).unwrap();
        assert_eq!(tail.listener_count(&p), 1);

        tail.unlisten(&p, b.id());
        assert_eq!(tail.listener_count(&p), 0);
        assert_eq!(tail.partition_count(), 0);
        assert!(b.receiver().recv().is_ok());
        assert!(b.receiver().recv().is_err());
    }

    #[test]
    fn partitions_do_not_leak_into_each_other() {
        let tail = LiveTail::new();
        let a = Partition::of("a").unwrap();
        let b = Partition::of("b").unwrap();
        let listener = tail.listen(&a, || Ok(0)).unwrap();
        tail.publish(&b, &[record(&b, 0)]).unwrap();
        assert!(listener.receiver().try_recv().is_err());
    }
}

