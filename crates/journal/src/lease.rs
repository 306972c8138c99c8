//! Single-writer discipline per partition.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use memstate_core::Partition;

use crate::error::JournalError;

/// Tracks which partitions currently have an open writer.
///
/// Backends share one registry across every writer they open. Readers and
/// subscriptions never take a lease.
#[derive(Debug, Default)]
pub struct WriterRegistry {
    active: Mutex<HashSet<Partition>>,
}

impl WriterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the partition for a new writer.
    ///
    /// Fails with [`JournalError::DuplicateWriter`] while another lease for
    /// the same partition is alive.
    pub fn acquire(self: &Arc<Self>, partition: &Partition) -> Result<WriterLease, JournalError> {
        let mut active = self
            .active
            .lock()
            .map_err(|_| JournalError::Poisoned("writer registry"))?;

        if !active.insert(partition.clone()) {
            return Err(JournalError::DuplicateWriter(partition.clone()));
        }

        Ok(WriterLease {
            registry: Arc::clone(self),
            partition: partition.clone(),
        })
    }

    pub fn is_active(&self, partition: &Partition) -> bool {
        self.active
            .lock()
            .map(|active| active.contains(partition))
            .unwrap_or(false)
    }
}

/// Proof of exclusive write access to a partition; released on drop.
#[derive(Debug)]
pub struct WriterLease {
    registry: Arc<WriterRegistry>,
    partition: Partition,
}

impl WriterLease {
    pub fn partition(&self) -> &Partition {
        &self.partition
    }
}

impl Drop for WriterLease {
    fn drop(&mut self) {
        // Release even if another thread poisoned the lock; the set itself is still valid.
        let mut active = match self.registry.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        active.remove(&self.partition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let registry = Arc::new(WriterRegistry::new());
        let partition = Partition::of("orders").unwrap();

        let lease = registry.acquire(&partition).unwrap();
        assert!(registry.is_active(&partition));
        assert!(matches!(
            registry.acquire(&partition),
            Err(JournalError::DuplicateWriter(p)) if p == partition
        ));

        drop(lease);
        assert!(!registry.is_active(&partition));
        assert!(registry.acquire(&partition).is_ok());
    }

    #[test]
    fn partitions_are_independent() {
        let registry = Arc::new(WriterRegistry::new());
        let a = Partition::of("a").unwrap();
        let b = Partition::of("b").unwrap();
        let _la = registry.acquire(&a).unwrap();
        let _lb = registry.acquire(&b).unwrap();
    }
}
