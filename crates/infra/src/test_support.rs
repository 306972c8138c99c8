//! Fixtures shared by the engine and integration tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use memstate_core::{DomainError, DomainResult, Model, Partition};
use memstate_journal::{
    JournalError, JournalReader, JournalSubscriptionSource, JournalWriter, StorageProvider,
};

use crate::config::EngineConfig;
use crate::storage::InMemoryStorageProvider;

pub fn config() -> EngineConfig {
    EngineConfig::for_stream("strings")
}

/// List of distinct strings; every add returns the new length.
#[derive(Debug, Default)]
pub struct StringList {
    pub items: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddString {
    pub value: String,
}

impl AddString {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into() }
    }
}

impl Model for StringList {
    type Command = AddString;
    type Output = usize;

    fn validate(&self, command: &AddString) -> DomainResult<()> {
        if command.value.is_empty() {
            return Err(DomainError::validation("value must not be empty"));
        }
        if self.items.contains(&command.value) {
            return Err(DomainError::invariant(format!("{:?} is already listed", command.value)));
        }
        Ok(())
    }

    fn apply(&mut self, command: &AddString) -> usize {
        self.items.push(command.value.clone());
        self.items.len()
    }
}

/// In-memory provider whose writers refuse appends while `fail` is set.
#[derive(Clone)]
pub struct FlakyProvider {
    inner: InMemoryStorageProvider,
    fail: Arc<AtomicBool>,
}

impl FlakyProvider {
    pub fn new(fail: Arc<AtomicBool>) -> Self {
        Self {
            inner: InMemoryStorageProvider::new(),
            fail,
        }
    }
}

impl StorageProvider for FlakyProvider {
    fn initialize(&self) -> Result<(), JournalError> {
        self.inner.initialize()
    }

    fn create_journal_writer(&self, partition: &Partition) -> Result<Box<dyn JournalWriter>, JournalError> {
        Ok(Box::new(FlakyWriter {
            inner: self.inner.create_journal_writer(partition)?,
            fail: Arc::clone(&self.fail),
        }))
    }

    fn create_journal_reader(&self, partition: &Partition) -> Result<Box<dyn JournalReader>, JournalError> {
        self.inner.create_journal_reader(partition)
    }

    fn create_journal_subscription_source(
        &self,
        partition: &Partition,
    ) -> Result<Box<dyn JournalSubscriptionSource>, JournalError> {
        self.inner.create_journal_subscription_source(partition)
    }

    fn supports_catchup_subscriptions(&self) -> bool {
        self.inner.supports_catchup_subscriptions()
    }
}

struct FlakyWriter {
    inner: Box<dyn JournalWriter>,
    fail: Arc<AtomicBool>,
}

impl JournalWriter for FlakyWriter {
    fn partition(&self) -> &Partition {
        self.inner.partition()
    }

    fn next_position(&self) -> u64 {
        self.inner.next_position()
    }

    fn durable_position(&self) -> u64 {
        self.inner.durable_position()
    }

    fn append(&mut self, command: JsonValue) -> Result<u64, JournalError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(JournalError::write("disk unavailable"));
        }
        self.inner.append(command)
    }

    fn flush(&mut self) -> Result<(), JournalError> {
        self.inner.flush()
    }

    fn close(&mut self) -> Result<(), JournalError> {
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
