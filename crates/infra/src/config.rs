//! Configuration representation.
//!
//! Only the values the engine consumes live here; where they come from (files,
//! environment, flags) is up to the embedding process. `from_json_str` is a
//! convenience for the common case.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use memstate_core::{Partition, StreamName};
use memstate_journal::{StorageProvider, WriterOptions};

use crate::storage::{FileStorageProvider, InMemoryStorageProvider};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which backend stores the journal.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    #[default]
    InMemory,
    File {
        directory: PathBuf,
    },
}

impl StorageConfig {
    /// Build the configured provider.
    pub fn build_provider(&self, options: WriterOptions) -> Arc<dyn StorageProvider> {
        match self {
            StorageConfig::InMemory => Arc::new(InMemoryStorageProvider::with_options(options)),
            StorageConfig::File { directory } => {
                Arc::new(FileStorageProvider::with_options(directory.clone(), options))
            }
        }
    }
}

/// Engine configuration.
///
/// ```json
/// {
///   "stream_name": "orders",
///   "partition_index": 0,
///   "max_batch_size": 64,
///   "storage": { "kind": "file", "directory": "/var/lib/orders" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name of the stream every operation is scoped to.
    pub stream_name: String,
    pub partition_index: u32,
    pub max_batch_size: usize,
    pub storage: StorageConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream_name: "memstate".to_string(),
            partition_index: 0,
            max_batch_size: WriterOptions::default().max_batch_size,
            storage: StorageConfig::InMemory,
        }
    }
}

impl EngineConfig {
    /// In-memory configuration for the named stream.
    pub fn for_stream(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.partition()?;
        if self.max_batch_size == 0 {
            return Err(ConfigError::Invalid("max_batch_size must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn partition(&self) -> Result<Partition, ConfigError> {
        let stream = StreamName::new(self.stream_name.clone())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(Partition::new(stream, self.partition_index))
    }

    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions {
            max_batch_size: self.max_batch_size,
        }
    }

    pub fn build_provider(&self) -> Arc<dyn StorageProvider> {
        self.storage.build_provider(self.writer_options())
    }
}
