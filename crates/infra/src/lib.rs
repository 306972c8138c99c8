//! Infrastructure layer: storage backends, config, and the execution engine.

pub mod config;
pub mod engine;
pub mod storage;

pub use config::{ConfigError, EngineConfig, StorageConfig};
pub use engine::{Engine, EngineError, EngineState};
pub use storage::{FileStorageProvider, InMemoryStorageProvider};

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod integration_tests;
