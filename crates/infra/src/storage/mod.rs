//! Reference storage backends.
//!
//! The storage contract itself lives in `memstate-journal` as pure mechanics.
//! This module provides concrete providers selected at configuration time.

pub mod file;
pub mod in_memory;

pub use file::FileStorageProvider;
pub use in_memory::InMemoryStorageProvider;
