//! `memstate-core`: building blocks shared by the journal and the engine.
//!
//! This crate contains **pure** primitives (no IO, no threads).

pub mod error;
pub mod id;
pub mod model;
pub mod partition;

pub use error::{DomainError, DomainResult};
pub use id::{RecordId, SubscriptionId};
pub use model::{Model, Query};
pub use partition::{Partition, StreamName};
