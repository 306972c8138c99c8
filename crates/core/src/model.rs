//! Model and query traits for event-sourced in-memory state.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::DomainResult;

/// Application-defined in-memory state evolved only by commands.
///
/// The model is never persisted directly. Every command is appended to the
/// journal first and then applied, and on startup the model is rebuilt by
/// applying every journaled command in order to a fresh instance.
///
/// ## Execution semantics
///
/// - **Decision**: `validate(&self, cmd)` may refuse a command. Refused
///   commands are never journaled.
/// - **Mutation**: `apply(&mut self, cmd)` evolves state and returns the
///   command's result. It must be deterministic and must not perform IO:
///   replaying the same journal against a fresh model has to reproduce the
///   same state.
///
/// ## Design constraints
///
/// - `Command` is serialized into the journal payload, so it must round-trip
///   through serde.
/// - Queries run concurrently with each other on caller threads, hence
///   `Send + Sync`.
pub trait Model: Send + Sync + 'static {
    type Command: Clone + core::fmt::Debug + Serialize + DeserializeOwned + Send + 'static;
    type Output: Send + 'static;

    /// Check a command against the current state without mutating it.
    ///
    /// Called before the command is journaled, and again for every record
    /// during replay.
    fn validate(&self, _command: &Self::Command) -> DomainResult<()> {
        Ok(())
    }

    /// Apply a command that has already been made durable.
    fn apply(&mut self, command: &Self::Command) -> Self::Output;
}

/// A read-only request served from the current model state.
///
/// Closures `Fn(&M) -> R` are queries.
pub trait Query<M> {
    type Output;

    fn run(&self, model: &M) -> Self::Output;
}

impl<M, F, R> Query<M> for F
where
    F: Fn(&M) -> R,
{
    type Output = R;

    fn run(&self, model: &M) -> R {
        self(model)
    }
}
