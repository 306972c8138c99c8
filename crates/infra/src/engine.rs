//! Command execution engine (replay + serialized execution).
//!
//! The engine owns one model and one journal partition. It implements the
//! **persist-then-apply** pipeline:
//!
//! ```text
//! start:    StorageProvider → JournalReader → replay every record into a fresh model
//! execute:  Command
//!             ↓
//!           1. Validate against current state (rejected commands are never journaled)
//!             ↓
//!           2. Append to the journal and flush (durable)
//!             ↓
//!           3. Apply to the model, advance the cursor
//!             ↓
//!           4. Return the command's output
//! query:    run directly against the model under a read lock
//! ```
//!
//! ## Serialization
//!
//! Every command goes through a single actor thread fed by an mpsc channel,
//! so commands are journaled and applied one at a time in the order `execute`
//! was called, regardless of how many threads call it. That total order is
//! what makes replay deterministic.
//!
//! Queries run on the caller's thread and may overlap each other; the model's
//! write lock is only held while a command is applied, so a query always sees
//! the state after a prefix of completed commands.
//!
//! ## Positions
//!
//! The writer owns the partition's position counter. The engine's cursor is
//! only ever copied from the writer's durable position after a successful
//! flush, so the two cannot diverge.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, mpsc};
use std::thread;

use thiserror::Error;
use tracing::{debug, info, warn};

use memstate_core::{DomainError, Model, Partition, Query};
use memstate_journal::{
    JournalError, JournalReader, JournalWriter, RecordHandler, StorageProvider, SubscriptionHandle,
};

use crate::config::{ConfigError, EngineConfig};

#[derive(Debug, Error)]
pub enum EngineError {
    /// The journal could not persist the command; the model was not touched.
    #[error("write failed: {0}")]
    WriteFailure(String),

    /// A journaled record could not be read, decoded or applied during startup.
    #[error("replay failed at position {position}: {reason}")]
    ReplayCorruption { position: u64, reason: String },

    /// The model refused the command; nothing was journaled.
    #[error("command rejected: {0}")]
    Rejected(#[from] DomainError),

    #[error("command encoding failed: {0}")]
    Encode(String),

    #[error("partition {0} already has an active writer")]
    DuplicateWriter(Partition),

    #[error("catch-up subscription unsupported (requested position {requested}, tip {tip})")]
    UnsupportedSubscription { requested: u64, tip: u64 },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("journal error: {0}")]
    Journal(JournalError),

    #[error("engine is disposed")]
    Disposed,

    #[error("lock poisoned: {0}")]
    Poisoned(&'static str),

    #[error("failed to spawn engine actor: {0}")]
    Spawn(String),
}

impl From<JournalError> for EngineError {
    fn from(value: JournalError) -> Self {
        match value {
            JournalError::WriteFailure(msg) => EngineError::WriteFailure(msg),
            JournalError::DuplicateWriter(partition) => EngineError::DuplicateWriter(partition),
            JournalError::UnsupportedSubscription { requested, tip, .. } => {
                EngineError::UnsupportedSubscription { requested, tip }
            }
            JournalError::Corrupt { position, reason } => EngineError::ReplayCorruption { position, reason },
            other => EngineError::Journal(other),
        }
    }
}

/// Lifecycle of an engine; `Disposed` is terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EngineState {
    Starting,
    Replaying,
    Live,
    Disposed,
}

struct Request<M: Model> {
    command: M::Command,
    reply: mpsc::Sender<Result<M::Output, EngineError>>,
}

/// Event-sourced engine for a single model and journal partition.
///
/// ## Execution Guarantees
///
/// - **Durability**: a command's output is returned only after its record is
///   durable
/// - **Total order**: commands are journaled and applied strictly one at a
///   time, in call order
/// - **Atomic apply**: queries never observe a partially applied command
/// - **Deterministic replay**: restarting against the same partition rebuilds
///   the same model
///
/// ## Error Semantics
///
/// - Rejected by the model → `EngineError::Rejected` (not journaled)
/// - Journal write failed → `EngineError::WriteFailure` (cursor unchanged,
///   model untouched)
/// - Bad record on startup → `EngineError::ReplayCorruption` (start fails)
///
/// The engine never retries; retry policy belongs to the caller.
pub struct Engine<M: Model> {
    partition: Partition,
    provider: Arc<dyn StorageProvider>,
    model: Arc<RwLock<M>>,
    cursor: Arc<AtomicU64>,
    state: Mutex<EngineState>,
    requests: Mutex<Option<mpsc::Sender<Request<M>>>>,
    actor: Mutex<Option<thread::JoinHandle<Result<(), JournalError>>>>,
}

impl<M: Model + Default> Engine<M> {
    /// Start against `provider`, replaying into `M::default()`.
    pub fn start(config: &EngineConfig, provider: Arc<dyn StorageProvider>) -> Result<Self, EngineError> {
        Self::start_with(config, provider, M::default)
    }

    /// Start against the provider described by `config.storage`.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        Self::start(config, config.build_provider())
    }
}

impl<M: Model> Engine<M> {
    /// Open the partition, replay the full journal into `factory()`, then go live.
    ///
    /// Returns only after replay has completed.
    pub fn start_with(
        config: &EngineConfig,
        provider: Arc<dyn StorageProvider>,
        factory: impl FnOnce() -> M,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let partition = config.partition()?;
        info!(partition = %partition, state = ?EngineState::Starting, "engine starting");

        provider.initialize()?;
        let writer = provider.create_journal_writer(&partition)?;
        let reader = provider.create_journal_reader(&partition)?;

        info!(partition = %partition, state = ?EngineState::Replaying, "replaying journal");
        let mut model = factory();
        let replayed = replay(&mut model, &*reader)?;

        let tip = writer.durable_position();
        if replayed != tip {
            return Err(EngineError::ReplayCorruption {
                position: replayed,
                reason: format!("journal tip is {tip} but replay ended at {replayed}"),
            });
        }

        let model = Arc::new(RwLock::new(model));
        let cursor = Arc::new(AtomicU64::new(replayed));
        let (tx, rx) = mpsc::channel();

        let actor = {
            let model = Arc::clone(&model);
            let cursor = Arc::clone(&cursor);
            thread::Builder::new()
                .name(format!("memstate-engine-{partition}"))
                .spawn(move || run_actor(writer, rx, model, cursor))
                .map_err(|e| EngineError::Spawn(e.to_string()))?
        };

        info!(partition = %partition, state = ?EngineState::Live, replayed, "engine live");

        Ok(Self {
            partition,
            provider,
            model,
            cursor,
            state: Mutex::new(EngineState::Live),
            requests: Mutex::new(Some(tx)),
            actor: Mutex::new(Some(actor)),
        })
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn state(&self) -> EngineState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(EngineState::Disposed)
    }

    /// One past the last applied record.
    pub fn next_position(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Journal, then apply, a command; blocks until it is durable and applied.
    pub fn execute(&self, command: M::Command) -> Result<M::Output, EngineError> {
        let (reply, response) = mpsc::channel();
        {
            // Send under the lock so channel order is call order.
            let requests = self
                .requests
                .lock()
                .map_err(|_| EngineError::Poisoned("engine requests"))?;
            let sender = requests.as_ref().ok_or(EngineError::Disposed)?;
            sender
                .send(Request { command, reply })
                .map_err(|_| EngineError::Disposed)?;
        }
        response.recv().map_err(|_| EngineError::Disposed)?
    }

    /// Run a read-only query against the current model.
    pub fn query<Q: Query<M>>(&self, query: Q) -> Result<Q::Output, EngineError> {
        if self.state() != EngineState::Live {
            return Err(EngineError::Disposed);
        }
        let model = self
            .model
            .read()
            .map_err(|_| EngineError::Poisoned("model"))?;
        Ok(query.run(&model))
    }

    /// Subscribe to this engine's partition.
    pub fn subscribe(&self, position: u64, handler: RecordHandler) -> Result<SubscriptionHandle, EngineError> {
        if self.state() != EngineState::Live {
            return Err(EngineError::Disposed);
        }
        let source = self.provider.create_journal_subscription_source(&self.partition)?;
        Ok(source.subscribe(position, handler)?)
    }

    /// Drain queued commands, flush and close the writer, and stop the actor.
    ///
    /// Idempotent.
    pub fn dispose(&self) -> Result<(), EngineError> {
        let sender = self
            .requests
            .lock()
            .map_err(|_| EngineError::Poisoned("engine requests"))?
            .take();
        // Closing the channel lets the actor finish what is queued, then close the writer.
        drop(sender);

        let actor = self
            .actor
            .lock()
            .map_err(|_| EngineError::Poisoned("engine actor"))?
            .take();
        let Some(actor) = actor else {
            return Ok(());
        };

        let closed = actor
            .join()
            .map_err(|_| EngineError::Poisoned("engine actor panicked"))
            .and_then(|result| result.map_err(EngineError::from));

        if let Ok(mut state) = self.state.lock() {
            *state = EngineState::Disposed;
        }
        info!(partition = %self.partition, state = ?EngineState::Disposed, position = self.next_position(), "engine disposed");

        closed
    }
}

impl<M: Model> Drop for Engine<M> {
    fn drop(&mut self) {
        if let Err(err) = self.dispose() {
            warn!(partition = %self.partition, error = %err, "engine dispose on drop failed");
        }
    }
}

fn replay<M: Model>(model: &mut M, reader: &dyn JournalReader) -> Result<u64, EngineError> {
    let mut next = 0u64;

    for item in reader.records_from(0)? {
        let corrupt = |reason: String| EngineError::ReplayCorruption { position: next, reason };

        let record = item.map_err(|e| corrupt(e.to_string()))?;
        if record.position() != next {
            return Err(corrupt(format!("found position {} out of sequence", record.position())));
        }

        let command: M::Command =
            serde_json::from_value(record.into_command()).map_err(|e| corrupt(e.to_string()))?;
        model
            .validate(&command)
            .map_err(|e| corrupt(format!("command rejected on replay: {e}")))?;
        model.apply(&command);

        next += 1;
    }

    debug!(records = next, "replay complete");
    Ok(next)
}

fn run_actor<M: Model>(
    mut writer: Box<dyn JournalWriter>,
    requests: mpsc::Receiver<Request<M>>,
    model: Arc<RwLock<M>>,
    cursor: Arc<AtomicU64>,
) -> Result<(), JournalError> {
    for Request { command, reply } in requests {
        let result = execute_one(writer.as_mut(), &model, &cursor, command);
        if let Err(err) = &result {
            debug!(partition = %writer.partition(), error = %err, "command failed");
        }
        // The caller may have stopped waiting; the command stands either way.
        let _ = reply.send(result);
    }

    writer.close()
}

fn execute_one<M: Model>(
    writer: &mut dyn JournalWriter,
    model: &RwLock<M>,
    cursor: &AtomicU64,
    command: M::Command,
) -> Result<M::Output, EngineError> {
    // 1) Decide (no mutation)
    model
        .read()
        .map_err(|_| EngineError::Poisoned("model"))?
        .validate(&command)?;

    // 2) Persist (durable before apply)
    let payload = serde_json::to_value(&command).map_err(|e| EngineError::Encode(e.to_string()))?;
    let position = writer.append(payload)?;
    writer.flush()?;

    // 3) Apply
    let mut model = model.write().map_err(|_| EngineError::Poisoned("model"))?;
    let output = model.apply(&command);
    let durable = writer.durable_position();
    debug_assert_eq!(durable, position + 1);
    cursor.store(durable, Ordering::Release);

    Ok(output)
}
