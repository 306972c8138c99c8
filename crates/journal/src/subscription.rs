//! Push-based subscriptions to a partition.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tracing::{info, warn};

use memstate_core::{Partition, SubscriptionId};

use crate::error::JournalError;
use crate::live_tail::LiveTail;
use crate::reader::JournalReader;
use crate::record::JournalRecord;
use crate::worker::{self, DeliveryPlan};

/// Callback invoked for every delivered record, on the subscription's own thread.
///
/// An `Err` is logged and delivery continues with the next record.
pub type RecordHandler = Box<dyn FnMut(JournalRecord) -> anyhow::Result<()> + Send + 'static>;

/// Produces ordered, gap-free delivery of records from a start position.
///
/// ## Delivery Guarantees
///
/// For a subscription started at position `P` on a catch-up capable source:
/// - **Completeness**: every record at a position `>= P`, existing or future,
///   is delivered exactly once
/// - **Order**: records are delivered in strictly ascending position order
/// - **No seam**: records written while history is being replayed are neither
///   duplicated nor skipped
///
/// A source without catch-up support only accepts `P` equal to the current
/// tip and fails any other request immediately with
/// [`JournalError::UnsupportedSubscription`], creating no state.
///
/// ## Execution Context
///
/// Callbacks run on a dedicated thread per subscription. A slow or failing
/// subscriber never blocks the writer or other subscribers.
pub trait JournalSubscriptionSource: Send + Sync {
    fn supports_catchup(&self) -> bool;

    fn subscribe(&self, position: u64, handler: RecordHandler) -> Result<SubscriptionHandle, JournalError>;
}

/// Owner-side handle of a running subscription.
///
/// Disposing (or dropping) the handle stops delivery: callbacks already in
/// flight finish, and no callback starts after `dispose` returns.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    partition: Partition,
    start: u64,
    stop: Arc<AtomicBool>,
    tail: Arc<LiveTail>,
    worker: Option<thread::JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn start_position(&self) -> u64 {
        self.start
    }

    /// `false` once disposed, or after the delivery thread gave up.
    pub fn is_active(&self) -> bool {
        !self.stop.load(Ordering::Acquire)
            && self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    pub fn dispose(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        // Dropping the sender wakes the worker immediately.
        self.tail.unlisten(&self.partition, self.id);

        let Some(worker) = self.worker.take() else {
            return;
        };
        // Disposing from inside a callback must not join the calling thread.
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            warn!(subscription = %self.id, partition = %self.partition, "subscription worker panicked");
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// [`JournalSubscriptionSource`] for any backend that offers a reader and a
/// [`LiveTail`].
///
/// The live listener is registered before history is read, so the two feeds
/// overlap and the delivery thread reconciles them with a
/// [`crate::CatchUpSplice`].
pub struct LiveTailSubscriptionSource {
    reader: Arc<dyn JournalReader>,
    tail: Arc<LiveTail>,
    catch_up: bool,
}

impl LiveTailSubscriptionSource {
    pub fn new(reader: Arc<dyn JournalReader>, tail: Arc<LiveTail>, catch_up: bool) -> Self {
        Self {
            reader,
            tail,
            catch_up,
        }
    }
}

impl JournalSubscriptionSource for LiveTailSubscriptionSource {
    fn supports_catchup(&self) -> bool {
        self.catch_up
    }

    fn subscribe(&self, position: u64, handler: RecordHandler) -> Result<SubscriptionHandle, JournalError> {
        let partition = self.reader.partition().clone();
        let listener = self.tail.listen(&partition, || self.reader.tip())?;
        let tip = listener.tip();

        if !self.catch_up && position != tip {
            self.tail.unlisten(&partition, listener.id());
            return Err(JournalError::UnsupportedSubscription {
                partition,
                requested: position,
                tip,
            });
        }

        let history = if position < tip {
            match self.reader.records_from(position) {
                Ok(history) => Some(history),
                Err(err) => {
                    self.tail.unlisten(&partition, listener.id());
                    return Err(err);
                }
            }
        } else {
            None
        };

        let id = listener.id();
        let stop = Arc::new(AtomicBool::new(false));
        let plan = DeliveryPlan {
            listener,
            history,
            start: position,
            reader: Arc::clone(&self.reader),
            handler,
            stop: Arc::clone(&stop),
        };

        let worker = match worker::spawn(plan) {
            Ok(worker) => worker,
            Err(err) => {
                self.tail.unlisten(&partition, id);
                return Err(err);
            }
        };

        info!(subscription = %id, partition = %partition, position, tip, "subscription started");

        Ok(SubscriptionHandle {
            id,
            partition,
            start: position,
            stop,
            tail: Arc::clone(&self.tail),
            worker: Some(worker),
        })
    }
}
