//! Per-subscription delivery thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use memstate_core::{Partition, SubscriptionId};

use crate::error::JournalError;
use crate::live_tail::TailListener;
use crate::reader::{JournalReader, RecordIter};
use crate::record::JournalRecord;
use crate::splice::CatchUpSplice;
use crate::subscription::RecordHandler;

const SHUTDOWN_TICK: Duration = Duration::from_millis(250);

/// Everything a delivery thread needs; consumed by [`spawn`].
pub(crate) struct DeliveryPlan {
    pub listener: TailListener,
    /// History to replay first; `None` for a pure live subscription.
    pub history: Option<RecordIter>,
    pub start: u64,
    pub reader: Arc<dyn JournalReader>,
    pub handler: RecordHandler,
    pub stop: Arc<AtomicBool>,
}

/// Spawn the delivery thread for one subscription.
///
/// - Replays `history` through a [`CatchUpSplice`] while buffering live records
/// - Switches to live forwarding once history is exhausted
/// - Backfills holes in the live feed from the reader
/// - Checks the stop flag before every callback and on a fixed tick
pub(crate) fn spawn(plan: DeliveryPlan) -> Result<thread::JoinHandle<()>, JournalError> {
    let name = format!("memstate-sub-{}", plan.listener.partition());
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || delivery_loop(plan))
        .map_err(|e| JournalError::Spawn(format!("{name}: {e}")))
}

struct Delivery {
    id: SubscriptionId,
    partition: Partition,
    handler: RecordHandler,
    stop: Arc<AtomicBool>,
}

impl Delivery {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Invoke the handler for each record; `false` once the subscription is stopped.
    fn deliver(&mut self, records: Vec<JournalRecord>) -> bool {
        for record in records {
            if self.stopped() {
                return false;
            }
            let position = record.position();
            if let Err(err) = (self.handler)(record) {
                // Handler failures are isolated: log and keep delivering.
                warn!(
                    subscription = %self.id,
                    partition = %self.partition,
                    position,
                    error = ?err,
                    "subscription handler failed"
                );
            }
        }
        true
    }
}

fn delivery_loop(plan: DeliveryPlan) {
    let DeliveryPlan {
        listener,
        history,
        start,
        reader,
        handler,
        stop,
    } = plan;

    let mut delivery = Delivery {
        id: listener.id(),
        partition: listener.partition().clone(),
        handler,
        stop,
    };
    let rx = listener.receiver();

    let mut splice = match history {
        Some(history) => {
            let mut splice = CatchUpSplice::catching_up(start);
            if !catch_up(&mut splice, &mut delivery, &listener, history) {
                return;
            }
            splice
        }
        None => CatchUpSplice::live(start),
    };

    debug!(subscription = %delivery.id, partition = %delivery.partition, position = splice.next_position(), "subscription live");

    loop {
        if delivery.stopped() {
            break;
        }

        match rx.recv_timeout(SHUTDOWN_TICK) {
            Ok(record) => {
                if !delivery.deliver(splice.accept_live(record)) {
                    break;
                }
                if splice.gap().is_some() && !backfill(&mut splice, &mut delivery, &*reader) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(subscription = %delivery.id, partition = %delivery.partition, "subscription stopped");
}

fn catch_up(
    splice: &mut CatchUpSplice,
    delivery: &mut Delivery,
    listener: &TailListener,
    history: RecordIter,
) -> bool {
    for item in history {
        if delivery.stopped() {
            return false;
        }

        // Anything that went live meanwhile is buffered until the scan ends.
        for live in listener.receiver().try_iter() {
            splice.accept_live(live);
        }

        match item {
            Ok(record) => {
                if !delivery.deliver(splice.accept_historical(record)) {
                    return false;
                }
            }
            Err(err) => {
                error!(
                    subscription = %delivery.id,
                    partition = %delivery.partition,
                    error = %err,
                    "catch-up read failed; subscription stopped"
                );
                return false;
            }
        }
    }

    for live in listener.receiver().try_iter() {
        splice.accept_live(live);
    }

    let high_water = splice.high_water();
    if !delivery.deliver(splice.finish_catchup()) {
        return false;
    }

    info!(
        subscription = %delivery.id,
        partition = %delivery.partition,
        high_water = ?high_water,
        next = splice.next_position(),
        "subscription caught up"
    );
    true
}

fn backfill(splice: &mut CatchUpSplice, delivery: &mut Delivery, reader: &dyn JournalReader) -> bool {
    let Some(gap) = splice.gap() else {
        return true;
    };
    warn!(
        subscription = %delivery.id,
        partition = %delivery.partition,
        from = gap.start,
        to = gap.end,
        "live feed has a hole; backfilling from reader"
    );

    let records = match reader.records_from(gap.start) {
        Ok(records) => records,
        Err(err) => {
            error!(subscription = %delivery.id, error = %err, "backfill read failed");
            return true;
        }
    };

    for item in records {
        match item {
            Ok(record) if record.position() < gap.end => {
                if !delivery.deliver(splice.accept_historical(record)) {
                    return false;
                }
            }
            Ok(_) => break,
            Err(err) => {
                error!(subscription = %delivery.id, error = %err, "backfill read failed");
                break;
            }
        }
    }
    true
}
