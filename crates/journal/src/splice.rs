//! Catch-up/live reconciliation for subscriptions.
//!
//! A catch-up subscription starting at position `P` reads history (the
//! records that existed when it started) while live records keep arriving.
//! The live listener is registered *before* the history snapshot is taken, so
//! the two feeds overlap and every record shows up in at least one of them.
//! `CatchUpSplice` turns the two overlapping feeds into one ordered,
//! gap-free, duplicate-free sequence.
//!
//! The cursor is `next`: everything below it has been delivered. The
//! high-water mark `H` of the catch-up scan is `next - 1`.
//!
//! - While **catching up**, historical records are delivered directly and
//!   live records are buffered.
//! - `finish_catchup` discards buffered records at or below `H`, delivers the
//!   contiguous run that follows and switches to **live**.
//! - While **live**, records are forwarded in order. A record that arrives
//!   ahead of the cursor is held back and the missing range is reported by
//!   [`CatchUpSplice::gap`] so the caller can backfill it from a reader.
//!
//! This type does no IO and owns no threads, so every interleaving can be
//! tested directly.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::record::JournalRecord;

/// Current phase of a splice.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SplicePhase {
    CatchingUp,
    Live,
}

#[derive(Debug)]
pub struct CatchUpSplice {
    phase: SplicePhase,
    start: u64,
    next: u64,
    pending: BTreeMap<u64, JournalRecord>,
}

impl CatchUpSplice {
    /// A splice that first replays history from `start`.
    pub fn catching_up(start: u64) -> Self {
        Self {
            phase: SplicePhase::CatchingUp,
            start,
            next: start,
            pending: BTreeMap::new(),
        }
    }

    /// A splice with no history to replay (subscription from the tip).
    pub fn live(start: u64) -> Self {
        Self {
            phase: SplicePhase::Live,
            ..Self::catching_up(start)
        }
    }

    pub fn phase(&self) -> SplicePhase {
        self.phase
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// Position of the next record to deliver.
    pub fn next_position(&self) -> u64 {
        self.next
    }

    /// Last position delivered so far, if any.
    pub fn high_water(&self) -> Option<u64> {
        (self.next > self.start).then(|| self.next - 1)
    }

    /// Number of records held back.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Accept a record from the history scan (or a backfill read).
    ///
    /// Returns the records that are now deliverable, in order.
    pub fn accept_historical(&mut self, record: JournalRecord) -> Vec<JournalRecord> {
        match self.phase {
            SplicePhase::CatchingUp => {
                let position = record.position();
                if position < self.next {
                    return Vec::new();
                }
                if position > self.next {
                    // History should be contiguous; keep it and let the gap surface later.
                    self.pending.entry(position).or_insert(record);
                    return Vec::new();
                }
                self.next += 1;
                vec![record]
            }
            SplicePhase::Live => self.accept_live(record),
        }
    }

    /// Accept a record from the live tail.
    ///
    /// Returns the records that are now deliverable, in order.
    pub fn accept_live(&mut self, record: JournalRecord) -> Vec<JournalRecord> {
        let position = record.position();
        if position < self.next {
            return Vec::new();
        }

        match self.phase {
            SplicePhase::CatchingUp => {
                self.pending.entry(position).or_insert(record);
                Vec::new()
            }
            SplicePhase::Live => {
                self.pending.entry(position).or_insert(record);
                self.drain_contiguous()
            }
        }
    }

    /// End the history scan and switch to live forwarding.
    ///
    /// Returns the buffered records that follow the high-water mark
    /// contiguously.
    pub fn finish_catchup(&mut self) -> Vec<JournalRecord> {
        self.phase = SplicePhase::Live;
        self.pending = self.pending.split_off(&self.next);
        self.drain_contiguous()
    }

    /// Range of positions missing between the cursor and the first held-back
    /// record, when live delivery is stalled on a hole.
    pub fn gap(&self) -> Option<Range<u64>> {
        if self.phase != SplicePhase::Live {
            return None;
        }
        let (&first, _) = self.pending.first_key_value()?;
        (first > self.next).then(|| self.next..first)
    }

    fn drain_contiguous(&mut self) -> Vec<JournalRecord> {
        let mut ready = Vec::new();
        while let Some(record) = self.pending.remove(&self.next) {
            self.next += 1;
            ready.push(record);
        }
        ready
    }
}
