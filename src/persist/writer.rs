//! The persistence writer loop: a dedicated thread that drains the
//! ring buffer, batches snapshots into transactions, and finalizes the
//! session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rusqlite::params;
use tracing::{error, warn};

use crate::record::UNDEF_PRICE;
use crate::ring::RingBuffer;
use crate::snapshot::{BookSnapshot, LevelEntry};

use super::error::PersistError;
use super::session::{SessionStats, SessionStore};
use super::{drop_indexes, recreate_indexes};

/// Default batch size: one transaction covers this many snapshots
/// before it is committed.
pub const BATCH_SIZE: usize = 50_000;

const WRITER_IDLE_SLEEP: Duration = Duration::from_millis(1);
const CANCELLED_MESSAGE: &str = "cancelled";

/// Final book state captured by the ingest thread at end of stream, for
/// the writer to publish alongside session stats.
#[derive(Debug, Clone, Copy)]
pub struct FinalBookState {
    pub total_orders: usize,
    pub bid_levels: usize,
    pub ask_levels: usize,
    pub best_bid: i64,
    pub best_ask: i64,
    pub spread: i64,
}

/// Shared handles the ingest thread uses to hand statistics and
/// shutdown signals to the writer thread.
#[derive(Clone)]
pub struct WriterHandle {
    pub(crate) ring: Arc<RingBuffer<BookSnapshot>>,
    pub(crate) processing_active: Arc<AtomicBool>,
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) final_stats: Arc<Mutex<Option<SessionStats>>>,
    pub(crate) final_book_state: Arc<Mutex<Option<FinalBookState>>>,
    pub(crate) ingest_error: Arc<Mutex<Option<String>>>,
}

impl WriterHandle {
    pub fn new(ring: Arc<RingBuffer<BookSnapshot>>) -> Self {
        WriterHandle {
            ring,
            processing_active: Arc::new(AtomicBool::new(true)),
            stop: Arc::new(AtomicBool::new(false)),
            final_stats: Arc::new(Mutex::new(None)),
            final_book_state: Arc::new(Mutex::new(None)),
            ingest_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Record a fatal ingest-side failure (a decode error or a
    /// non-tolerated [`crate::book::BookError`]) for the writer to
    /// publish as the session's error text. Does not itself stop the
    /// writer; the caller still calls
    /// [`mark_processing_complete`](Self::mark_processing_complete) so
    /// the writer's loop observes `processing_active` going low.
    pub fn report_fatal(&self, message: impl Into<String>) {
        *self.ingest_error.lock().unwrap() = Some(message.into());
    }

    /// Push a snapshot; blocks if the ring buffer is momentarily full.
    pub fn push(&self, snapshot: BookSnapshot) {
        self.ring.push(snapshot);
    }

    /// Called by the ingest thread's supervisor once the decoder yields
    /// no more records: publishes final stats with a release fence,
    /// clears `processing_active`, and wakes the writer.
    pub fn mark_processing_complete(&self, stats: SessionStats, book_state: Option<FinalBookState>) {
        *self.final_stats.lock().unwrap() = Some(stats);
        *self.final_book_state.lock().unwrap() = book_state;
        self.processing_active.store(false, Ordering::Release);
        self.ring.notify_all();
    }

    /// Request cancellation: the writer finishes its in-flight batch,
    /// flushes, then marks the session `error` with text `"cancelled"`.
    pub fn cancel(&self) {
        self.stop.store(true, Ordering::Release);
        self.ring.notify_all();
    }
}

/// Owns the persistence connection and session row exclusively for the
/// lifetime of the writer thread.
pub struct Writer {
    handle: WriterHandle,
    session: SessionStore,
}

impl Writer {
    pub fn new(handle: WriterHandle, session: SessionStore) -> Self {
        Writer { handle, session }
    }

    /// Run the writer loop to completion. Intended to be the body of a
    /// dedicated `std::thread`.
    pub fn run(mut self) -> rusqlite::Result<()> {
        drop_indexes(self.session.conn())?;

        let mut batch: Vec<BookSnapshot> = Vec::with_capacity(BATCH_SIZE);
        let mut snapshots_written: u64 = 0;
        let mut session_failed: Option<String> = None;
        let mut cancelled = false;

        'outer: loop {
            match self.handle.ring.try_pop() {
                Some(snapshot) => {
                    batch.push(snapshot);
                    if batch.len() >= BATCH_SIZE {
                        if let Err(e) = self.flush(&mut batch, &mut snapshots_written) {
                            if let PersistError::Connection { .. } = e {
                                session_failed = Some(e.to_string());
                                break 'outer;
                            }
                            warn!(error = %e, "batch dropped after row-level failure");
                        }
                    }
                }
                None => {
                    if let Err(e) = self.flush(&mut batch, &mut snapshots_written) {
                        if let PersistError::Connection { .. } = e {
                            session_failed = Some(e.to_string());
                            break 'outer;
                        }
                        warn!(error = %e, "batch dropped after row-level failure");
                    }

                    let exhausted = !self.handle.processing_active.load(Ordering::Acquire)
                        && self.handle.ring.is_empty();
                    if exhausted {
                        break 'outer;
                    }
                    if self.handle.stop.load(Ordering::Acquire) {
                        cancelled = true;
                        break 'outer;
                    }
                    thread::sleep(WRITER_IDLE_SLEEP);
                }
            }
        }

        if session_failed.is_some() {
            self.drain_discard();
        } else {
            let _ = self.flush(&mut batch, &mut snapshots_written);
        }

        recreate_indexes(self.session.conn())?;

        // Acquire fence: read stats published by the ingest thread's
        // release in `mark_processing_complete`.
        let stats = self.handle.final_stats.lock().unwrap().clone();
        let book_state = *self.handle.final_book_state.lock().unwrap();

        if let Some(stats) = stats {
            self.session.update_stats(&stats)?;
        }
        if let Some(book_state) = book_state {
            if book_state.total_orders > 0 || book_state.bid_levels > 0 || book_state.ask_levels > 0 {
                self.session.update_final_book_state(
                    book_state.total_orders,
                    book_state.bid_levels,
                    book_state.ask_levels,
                    book_state.best_bid,
                    book_state.best_ask,
                    book_state.spread,
                )?;
            }
        }

        // An ingest-side fault (decode error or non-tolerated BookError)
        // takes priority: it is the root cause even if it also produced
        // a connection-level write failure downstream.
        let ingest_err = self.handle.ingest_error.lock().unwrap().clone();

        match ingest_err.or(session_failed) {
            Some(err) => {
                self.session.mark_error();
                self.session.end(false, Some(&err), snapshots_written)?;
            }
            None if cancelled => {
                self.session.mark_error();
                self.session.end(false, Some(CANCELLED_MESSAGE), snapshots_written)?;
            }
            None => {
                self.session.mark_complete();
                self.session.end(true, None, snapshots_written)?;
            }
        }
        Ok(())
    }

    /// Pop and discard the remainder of the ring buffer without
    /// persisting, after a connection-level failure (§7).
    fn drain_discard(&self) {
        loop {
            if self.handle.ring.try_pop().is_some() {
                continue;
            }
            let exhausted = !self.handle.processing_active.load(Ordering::Acquire)
                && self.handle.ring.is_empty();
            if exhausted || self.handle.stop.load(Ordering::Acquire) {
                return;
            }
            thread::sleep(WRITER_IDLE_SLEEP);
        }
    }

    /// Write one batch as a single transaction. Column order matches
    /// §4.E.2 exactly.
    fn flush(&mut self, batch: &mut Vec<BookSnapshot>, written: &mut u64) -> Result<(), PersistError> {
        if batch.is_empty() {
            return Ok(());
        }
        let session_id = self.session.session_id().to_string();
        let result = (|| -> Result<u64, PersistError> {
            let tx = self
                .session
                .conn_mut()
                .transaction()
                .map_err(PersistError::connection)?;
            let mut count = 0u64;
            {
                let mut insert_snapshot = tx
                    .prepare(
                        "INSERT INTO order_book_snapshots
                            (session_id, symbol, timestamp_ns,
                             best_bid_price, best_bid_size, best_bid_count,
                             best_ask_price, best_ask_size, best_ask_count,
                             total_orders, bid_level_count, ask_level_count)
                         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
                    )
                    .map_err(PersistError::row)?;
                let mut insert_bid = tx
                    .prepare(
                        "INSERT INTO bid_levels (snapshot_id, price, size, count, level_index)
                         VALUES (?1,?2,?3,?4,?5)",
                    )
                    .map_err(PersistError::row)?;
                let mut insert_ask = tx
                    .prepare(
                        "INSERT INTO ask_levels (snapshot_id, price, size, count, level_index)
                         VALUES (?1,?2,?3,?4,?5)",
                    )
                    .map_err(PersistError::row)?;

                for snap in batch.iter() {
                    let (bb_price, bb_size, bb_count) = level_cols(&snap.bid);
                    let (ba_price, ba_size, ba_count) = level_cols(&snap.ask);
                    insert_snapshot
                        .execute(params![
                            session_id,
                            snap.symbol,
                            snap.ts_ns as i64,
                            bb_price,
                            bb_size,
                            bb_count,
                            ba_price,
                            ba_size,
                            ba_count,
                            snap.total_orders as i64,
                            snap.bid_level_count as i64,
                            snap.ask_level_count as i64,
                        ])
                        .map_err(PersistError::row)?;
                    let snapshot_id = tx.last_insert_rowid();

                    for (idx, level) in snap.bids.iter().enumerate() {
                        insert_bid
                            .execute(params![snapshot_id, level.price, level.size as i64, level.count, idx as i64])
                            .map_err(PersistError::row)?;
                    }
                    for (idx, level) in snap.asks.iter().enumerate() {
                        insert_ask
                            .execute(params![snapshot_id, level.price, level.size as i64, level.count, idx as i64])
                            .map_err(PersistError::row)?;
                    }
                    count += 1;
                }
            }
            tx.commit().map_err(PersistError::connection)?;
            Ok(count)
        })();

        batch.clear();
        match result {
            Ok(n) => {
                *written += n;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "batch write failed");
                Err(e)
            }
        }
    }
}

fn level_cols(e: &LevelEntry) -> (Option<i64>, Option<i64>, Option<i64>) {
    if e.price == UNDEF_PRICE {
        (None, None, None)
    } else {
        (Some(e.price), Some(e.size as i64), Some(e.count as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::open_memory;
    use crate::snapshot::LevelEntry;

    fn empty_entry() -> LevelEntry {
        LevelEntry {
            price: UNDEF_PRICE,
            size: 0,
            count: 0,
        }
    }

    fn sample_snapshot(ts_ns: u64) -> BookSnapshot {
        BookSnapshot {
            symbol: "XYZ".into(),
            ts_ns,
            bid: LevelEntry {
                price: 100,
                size: 5,
                count: 1,
            },
            ask: empty_entry(),
            bids: vec![LevelEntry {
                price: 100,
                size: 5,
                count: 1,
            }],
            asks: vec![],
            total_orders: 1,
            bid_level_count: 1,
            ask_level_count: 0,
        }
    }

    #[test]
    fn writer_drains_ring_buffer_and_completes_session() {
        let conn = open_memory().unwrap();
        let mut session = SessionStore::new(conn);
        session.begin("XYZ", "upload.dbn", 10).unwrap();

        let ring = Arc::new(RingBuffer::new(64).unwrap());
        let handle = WriterHandle::new(ring.clone());
        for i in 0..3 {
            handle.push(sample_snapshot(i));
        }
        handle.mark_processing_complete(
            SessionStats {
                messages_received: 3,
                orders_processed: 3,
                throughput_msg_per_s: 100.0,
                avg_apply_ns: 50.0,
                p99_apply_ns: 80,
            },
            Some(FinalBookState {
                total_orders: 0,
                bid_levels: 0,
                ask_levels: 0,
                best_bid: UNDEF_PRICE,
                best_ask: UNDEF_PRICE,
                spread: 0,
            }),
        );

        let writer = Writer::new(handle, session);
        writer.run().unwrap();
    }

    #[test]
    fn level_cols_are_null_for_undefined_price() {
        assert_eq!(level_cols(&empty_entry()), (None, None, None));
    }
}
