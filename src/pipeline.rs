//! Three-thread session supervisor wiring the frame reader, book
//! engine, snapshot producer, ring buffer, and persistence writer
//! together (§5 control and data flow).
//!
//! ```text
//! ingest thread:  frame -> book -> snapshot -> ring.push
//! writer thread:  ring.pop -> persist
//! ```
//!
//! [`Session::run`] is the supervisor: it starts the session row,
//! spawns the writer thread, drives the ingest loop on the calling
//! thread, signals completion, and joins the writer before returning.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{info, warn};

use crate::book::OrderBook;
use crate::config::Config;
use crate::frame::{ChunkQueue, MboStream};
use crate::persist::{
    self, FinalBookState, LatencyStats, SessionStats, SessionStore, Writer, WriterHandle,
};
use crate::record::UNDEF_PRICE;
use crate::ring::{RingBuffer, RingBufferError};
use crate::snapshot::BookSnapshot;

/// Tolerated book errors are logged at this cadence rather than on
/// every occurrence (§7).
const TOLERATED_LOG_EVERY: u64 = 1_000;

/// Errors that abort a session before or after the ingest/writer
/// threads have run to completion.
#[derive(Debug)]
#[non_exhaustive]
pub enum PipelineError {
    /// `server.ring_buffer_size` was not a valid capacity.
    RingBuffer(RingBufferError),
    /// Opening the store or starting the session row failed.
    Storage(rusqlite::Error),
    /// The writer thread panicked instead of returning.
    WriterThreadPanicked,
    /// The session ran to completion but ended in `error` status: a
    /// decode fault, a non-tolerated book inconsistency, or an
    /// external cancellation.
    SessionFailed { session_id: String, message: String },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::RingBuffer(e) => write!(f, "{e}"),
            PipelineError::Storage(e) => write!(f, "storage error: {e}"),
            PipelineError::WriterThreadPanicked => write!(f, "writer thread panicked"),
            PipelineError::SessionFailed { session_id, message } => {
                write!(f, "session {session_id} failed: {message}")
            }
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<RingBufferError> for PipelineError {
    fn from(e: RingBufferError) -> Self {
        PipelineError::RingBuffer(e)
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        PipelineError::Storage(e)
    }
}

/// One ingest session: a fresh book for `symbol`, fed from `chunk_queue`
/// and finalized into the persistence store at `run` time.
///
/// The byte producer (the upload transport, out of scope for this
/// crate) pushes chunks into [`chunk_queue`](Self::chunk_queue) and
/// calls [`ChunkQueue::finish`] on it from another thread while `run`
/// is executing.
pub struct Session {
    config: Config,
    symbol: String,
    file_name: String,
    payload_size: u64,
    chunk_queue: Arc<ChunkQueue>,
    cancel: Arc<AtomicBool>,
}

impl Session {
    pub fn new(
        config: Config,
        symbol: impl Into<String>,
        file_name: impl Into<String>,
        payload_size: u64,
    ) -> Self {
        Session {
            config,
            symbol: symbol.into(),
            file_name: file_name.into(),
            payload_size,
            chunk_queue: Arc::new(ChunkQueue::new()),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The shared byte buffer a producer thread feeds.
    pub fn chunk_queue(&self) -> &Arc<ChunkQueue> {
        &self.chunk_queue
    }

    /// Request cancellation from another thread while `run` is in
    /// progress. The writer finishes its in-flight batch, flushes, and
    /// marks the session failed with `"cancelled"` (§7).
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run the session to completion on the calling thread (the
    /// "ingest thread"): start the session row, spawn the writer
    /// thread, drive records off `chunk_queue` into the book, push a
    /// snapshot per applied event, then signal completion and join the
    /// writer.
    ///
    /// Returns the session id on a `completed` outcome.
    ///
    /// # Errors
    /// [`PipelineError::SessionFailed`] covers every outcome the store
    /// itself recorded as `error` (decode faults, non-tolerated book
    /// inconsistencies, cancellation); the session row is written
    /// either way. The other variants mean the session row could not
    /// be finalized at all.
    pub fn run(self, db_path: &str) -> Result<String, PipelineError> {
        let conn = persist::open(db_path)?;
        let mut store = SessionStore::new(conn);
        store.begin(&self.symbol, &self.file_name, self.payload_size)?;
        let session_id = store.session_id().to_string();

        let ring = Arc::new(RingBuffer::new(self.config.server.ring_buffer_size)?);
        let mut handle = WriterHandle::new(ring.clone());
        handle.stop = self.cancel.clone();

        let writer = Writer::new(handle.clone(), store);
        let writer_thread = thread::spawn(move || writer.run());

        let (session_stats, final_book_state, fatal) = self.drive_ingest(&handle);

        handle.mark_processing_complete(session_stats, Some(final_book_state));

        let write_result = writer_thread.join().map_err(|_| PipelineError::WriterThreadPanicked)?;
        write_result?;

        if let Some(message) = fatal {
            return Err(PipelineError::SessionFailed { session_id, message });
        }
        if self.cancel.load(Ordering::Acquire) {
            return Err(PipelineError::SessionFailed {
                session_id,
                message: "cancelled".to_string(),
            });
        }
        Ok(session_id)
    }

    /// The ingest loop: frame -> book -> snapshot -> ring push. Runs on
    /// the calling thread; never blocks on the writer beyond the
    /// bounded ring buffer's own backpressure.
    fn drive_ingest(&self, handle: &WriterHandle) -> (SessionStats, FinalBookState, Option<String>) {
        let mut book = OrderBook::new(self.symbol.clone(), self.config.server.top_levels);
        let stream = MboStream::new(&self.chunk_queue);
        let mut latency = LatencyStats::new();

        let mut messages_received: u64 = 0;
        let mut orders_processed: u64 = 0;
        let mut tolerated_drops: u64 = 0;
        let mut fatal: Option<String> = None;

        let start = Instant::now();
        for record in stream {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    fatal = Some(e.to_string());
                    handle.report_fatal(e.to_string());
                    break;
                }
            };
            messages_received += 1;

            let t0 = Instant::now();
            match book.apply(&record) {
                Ok(()) => {
                    latency.record(t0.elapsed().as_nanos() as u64);
                    orders_processed += 1;
                    let snapshot = BookSnapshot::capture(&book, &record);
                    handle.push(snapshot);
                }
                Err(e) if e.is_tolerated() => {
                    tolerated_drops += 1;
                    if tolerated_drops % TOLERATED_LOG_EVERY == 0 {
                        warn!(count = tolerated_drops, error = %e, "tolerated book inconsistencies");
                    }
                }
                Err(e) => {
                    fatal = Some(e.to_string());
                    handle.report_fatal(e.to_string());
                    break;
                }
            }

            if fatal.is_none() && self.cancel.load(Ordering::Acquire) {
                break;
            }
        }
        let elapsed_s = start.elapsed().as_secs_f64();
        let throughput = if elapsed_s > 0.0 {
            messages_received as f64 / elapsed_s
        } else {
            0.0
        };

        info!(
            messages_received,
            orders_processed,
            tolerated_drops,
            throughput_msg_per_s = throughput,
            "ingest loop finished"
        );

        let (bid, ask) = book.bbo();
        let final_book_state = FinalBookState {
            total_orders: book.order_count(),
            bid_levels: book.bid_level_count(),
            ask_levels: book.ask_level_count(),
            best_bid: bid.0,
            best_ask: ask.0,
            spread: if bid.0 != UNDEF_PRICE && ask.0 != UNDEF_PRICE {
                ask.0 - bid.0
            } else {
                0
            },
        };

        let stats = SessionStats {
            messages_received,
            orders_processed,
            throughput_msg_per_s: throughput,
            avg_apply_ns: latency.mean_ns(),
            p99_apply_ns: latency.p99_ns(),
        };

        (stats, final_book_state, fatal)
    }
}
