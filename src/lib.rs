//! # mbo-engine
//!
//! Ingest pipeline and limit order book engine for Market-By-Order (MBO)
//! event streams.
//!
//! A session wires five components together:
//!
//! 1. [`frame`] turns a chunked byte stream into a lazy sequence of
//!    [`record::MboRecord`] events.
//! 2. [`book`] applies those events to a strict-invariant limit order book
//!    and exposes best-bid/best-ask and top-N level queries.
//! 3. [`snapshot`] captures a [`snapshot::BookSnapshot`] after every applied
//!    event.
//! 4. [`ring`] hands snapshots from the ingest thread to the persistence
//!    writer thread through a bounded lock-free SPSC queue.
//! 5. [`persist`] batches snapshots into transactional writes and tracks
//!    per-session statistics and lifecycle.
//!
//! [`pipeline`] owns the three-thread wiring described above; most callers
//! only need [`pipeline::Session::run`].
//!
//! ## Feature scope
//!
//! The command-line launcher, the flat-file configuration reader, the
//! upload transport, the static asset server, and the on-demand JSON
//! export endpoint are collaborators with thin contracts named in
//! [`config`] and are not implemented by this crate.

pub mod book;
pub mod config;
pub mod frame;
pub mod persist;
pub mod pipeline;
pub mod record;
pub mod ring;
pub mod snapshot;
mod utils;

pub mod prelude {
    //! Convenience re-exports for common downstream usage.

    // Core record and wire types
    pub use crate::record::{Action, Flags, MboRecord, RecordHeader, Side, UNDEF_PRICE};

    // Book engine types
    pub use crate::book::{BookError, Level, Order, OrderBook};

    // Snapshot types
    pub use crate::snapshot::{BookSnapshot, LevelEntry};

    // Ring buffer
    pub use crate::ring::RingBuffer;

    // Persistence and session types
    pub use crate::persist::{PersistError, SessionState, SessionStats, SessionStore};

    // Pipeline
    pub use crate::pipeline::{PipelineError, Session};

    // Configuration
    pub use crate::config::Config;
}
