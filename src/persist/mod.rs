//! Batched, transactional persistence writer: writes snapshots plus
//! their bid/ask level rows in bulk, manages index lifecycle for bulk
//! throughput, and records per-session statistics.

mod error;
mod session;
mod stats;
mod writer;

pub use error::PersistError;
pub use session::{SessionState, SessionStats, SessionStore};
pub use stats::LatencyStats;
pub use writer::{FinalBookState, Writer, WriterHandle, BATCH_SIZE};

use rusqlite::Connection;

/// Raw-price-unit to dollar-value scale factor for `final_best_bid`,
/// `final_best_ask`, and `final_spread` (§9 price-scale policy). Pinned
/// to the DBN convention that one price unit is `1e-9`; see
/// `DESIGN.md` for the full rationale. Only these three aggregate
/// fields are scaled — snapshot and level rows keep raw integer prices
/// to preserve full precision.
pub const PRICE_SCALE: f64 = 1_000_000_000.0;

const SCHEMA: &str = r#"
PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;
PRAGMA temp_store=MEMORY;

CREATE TABLE IF NOT EXISTS processing_sessions (
    session_id          TEXT PRIMARY KEY,
    symbol              TEXT NOT NULL,
    file_name           TEXT NOT NULL,
    file_size           INTEGER NOT NULL,
    status              TEXT NOT NULL,
    start_time          INTEGER NOT NULL,
    end_time            INTEGER,
    messages_received   INTEGER NOT NULL DEFAULT 0,
    orders_processed    INTEGER NOT NULL DEFAULT 0,
    throughput          REAL NOT NULL DEFAULT 0,
    avg_process_ns      REAL NOT NULL DEFAULT 0,
    p99_process_ns      INTEGER NOT NULL DEFAULT 0,
    final_total_orders  INTEGER,
    final_bid_levels    INTEGER,
    final_ask_levels    INTEGER,
    final_best_bid      REAL,
    final_best_ask      REAL,
    final_spread        REAL,
    snapshots_written   INTEGER NOT NULL DEFAULT 0,
    error_message       TEXT
);

CREATE TABLE IF NOT EXISTS order_book_snapshots (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id          TEXT NOT NULL REFERENCES processing_sessions(session_id),
    symbol              TEXT NOT NULL,
    timestamp_ns        INTEGER NOT NULL,
    best_bid_price      INTEGER,
    best_bid_size       INTEGER,
    best_bid_count      INTEGER,
    best_ask_price      INTEGER,
    best_ask_size       INTEGER,
    best_ask_count      INTEGER,
    total_orders        INTEGER NOT NULL,
    bid_level_count     INTEGER NOT NULL,
    ask_level_count     INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS bid_levels (
    snapshot_id         INTEGER NOT NULL REFERENCES order_book_snapshots(id),
    price               INTEGER NOT NULL,
    size                INTEGER NOT NULL,
    count               INTEGER NOT NULL,
    level_index         INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS ask_levels (
    snapshot_id         INTEGER NOT NULL REFERENCES order_book_snapshots(id),
    price               INTEGER NOT NULL,
    size                INTEGER NOT NULL,
    count               INTEGER NOT NULL,
    level_index         INTEGER NOT NULL
);
"#;

const INDEXES: &[(&str, &str)] = &[
    (
        "idx_snapshots_session_ts",
        "CREATE INDEX IF NOT EXISTS idx_snapshots_session_ts ON order_book_snapshots(session_id, timestamp_ns)",
    ),
    (
        "idx_bid_levels_snapshot",
        "CREATE INDEX IF NOT EXISTS idx_bid_levels_snapshot ON bid_levels(snapshot_id, level_index)",
    ),
    (
        "idx_ask_levels_snapshot",
        "CREATE INDEX IF NOT EXISTS idx_ask_levels_snapshot ON ask_levels(snapshot_id, level_index)",
    ),
];

/// Open (creating if necessary) the sqlite-backed persistence store at
/// `path` and apply the schema.
pub fn open(path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;
    for (_, ddl) in INDEXES {
        conn.execute(ddl, [])?;
    }
    Ok(conn)
}

/// Open an in-memory store. Used by tests.
pub fn open_memory() -> rusqlite::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA)?;
    for (_, ddl) in INDEXES {
        conn.execute(ddl, [])?;
    }
    Ok(conn)
}

pub(crate) fn drop_indexes(conn: &Connection) -> rusqlite::Result<()> {
    for (name, _) in INDEXES {
        conn.execute(&format!("DROP INDEX IF EXISTS {name}"), [])?;
    }
    Ok(())
}

pub(crate) fn recreate_indexes(conn: &Connection) -> rusqlite::Result<()> {
    for (_, ddl) in INDEXES {
        conn.execute(ddl, [])?;
    }
    Ok(())
}
