//! Session identity, lifecycle state machine, and the
//! `processing_sessions` row.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{error, info};

use crate::utils::current_time_millis;

use super::PRICE_SCALE;

/// Lifecycle state of one ingest session.
///
/// ```text
/// Init -> Processing -> (Complete -> Finalizing -> Done)
///                 \--> (Error -> Failing -> Done)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Processing,
    Complete,
    Finalizing,
    Error,
    Failing,
    Done,
}

/// Statistics recorded at session completion.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub messages_received: u64,
    pub orders_processed: u64,
    pub throughput_msg_per_s: f64,
    pub avg_apply_ns: f64,
    pub p99_apply_ns: u64,
}

fn generate_session_id() -> String {
    let epoch_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis();
    let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
    format!("session_{epoch_ms}_{suffix:04}")
}

/// Owns the sqlite connection's view of one session's lifecycle. The
/// connection itself is owned exclusively by the writer thread (§5).
pub struct SessionStore {
    conn: Connection,
    session_id: String,
    state: SessionState,
}

impl SessionStore {
    pub fn new(conn: Connection) -> Self {
        SessionStore {
            conn,
            session_id: String::new(),
            state: SessionState::Init,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Create the session row with status `processing`. Collisions
    /// within a process are possible but tolerated (§4.E.3); retried
    /// once on a primary-key conflict before giving up.
    ///
    /// # Errors
    /// Returns the underlying [`rusqlite::Error`] on write failure.
    pub fn begin(
        &mut self,
        symbol: &str,
        file_name: &str,
        payload_size: u64,
    ) -> rusqlite::Result<()> {
        let mut id = generate_session_id();
        let start_time = current_time_millis();
        for attempt in 0..2 {
            let existing: Option<String> = self
                .conn
                .query_row(
                    "SELECT session_id FROM processing_sessions WHERE session_id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_none() {
                break;
            }
            if attempt == 1 {
                break;
            }
            id = generate_session_id();
        }

        self.conn.execute(
            "INSERT INTO processing_sessions
                (session_id, symbol, file_name, file_size, status, start_time)
             VALUES (?1, ?2, ?3, ?4, 'processing', ?5)",
            params![id, symbol, file_name, payload_size as i64, start_time],
        )?;
        self.session_id = id;
        self.state = SessionState::Processing;
        info!(session_id = %self.session_id, symbol, "session started");
        Ok(())
    }

    pub fn mark_complete(&mut self) {
        if self.state == SessionState::Processing {
            self.state = SessionState::Complete;
        }
    }

    pub fn mark_error(&mut self) {
        self.state = SessionState::Error;
    }

    pub fn update_stats(&self, stats: &SessionStats) -> rusqlite::Result<()> {
        self.conn.execute(
            "UPDATE processing_sessions
                SET messages_received = ?1,
                    orders_processed  = ?2,
                    throughput        = ?3,
                    avg_process_ns    = ?4,
                    p99_process_ns    = ?5
              WHERE session_id = ?6",
            params![
                stats.messages_received as i64,
                stats.orders_processed as i64,
                stats.throughput_msg_per_s,
                stats.avg_apply_ns,
                stats.p99_apply_ns as i64,
                self.session_id,
            ],
        )?;
        Ok(())
    }

    /// Record final book state, scaling raw integer prices to dollar
    /// values by [`PRICE_SCALE`] (the single pinned policy for these
    /// three aggregate fields; see `DESIGN.md`).
    pub fn update_final_book_state(
        &self,
        total_orders: usize,
        bid_levels: usize,
        ask_levels: usize,
        best_bid: i64,
        best_ask: i64,
        spread: i64,
    ) -> rusqlite::Result<()> {
        self.conn.execute(
            "UPDATE processing_sessions
                SET final_total_orders = ?1,
                    final_bid_levels   = ?2,
                    final_ask_levels   = ?3,
                    final_best_bid     = ?4,
                    final_best_ask     = ?5,
                    final_spread       = ?6
              WHERE session_id = ?7",
            params![
                total_orders as i64,
                bid_levels as i64,
                ask_levels as i64,
                best_bid as f64 / PRICE_SCALE,
                best_ask as f64 / PRICE_SCALE,
                spread as f64 / PRICE_SCALE,
                self.session_id,
            ],
        )?;
        Ok(())
    }

    /// Finalize the session: sets status and, on failure, the error
    /// text. Terminal; moves the in-memory state to `Done`.
    pub fn end(
        &mut self,
        success: bool,
        error_text: Option<&str>,
        snapshots_written: u64,
    ) -> rusqlite::Result<()> {
        self.state = if success {
            SessionState::Finalizing
        } else {
            SessionState::Failing
        };
        let status = if success { "completed" } else { "error" };
        let end_time = current_time_millis();
        self.conn.execute(
            "UPDATE processing_sessions
                SET status = ?1, end_time = ?2, error_message = ?3, snapshots_written = ?4
              WHERE session_id = ?5",
            params![status, end_time, error_text, snapshots_written as i64, self.session_id],
        )?;
        if !success {
            error!(session_id = %self.session_id, error = error_text.unwrap_or(""), "session failed");
        } else {
            info!(session_id = %self.session_id, "session completed");
        }
        self.state = SessionState::Done;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::open_memory;

    #[test]
    fn begin_creates_a_processing_row_with_generated_id() {
        let conn = open_memory().unwrap();
        let mut store = SessionStore::new(conn);
        store.begin("XYZ", "upload.dbn", 1024).unwrap();
        assert!(store.session_id().starts_with("session_"));
        assert_eq!(store.state(), SessionState::Processing);
    }

    #[test]
    fn end_success_sets_completed_status() {
        let conn = open_memory().unwrap();
        let mut store = SessionStore::new(conn);
        store.begin("XYZ", "upload.dbn", 1024).unwrap();
        store.mark_complete();
        store.end(true, None, 2).unwrap();
        assert_eq!(store.state(), SessionState::Done);

        let status: String = store
            .conn()
            .query_row(
                "SELECT status FROM processing_sessions WHERE session_id = ?1",
                params![store.session_id()],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(status, "completed");
    }

    #[test]
    fn end_failure_records_error_message() {
        let conn = open_memory().unwrap();
        let mut store = SessionStore::new(conn);
        store.begin("XYZ", "upload.dbn", 1024).unwrap();
        store.mark_error();
        store.end(false, Some("order 1: over-cancel"), 0).unwrap();

        let (status, msg): (String, String) = store
            .conn()
            .query_row(
                "SELECT status, error_message FROM processing_sessions WHERE session_id = ?1",
                params![store.session_id()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "error");
        assert_eq!(msg, "order 1: over-cancel");
    }
}
