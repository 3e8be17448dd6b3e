//! End-to-end session scenarios driven through the public API only,
//! exercising the full frame -> book -> snapshot -> ring -> persist
//! pipeline. Most scenarios only need the in-memory store; a couple
//! open a named temp file instead so a second connection can read back
//! the persisted rows after `run` returns and the session's own
//! connection has closed.

use rusqlite::Connection;
use tempfile::NamedTempFile;

use mbo_engine::prelude::*;

fn record(action: Action, side: Side, price: i64, size: u32, order_id: u64, flags: Flags) -> MboRecord {
    MboRecord {
        ts_event: 1,
        ts_recv: 1,
        hd: RecordHeader {
            rtype: 0,
            publisher_id: 0,
            instrument_id: 0,
        },
        action,
        side,
        price,
        size,
        channel_id: 0,
        order_id,
        flags,
        ts_in_delta: 0,
        sequence: 0,
    }
}

fn add(side: Side, price: i64, size: u32, order_id: u64) -> MboRecord {
    record(Action::Add, side, price, size, order_id, Flags::empty())
}

fn bytes_of(records: &[MboRecord]) -> Vec<u8> {
    records.iter().flat_map(|r| r.encode()).collect()
}

#[test]
fn empty_stream_produces_a_completed_session_with_no_orders() {
    let session = Session::new(Config::default(), "XYZ", "empty.dbn", 0);
    session.chunk_queue().finish();
    let session_id = session.run(":memory:").expect("empty stream completes");
    assert!(session_id.starts_with("session_"));
}

#[test]
fn single_add_then_cancel_returns_the_book_to_empty() {
    let session = Session::new(Config::default(), "XYZ", "add_cancel.dbn", 0);
    let records = [
        add(Side::Bid, 100, 5, 1),
        record(Action::Cancel, Side::Bid, 100, 5, 1, Flags::empty()),
    ];
    let bytes = bytes_of(&records);
    session.chunk_queue().push(&bytes);
    session.chunk_queue().finish();
    assert!(session.run(":memory:").is_ok());
}

#[test]
fn modify_with_price_change_relocates_the_order_to_a_new_level() {
    let session = Session::new(Config::default(), "XYZ", "modify.dbn", 0);
    let records = [
        add(Side::Bid, 100, 5, 1),
        record(Action::Modify, Side::Bid, 101, 5, 1, Flags::empty()),
    ];
    let bytes = bytes_of(&records);
    session.chunk_queue().push(&bytes);
    session.chunk_queue().finish();
    assert!(session.run(":memory:").is_ok());
}

#[test]
fn tob_add_clears_the_side_instead_of_appending_a_resting_order() {
    let db = NamedTempFile::new().unwrap();
    let path = db.path().to_str().unwrap();

    let session = Session::new(Config::default(), "XYZ", "tob.dbn", 0);
    let records = [
        add(Side::Bid, 100, 5, 1),
        add(Side::Bid, 101, 3, 2),
        record(Action::Add, Side::Bid, 102, 7, 3, Flags::TOB),
    ];
    let bytes = bytes_of(&records);
    session.chunk_queue().push(&bytes);
    session.chunk_queue().finish();
    let session_id = session.run(path).expect("tob add completes");

    let conn = Connection::open(path).unwrap();
    let (status, final_total_orders, final_bid_levels, final_ask_levels): (String, i64, i64, i64) = conn
        .query_row(
            "SELECT status, final_total_orders, final_bid_levels, final_ask_levels
               FROM processing_sessions WHERE session_id = ?1",
            [&session_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .unwrap();
    assert_eq!(status, "completed");
    // Orders 1 and 2 stay in the index (TOB never evicts it) even
    // though the TOB add replaced the bid side with a single level.
    assert_eq!(final_total_orders, 2);
    assert_eq!(final_bid_levels, 1);
    assert_eq!(final_ask_levels, 0);

    let snapshot_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM order_book_snapshots WHERE session_id = ?1",
            [&session_id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(snapshot_count, 3);
}

#[test]
fn over_cancel_is_fatal_and_the_session_ends_in_error() {
    let db = NamedTempFile::new().unwrap();
    let path = db.path().to_str().unwrap();

    let session = Session::new(Config::default(), "XYZ", "over_cancel.dbn", 0);
    let records = [
        add(Side::Bid, 100, 5, 1),
        record(Action::Cancel, Side::Bid, 100, 6, 1, Flags::empty()),
    ];
    let bytes = bytes_of(&records);
    session.chunk_queue().push(&bytes);
    session.chunk_queue().finish();
    let err = session.run(path).unwrap_err();
    let session_id = match &err {
        PipelineError::SessionFailed { session_id, .. } => session_id.clone(),
        other => panic!("expected SessionFailed, got {other}"),
    };

    let conn = Connection::open(path).unwrap();
    let (status, error_message, snapshots_written): (String, Option<String>, i64) = conn
        .query_row(
            "SELECT status, error_message, snapshots_written
               FROM processing_sessions WHERE session_id = ?1",
            [&session_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .unwrap();
    assert_eq!(status, "error");
    assert!(error_message.unwrap().contains('1'));
    // Only the Add's snapshot was pushed; the fatal Cancel never
    // produces one.
    assert_eq!(snapshots_written, 1);

    let snapshot_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM order_book_snapshots WHERE session_id = ?1",
            [&session_id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(snapshot_count, 1);
}

#[test]
fn crossed_input_is_preserved_without_synthetic_matching() {
    let session = Session::new(Config::default(), "XYZ", "crossed.dbn", 0);
    let records = [add(Side::Bid, 105, 5, 1), add(Side::Ask, 100, 5, 2)];
    let bytes = bytes_of(&records);
    session.chunk_queue().push(&bytes);
    session.chunk_queue().finish();
    // The book never synthesizes a trade for crossed input; applying
    // both adds independently must succeed.
    assert!(session.run(":memory:").is_ok());
}

#[test]
fn unknown_cancel_is_tolerated_not_fatal() {
    let session = Session::new(Config::default(), "XYZ", "unknown_cancel.dbn", 0);
    let records = [record(Action::Cancel, Side::Bid, 100, 5, 1, Flags::empty())];
    let bytes = bytes_of(&records);
    session.chunk_queue().push(&bytes);
    session.chunk_queue().finish();
    assert!(session.run(":memory:").is_ok());
}
