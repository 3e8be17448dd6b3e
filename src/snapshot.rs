//! Snapshot production: after every successfully applied event, capture
//! the book's top-N levels and BBO as an owned, serializable value.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::book::OrderBook;
use crate::record::{MboRecord, UNDEF_PRICE};

/// `{price, size, count}` for one level, or the BBO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelEntry {
    pub price: i64,
    pub size: u64,
    pub count: u32,
}

impl LevelEntry {
    fn empty() -> Self {
        LevelEntry {
            price: UNDEF_PRICE,
            size: 0,
            count: 0,
        }
    }

    fn is_defined(&self) -> bool {
        self.price != UNDEF_PRICE
    }
}

/// A point-in-time view of the book captured after applying one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub symbol: String,
    pub ts_ns: u64,
    pub bid: LevelEntry,
    pub ask: LevelEntry,
    pub bids: Vec<LevelEntry>,
    pub asks: Vec<LevelEntry>,
    pub total_orders: usize,
    pub bid_level_count: usize,
    pub ask_level_count: usize,
}

impl BookSnapshot {
    /// Build a snapshot from the book's state immediately after applying
    /// `event`.
    ///
    /// Level prices are carried through unscaled, in whatever integer
    /// unit the source supplies them in, so the output JSON can preserve
    /// full integer precision (see `DESIGN.md` for the pinned price-scale
    /// policy). `symbol` defaults to `"UNKNOWN"` when the stream metadata
    /// omitted it.
    pub fn capture(book: &OrderBook, event: &MboRecord) -> BookSnapshot {
        let (bid, ask) = book.bbo();
        let bid = to_entry(bid.0, &bid.1);
        let ask = to_entry(ask.0, &ask.1);

        let bids = top_n(book.bid_levels(), book.top_levels());
        let asks = top_n(book.ask_levels(), book.top_levels());

        let symbol = if book.symbol().is_empty() {
            "UNKNOWN".to_string()
        } else {
            book.symbol().to_string()
        };

        let snap = BookSnapshot {
            symbol,
            ts_ns: event.ts_event,
            bid,
            ask,
            bids,
            asks,
            total_orders: book.order_count(),
            bid_level_count: book.bid_level_count(),
            ask_level_count: book.ask_level_count(),
        };
        trace!(ts_ns = snap.ts_ns, "snapshot captured");
        snap
    }

    /// Whether [`bid`](Self::bid) is a real level (as opposed to the
    /// empty sentinel).
    pub fn has_bid(&self) -> bool {
        self.bid.is_defined()
    }

    /// Whether [`ask`](Self::ask) is a real level.
    pub fn has_ask(&self) -> bool {
        self.ask.is_defined()
    }

    /// Serialize as one newline-delimited-JSON line (no trailing
    /// newline). Prices are decimal strings to preserve full integer
    /// precision.
    pub fn to_ndjson_line(&self) -> serde_json::Result<String> {
        let value = serde_json::json!({
            "symbol": self.symbol,
            "timestamp": self.ts_ns.to_string(),
            "timestamp_ns": self.ts_ns,
            "bbo": {
                "bid": if self.has_bid() { Some(entry_json(&self.bid)) } else { None },
                "ask": if self.has_ask() { Some(entry_json(&self.ask)) } else { None },
            },
            "levels": {
                "bids": self.bids.iter().map(entry_json).collect::<Vec<_>>(),
                "asks": self.asks.iter().map(entry_json).collect::<Vec<_>>(),
            },
            "stats": {
                "total_orders": self.total_orders,
                "bid_levels": self.bid_level_count,
                "ask_levels": self.ask_level_count,
            },
        });
        serde_json::to_string(&value)
    }
}

fn entry_json(e: &LevelEntry) -> serde_json::Value {
    serde_json::json!({
        "price": e.price.to_string(),
        "size": e.size,
        "count": e.count,
    })
}

fn to_entry(price: i64, level: &crate::book::Level) -> LevelEntry {
    if price == UNDEF_PRICE {
        return LevelEntry::empty();
    }
    LevelEntry {
        price,
        size: level.size(),
        count: level.count(),
    }
}

/// Collect up to `top_levels` entries, stopping early at the first
/// undefined price (there is none among real levels; this guards a
/// pathological `top_levels == 0` or an exhausted side).
fn top_n<'a>(
    levels: impl Iterator<Item = (&'a i64, &'a crate::book::Level)>,
    top_levels: usize,
) -> Vec<LevelEntry> {
    let mut out = Vec::with_capacity(top_levels);
    for (price, level) in levels.take(top_levels) {
        let entry = to_entry(*price, level);
        if !entry.is_defined() {
            break;
        }
        out.push(entry);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::OrderBook;
    use crate::record::{Action, Flags, RecordHeader, Side};

    fn ev(action: Action, side: Side, price: i64, size: u32, order_id: u64) -> MboRecord {
        MboRecord {
            ts_event: 42,
            ts_recv: 42,
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
            flags: Flags::empty(),
            ts_in_delta: 0,
            sequence: 0,
        }
    }

    #[test]
    fn captures_bbo_and_levels_after_add() {
        let mut book = OrderBook::new("XYZ", 10);
        let e = ev(Action::Add, Side::Bid, 100, 5, 1);
        book.apply(&e).unwrap();
        let snap = BookSnapshot::capture(&book, &e);
        assert_eq!(snap.symbol, "XYZ");
        assert_eq!(snap.ts_ns, 42);
        assert!(snap.has_bid());
        assert!(!snap.has_ask());
        assert_eq!(snap.bids.len(), 1);
        assert_eq!(snap.bids[0].price, 100);
        assert_eq!(snap.total_orders, 1);
    }

    #[test]
    fn empty_book_has_no_bbo() {
        let book = OrderBook::new("", 10);
        let e = ev(Action::None, Side::None, 0, 0, 0);
        let snap = BookSnapshot::capture(&book, &e);
        assert_eq!(snap.symbol, "UNKNOWN");
        assert!(!snap.has_bid());
        assert!(!snap.has_ask());
    }

    #[test]
    fn ndjson_line_preserves_full_integer_precision() {
        let mut book = OrderBook::new("XYZ", 10);
        let e = ev(Action::Add, Side::Bid, 123_456_789_012_345, 5, 1);
        book.apply(&e).unwrap();
        let snap = BookSnapshot::capture(&book, &e);
        let line = snap.to_ndjson_line().unwrap();
        assert!(line.contains("\"123456789012345\""));
    }
}
