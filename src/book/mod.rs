//! The limit order book engine: maintains orders, price levels, and
//! sides with strict invariants (I1-I5 in the data model) and
//! well-defined failure semantics on inconsistent input.

mod error;
mod types;

pub use error::BookError;
pub use types::{Level, Order};

use std::collections::BTreeMap;
use std::collections::HashMap;

use tracing::trace;

use crate::record::{Action, MboRecord, Side, UNDEF_PRICE};

/// An order book for a single instrument.
///
/// Not shared across threads: owned exclusively by the ingest thread for
/// the lifetime of a session.
pub struct OrderBook {
    symbol: String,
    top_levels: usize,
    bids: BTreeMap<i64, Level>,
    asks: BTreeMap<i64, Level>,
    /// order id -> (price, side); a non-owning lookup into the level
    /// that owns the order.
    index: HashMap<u64, (i64, Side)>,
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>, top_levels: usize) -> Self {
        OrderBook {
            symbol: symbol.into(),
            top_levels,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn top_levels(&self) -> usize {
        self.top_levels
    }

    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    pub fn bid_level_count(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_level_count(&self) -> usize {
        self.asks.len()
    }

    fn side_map(&self, side: Side) -> Result<&BTreeMap<i64, Level>, BookError> {
        match side {
            Side::Bid => Ok(&self.bids),
            Side::Ask => Ok(&self.asks),
            Side::None => Err(BookError::InvalidSide),
        }
    }

    fn side_map_mut(&mut self, side: Side) -> Result<&mut BTreeMap<i64, Level>, BookError> {
        match side {
            Side::Bid => Ok(&mut self.bids),
            Side::Ask => Ok(&mut self.asks),
            Side::None => Err(BookError::InvalidSide),
        }
    }

    /// Dispatch on `event.action` and mutate the book accordingly.
    ///
    /// # Errors
    /// Returns [`BookError`]; see [`BookError::is_tolerated`] for which
    /// variants should merely be logged and discarded versus which must
    /// fail the session.
    pub fn apply(&mut self, event: &MboRecord) -> Result<(), BookError> {
        match event.action {
            Action::Clear => {
                self.clear();
                Ok(())
            }
            Action::Add => self.add(event),
            Action::Cancel => self.cancel(event),
            Action::Modify => self.modify(event),
            Action::Trade | Action::Fill | Action::None => Ok(()),
        }
    }

    fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.index.clear();
        trace!("book cleared");
    }

    fn add(&mut self, event: &MboRecord) -> Result<(), BookError> {
        if event.is_tob() {
            let side_map = self.side_map_mut(event.side)?;
            side_map.clear();
            if event.price != UNDEF_PRICE {
                let order = Order {
                    id: event.order_id,
                    size: event.size,
                    is_tob: true,
                };
                side_map.insert(event.price, Level::replace_with_single(order));
            }
            // TOB adds never touch the global order index (§9 open
            // question, conservative policy).
            return Ok(());
        }

        if self.index.contains_key(&event.order_id) {
            return Err(BookError::DuplicateOrder {
                order_id: event.order_id,
            });
        }

        let side_map = self.side_map_mut(event.side)?;
        let level = side_map.entry(event.price).or_default();
        level.push_back(Order {
            id: event.order_id,
            size: event.size,
            is_tob: false,
        });
        self.index.insert(event.order_id, (event.price, event.side));
        trace!(order_id = event.order_id, price = event.price, "order added");
        Ok(())
    }

    fn cancel(&mut self, event: &MboRecord) -> Result<(), BookError> {
        let side_map = self.side_map_mut(event.side)?;
        let level = side_map
            .get_mut(&event.price)
            .ok_or(BookError::UnknownLevel {
                side: event.side,
                price: event.price,
            })?;
        let remaining = level
            .find(event.order_id)
            .ok_or(BookError::UnknownOrder {
                order_id: event.order_id,
            })?
            .size;
        if event.size > remaining {
            return Err(BookError::OverCancel {
                order_id: event.order_id,
                requested: event.size,
                remaining,
            });
        }
        let new_size = remaining - event.size;
        if new_size == 0 {
            level.remove(event.order_id);
            self.index.remove(&event.order_id);
            if level.is_empty() {
                side_map.remove(&event.price);
            }
        } else {
            level.shrink(event.order_id, new_size);
        }
        trace!(order_id = event.order_id, "order cancelled");
        Ok(())
    }

    fn modify(&mut self, event: &MboRecord) -> Result<(), BookError> {
        let Some(&(old_price, old_side)) = self.index.get(&event.order_id) else {
            // B3: Modify of an unknown order behaves exactly as Add.
            return self.add(event);
        };
        if old_side != event.side {
            return Err(BookError::SideChange {
                order_id: event.order_id,
            });
        }

        if old_price != event.price {
            let old_map = self.side_map_mut(old_side)?;
            if let Some(level) = old_map.get_mut(&old_price) {
                level.remove(event.order_id);
                if level.is_empty() {
                    old_map.remove(&old_price);
                }
            }
            let new_map = self.side_map_mut(event.side)?;
            let level = new_map.entry(event.price).or_default();
            level.push_back(Order {
                id: event.order_id,
                size: event.size,
                is_tob: false,
            });
            self.index.insert(event.order_id, (event.price, event.side));
        } else {
            let map = self.side_map_mut(event.side)?;
            let level = map.get_mut(&event.price).ok_or(BookError::UnknownLevel {
                side: event.side,
                price: event.price,
            })?;
            let old_order_size = level
                .find(event.order_id)
                .ok_or(BookError::UnknownOrder {
                    order_id: event.order_id,
                })?
                .size;
            if event.size > old_order_size {
                level.bump_losing_priority(event.order_id, event.size);
            } else {
                level.shrink(event.order_id, event.size);
            }
        }
        trace!(order_id = event.order_id, "order modified");
        Ok(())
    }

    /// Best bid (index 0, highest price) and best ask (index 0, lowest
    /// price). Either half of the pair is the empty level
    /// (`price == UNDEF_PRICE`) if that side has no levels.
    pub fn bbo(&self) -> ((i64, Level), (i64, Level)) {
        (self.bid_level(0), self.ask_level(0))
    }

    /// The `i`-th best bid level, highest price first. Out-of-range
    /// indices return the empty level (B2), never panic.
    pub fn bid_level(&self, i: usize) -> (i64, Level) {
        self.bids
            .iter()
            .rev()
            .nth(i)
            .map(|(p, l)| (*p, l.clone()))
            .unwrap_or_else(types::empty_level)
    }

    /// The `i`-th best ask level, lowest price first. Out-of-range
    /// indices return the empty level (B2), never panic.
    pub fn ask_level(&self, i: usize) -> (i64, Level) {
        self.asks
            .iter()
            .nth(i)
            .map(|(p, l)| (*p, l.clone()))
            .unwrap_or_else(types::empty_level)
    }

    /// Bid levels highest-to-lowest, `(price, level)` pairs.
    pub fn bid_levels(&self) -> impl Iterator<Item = (&i64, &Level)> {
        self.bids.iter().rev()
    }

    /// Ask levels lowest-to-highest, `(price, level)` pairs.
    pub fn ask_levels(&self) -> impl Iterator<Item = (&i64, &Level)> {
        self.asks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Flags, RecordHeader};

    fn ev(action: Action, side: Side, price: i64, size: u32, order_id: u64, flags: Flags) -> MboRecord {
        MboRecord {
            ts_event: 0,
            ts_recv: 0,
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
        ev(Action::Add, side, price, size, order_id, Flags::empty())
    }

    #[test]
    fn add_then_matching_cancel_returns_to_empty_book() {
        let mut book = OrderBook::new("XYZ", 10);
        book.apply(&add(Side::Bid, 100, 5, 1)).unwrap();
        book.apply(&ev(Action::Cancel, Side::Bid, 100, 5, 1, Flags::empty()))
            .unwrap();
        assert_eq!(book.order_count(), 0);
        assert_eq!(book.bid_level_count(), 0);
    }

    #[test]
    fn clear_twice_is_idempotent() {
        let mut book = OrderBook::new("XYZ", 10);
        book.apply(&add(Side::Bid, 100, 5, 1)).unwrap();
        book.apply(&ev(Action::Clear, Side::None, 0, 0, 0, Flags::empty()))
            .unwrap();
        book.apply(&ev(Action::Clear, Side::None, 0, 0, 0, Flags::empty()))
            .unwrap();
        assert_eq!(book.order_count(), 0);
    }

    #[test]
    fn modify_price_change_moves_level_and_updates_index() {
        let mut book = OrderBook::new("XYZ", 10);
        book.apply(&add(Side::Bid, 100, 5, 1)).unwrap();
        book.apply(&ev(Action::Modify, Side::Bid, 101, 5, 1, Flags::empty()))
            .unwrap();
        assert_eq!(book.bid_level_count(), 1);
        let (price, level) = book.bid_level(0);
        assert_eq!(price, 101);
        assert_eq!(level.size(), 5);
    }

    #[test]
    fn tob_add_clears_side_without_touching_index() {
        let mut book = OrderBook::new("XYZ", 10);
        book.apply(&add(Side::Bid, 100, 5, 1)).unwrap();
        book.apply(&ev(
            Action::Add,
            Side::Bid,
            UNDEF_PRICE,
            0,
            0,
            Flags::TOB,
        ))
        .unwrap();
        assert_eq!(book.bid_level_count(), 0);
        // The order id remains in the index per the conservative TOB
        // policy; the book nonetheless reports zero live orders because
        // no level holds it any more.
        assert!(book.index.contains_key(&1));
        assert_eq!(book.order_count(), 1);
    }

    #[test]
    fn over_cancel_is_fatal() {
        let mut book = OrderBook::new("XYZ", 10);
        book.apply(&add(Side::Bid, 100, 5, 1)).unwrap();
        let err = book
            .apply(&ev(Action::Cancel, Side::Bid, 100, 6, 1, Flags::empty()))
            .unwrap_err();
        assert!(matches!(err, BookError::OverCancel { order_id: 1, .. }));
        assert!(!err.is_tolerated());
    }

    #[test]
    fn crossed_book_is_preserved_without_synthesis() {
        let mut book = OrderBook::new("XYZ", 10);
        book.apply(&add(Side::Bid, 105, 5, 1)).unwrap();
        book.apply(&add(Side::Ask, 100, 5, 2)).unwrap();
        let (bid, ask) = book.bbo();
        assert_eq!(bid.0, 105);
        assert_eq!(ask.0, 100);
    }

    #[test]
    fn unknown_cancel_is_tolerated() {
        let mut book = OrderBook::new("XYZ", 10);
        let err = book
            .apply(&ev(Action::Cancel, Side::Bid, 100, 5, 1, Flags::empty()))
            .unwrap_err();
        assert!(matches!(err, BookError::UnknownLevel { .. }));
        assert!(err.is_tolerated());
    }

    #[test]
    fn out_of_range_level_index_is_empty_not_panicking() {
        let book = OrderBook::new("XYZ", 10);
        let (price, _) = book.bid_level(3);
        assert_eq!(price, UNDEF_PRICE);
    }

    proptest::proptest! {
        /// L1: for any price/size/order id, Add followed by a Cancel of
        /// the full size returns the book to empty, regardless of the
        /// specific values involved.
        #[test]
        fn add_then_full_cancel_is_always_empty(
            price in 1i64..1_000_000_000,
            size in 1u32..1_000_000,
            order_id in 1u64..1_000_000,
        ) {
            let mut book = OrderBook::new("XYZ", 10);
            book.apply(&add(Side::Bid, price, size, order_id)).unwrap();
            book.apply(&ev(Action::Cancel, Side::Bid, price, size, order_id, Flags::empty()))
                .unwrap();
            proptest::prop_assert_eq!(book.order_count(), 0);
            proptest::prop_assert_eq!(book.bid_level_count(), 0);
        }
    }
}
