//! Error type for the book engine.

use std::fmt;

use crate::record::Side;

/// Errors raised while applying an MBO event to the book.
///
/// Every variant is one of the two `BookInconsistency` kinds from the
/// error taxonomy: [`is_tolerated`](BookError::is_tolerated) distinguishes
/// them. Tolerated variants are data gaps seen in real feeds and should
/// be logged and discarded; the remainder are hard faults that fail the
/// session.
#[derive(Debug)]
#[non_exhaustive]
pub enum BookError {
    /// Cancel/Modify referenced an order id the book never saw. Tolerated.
    UnknownOrder { order_id: u64 },
    /// Cancel referenced a `(side, price)` level that was never opened.
    /// Tolerated.
    UnknownLevel { side: Side, price: i64 },
    /// Add referenced an order id already present in the index. Fatal.
    DuplicateOrder { order_id: u64 },
    /// Cancel requested more size than the order had remaining. Fatal.
    OverCancel {
        order_id: u64,
        requested: u32,
        remaining: u32,
    },
    /// Modify changed the recorded side of an order. Fatal.
    SideChange { order_id: u64 },
    /// An event referenced `Side::None` where a concrete side was
    /// required. Fatal.
    InvalidSide,
}

impl BookError {
    /// True for `BookInconsistency.Tolerated`: data gaps that should be
    /// counted, logged at a coarse cadence, and otherwise ignored.
    /// False for `BookInconsistency.Fatal`, which must fail the session.
    pub fn is_tolerated(&self) -> bool {
        matches!(
            self,
            BookError::UnknownOrder { .. } | BookError::UnknownLevel { .. }
        )
    }
}

impl fmt::Display for BookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookError::UnknownOrder { order_id } => {
                write!(f, "unknown order id {order_id}")
            }
            BookError::UnknownLevel { side, price } => {
                write!(f, "unknown level {side} @ {price}")
            }
            BookError::DuplicateOrder { order_id } => {
                write!(f, "duplicate order id {order_id}")
            }
            BookError::OverCancel {
                order_id,
                requested,
                remaining,
            } => {
                write!(
                    f,
                    "order {order_id}: cancel of {requested} exceeds remaining size {remaining}"
                )
            }
            BookError::SideChange { order_id } => {
                write!(f, "order {order_id} changed side")
            }
            BookError::InvalidSide => write!(f, "event referenced an invalid (None) side"),
        }
    }
}

impl std::error::Error for BookError {}
