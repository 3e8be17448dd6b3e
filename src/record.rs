//! Wire-level MBO record layout and decoding.
//!
//! The wire format mirrors a Databento-style MBO record: a small fixed
//! header followed by order, price, and flag fields. Field widths and
//! offsets are part of the public contract with the sender and must not
//! change; see the packed byte table below.
//!
//! ```text
//! offset  width  field
//! 0       u64    ts_event
//! 8       u64    ts_recv
//! 16      u8     rtype
//! 17      u16    publisher_id
//! 19      u32    instrument_id
//! 23      u8     action (ASCII)
//! 24      u8     side (ASCII)
//! 25      i64    price
//! 33      u32    size
//! 37      u8     channel_id
//! 38      u64    order_id
//! 46      u8     flags
//! 47      i32    ts_in_delta
//! 51      u32    sequence
//! ```
//!
//! Total: 55 bytes, little-endian, packed.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Size in bytes of one packed MBO record on the wire.
pub const RECORD_LEN: usize = 55;

/// Sentinel price meaning "no price" / "undefined".
pub const UNDEF_PRICE: i64 = i64::MAX;

bitflags! {
    /// Per-record flag bits. Only `TOB` is interpreted by the book engine;
    /// the remaining bits are carried through unexamined.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Flags: u8 {
        /// Marks an implicit top-of-book level update rather than a
        /// single resting order.
        const TOB = 1 << 7;
    }
}

/// The action an MBO record asks the book to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Add,
    Modify,
    Cancel,
    Fill,
    Trade,
    Clear,
    None,
}

impl Action {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'A' => Some(Action::Add),
            b'M' => Some(Action::Modify),
            b'C' => Some(Action::Cancel),
            b'F' => Some(Action::Fill),
            b'T' => Some(Action::Trade),
            b'R' => Some(Action::Clear),
            b'N' => Some(Action::None),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Action::Add => 'A',
            Action::Modify => 'M',
            Action::Cancel => 'C',
            Action::Fill => 'F',
            Action::Trade => 'T',
            Action::Clear => 'R',
            Action::None => 'N',
        };
        write!(f, "{c}")
    }
}

/// The side of the book an MBO record targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
    None,
}

impl Side {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'B' => Some(Side::Bid),
            b'A' => Some(Side::Ask),
            b'N' => Some(Side::None),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Side::Bid => 'B',
            Side::Ask => 'A',
            Side::None => 'N',
        };
        write!(f, "{c}")
    }
}

/// Header shared by every record type in the stream, MBO included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub rtype: u8,
    pub publisher_id: u16,
    pub instrument_id: u32,
}

/// A single decoded Market-By-Order event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MboRecord {
    pub ts_event: u64,
    pub ts_recv: u64,
    pub hd: RecordHeader,
    pub action: Action,
    pub side: Side,
    pub price: i64,
    pub size: u32,
    pub channel_id: u8,
    pub order_id: u64,
    pub flags: Flags,
    pub ts_in_delta: i32,
    pub sequence: u32,
}

impl MboRecord {
    /// Whether this record's flags mark it as a top-of-book implicit
    /// level update rather than a discrete order.
    pub fn is_tob(&self) -> bool {
        self.flags.contains(Flags::TOB)
    }

    /// Decode one 55-byte packed little-endian record.
    ///
    /// # Errors
    /// Returns [`RecordError`] when `buf` is short, or the action/side
    /// bytes don't map to a known variant.
    pub fn decode(buf: &[u8]) -> Result<Self, RecordError> {
        if buf.len() < RECORD_LEN {
            return Err(RecordError::Truncated {
                needed: RECORD_LEN,
                got: buf.len(),
            });
        }

        let ts_event = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let ts_recv = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let rtype = buf[16];
        let publisher_id = u16::from_le_bytes(buf[17..19].try_into().unwrap());
        let instrument_id = u32::from_le_bytes(buf[19..23].try_into().unwrap());
        let action_byte = buf[23];
        let side_byte = buf[24];
        let price = i64::from_le_bytes(buf[25..33].try_into().unwrap());
        let size = u32::from_le_bytes(buf[33..37].try_into().unwrap());
        let channel_id = buf[37];
        let order_id = u64::from_le_bytes(buf[38..46].try_into().unwrap());
        let flags_byte = buf[46];
        let ts_in_delta = i32::from_le_bytes(buf[47..51].try_into().unwrap());
        let sequence = u32::from_le_bytes(buf[51..55].try_into().unwrap());

        let action = Action::from_byte(action_byte)
            .ok_or(RecordError::UnknownAction { byte: action_byte })?;
        let side = Side::from_byte(side_byte).ok_or(RecordError::UnknownSide { byte: side_byte })?;

        Ok(MboRecord {
            ts_event,
            ts_recv,
            hd: RecordHeader {
                rtype,
                publisher_id,
                instrument_id,
            },
            action,
            side,
            price,
            size,
            channel_id,
            order_id,
            flags: Flags::from_bits_truncate(flags_byte),
            ts_in_delta,
            sequence,
        })
    }

    /// Encode back into the 55-byte wire layout. Primarily useful for
    /// tests and for re-framing records read from a DBN source.
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        out[0..8].copy_from_slice(&self.ts_event.to_le_bytes());
        out[8..16].copy_from_slice(&self.ts_recv.to_le_bytes());
        out[16] = self.hd.rtype;
        out[17..19].copy_from_slice(&self.hd.publisher_id.to_le_bytes());
        out[19..23].copy_from_slice(&self.hd.instrument_id.to_le_bytes());
        out[23] = self.action.to_string().as_bytes()[0];
        out[24] = self.side.to_string().as_bytes()[0];
        out[25..33].copy_from_slice(&self.price.to_le_bytes());
        out[33..37].copy_from_slice(&self.size.to_le_bytes());
        out[37] = self.channel_id;
        out[38..46].copy_from_slice(&self.order_id.to_le_bytes());
        out[46] = self.flags.bits();
        out[47..51].copy_from_slice(&self.ts_in_delta.to_le_bytes());
        out[51..55].copy_from_slice(&self.sequence.to_le_bytes());
        out
    }
}

/// Errors decoding a wire record. Always [`InputMalformed`](crate::frame::FrameError)
/// at the frame-reader level.
#[derive(Debug)]
#[non_exhaustive]
pub enum RecordError {
    Truncated { needed: usize, got: usize },
    UnknownAction { byte: u8 },
    UnknownSide { byte: u8 },
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::Truncated { needed, got } => {
                write!(f, "truncated record: needed {needed} bytes, got {got}")
            }
            RecordError::UnknownAction { byte } => {
                write!(f, "unknown action byte {byte:#04x} ({byte})")
            }
            RecordError::UnknownSide { byte } => {
                write!(f, "unknown side byte {byte:#04x} ({byte})")
            }
        }
    }
}

impl std::error::Error for RecordError {}
