//! Error type for the persistence writer.

use std::fmt;

/// Errors raised while writing batches or managing session lifecycle.
///
/// Distinguishes the two `PersistenceError` kinds from the error
/// taxonomy: a [`RowLevel`](PersistError::RowLevel) failure aborts only
/// the batch transaction it occurred in; a
/// [`Connection`](PersistError::Connection) failure must fail the whole
/// session.
#[derive(Debug)]
#[non_exhaustive]
pub enum PersistError {
    /// A single row insert was rejected; the batch's transaction is
    /// rolled back, logged, and the writer continues with the next
    /// batch.
    RowLevel { message: String },
    /// The connection was lost or a transaction could not commit; the
    /// session must fail and stop consuming further events.
    Connection { message: String },
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistError::RowLevel { message } => write!(f, "row-level persistence error: {message}"),
            PersistError::Connection { message } => {
                write!(f, "connection-level persistence error: {message}")
            }
        }
    }
}

impl std::error::Error for PersistError {}

impl PersistError {
    pub(crate) fn row(err: rusqlite::Error) -> Self {
        PersistError::RowLevel {
            message: err.to_string(),
        }
    }

    pub(crate) fn connection(err: rusqlite::Error) -> Self {
        PersistError::Connection {
            message: err.to_string(),
        }
    }
}
