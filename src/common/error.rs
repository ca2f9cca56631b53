use std::io;
use std::result;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid Configuration: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[source] Box<io::Error>),
    #[error("Corruption: {0}")]
    Corruption(String),
    #[error("Invalid checksum: {0}")]
    InvalidChecksum(String),
    #[error("Invalid filename: {0}")]
    InvalidFile(String),
    #[error("Invalid data: {0}")]
    VarDecode(&'static str),
    #[error("Error when reading table: {0}")]
    TableRead(String),
    #[error("Task Cancel because of: {0}")]
    Cancel(String),
    #[error("Error when reading from log: {0}")]
    LogRead(String),
    #[error("Error when compaction: {0}")]
    CompactionError(String),
    #[error("Other Error: {0}")]
    Other(String),
}

impl Error {
    /// Cancellation is a benign outcome of shutdown or a dropped column
    /// family, never a failure of the data itself.
    pub fn is_cancel(&self) -> bool {
        matches!(self, Error::Cancel(_))
    }

    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::Corruption(_) | Error::InvalidChecksum(_) | Error::VarDecode(_)
        )
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(e: io::Error) -> Error {
        Error::Io(Box::new(e))
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::Config(e) => Error::Config(e.clone()),
            Error::Io(e) => Error::Other(format!("IO Error: {:?}", e)),
            Error::Corruption(s) => Error::Corruption(s.clone()),
            Error::InvalidChecksum(s) => Error::InvalidChecksum(s.clone()),
            Error::InvalidFile(s) => Error::InvalidFile(s.clone()),
            Error::VarDecode(x) => Error::VarDecode(*x),
            Error::TableRead(x) => Error::TableRead(x.clone()),
            Error::Cancel(e) => Error::Cancel(e.clone()),
            Error::LogRead(x) => Error::LogRead(x.clone()),
            Error::CompactionError(s) => Error::CompactionError(s.clone()),
            Error::Other(x) => Error::Other(x.clone()),
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
