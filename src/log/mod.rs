mod reader;
mod writer;

pub const HEADER_SIZE: usize = 4 + 2 + 1;

#[cfg(test)]
pub const BLOCK_SIZE: usize = 4096;
#[cfg(not(test))]
pub const BLOCK_SIZE: usize = 32768;
pub const LOG_PADDING: &[u8] = b"\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00";

#[repr(u8)]
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum RecordType {
    // Zero is reserved for preallocated files
    ZeroType = 0,
    FullType = 1,

    // For fragments
    FirstType = 2,
    MiddleType = 3,
    LastType = 4,
    Unknown = 127,
}

impl From<u8> for RecordType {
    fn from(x: u8) -> Self {
        if x > 4 {
            RecordType::Unknown
        } else {
            unsafe { std::mem::transmute(x) }
        }
    }
}

pub const MAX_RECORD_TYPE: u8 = RecordType::LastType as u8;

#[repr(u8)]
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum RecordError {
    Eof = 9,
    // An invalid physical record: bad CRC, or a zero-length record.
    BadRecord = 10,
    // We failed to read a valid header.
    BadHeader = 11,
    // The record length runs past the data we have.
    BadRecordLen = 13,
    // The record checksum does not match its payload.
    BadRecordChecksum = 14,
    Unknown = 127,
}

impl From<u8> for RecordError {
    fn from(x: u8) -> Self {
        match x {
            9 => RecordError::Eof,
            10 => RecordError::BadRecord,
            11 => RecordError::BadHeader,
            13 => RecordError::BadRecordLen,
            14 => RecordError::BadRecordChecksum,
            _ => RecordError::Unknown,
        }
    }
}

pub use reader::LogReader;
pub use writer::LogWriter;
