use super::{RecordType, BLOCK_SIZE, HEADER_SIZE, MAX_RECORD_TYPE};
use crate::common::SequentialFileReader;
use crate::common::{Error, Result};
use crate::log::RecordError;
use crate::util::{crc_unmask, decode_fixed_uint32};

#[derive(Default, Clone, Copy)]
struct Span {
    offset: usize,
    limit: usize,
}

impl Span {
    fn len(&self) -> usize {
        self.limit - self.offset
    }
}

pub struct LogReader {
    reader: Box<SequentialFileReader>,
    buffer: Vec<u8>,
    data: Span,
    end_of_buffer_offset: usize,
    eof: bool,
}

impl LogReader {
    pub fn new(reader: Box<SequentialFileReader>) -> Self {
        Self {
            reader,
            buffer: vec![],
            data: Span::default(),
            end_of_buffer_offset: 0,
            eof: false,
        }
    }

    pub async fn read_record(&mut self, record: &mut Vec<u8>) -> Result<bool> {
        let mut in_fragmented_record = false;
        record.clear();
        loop {
            let (fragment, record_type) = self.read_physical_record().await?;
            if record_type <= MAX_RECORD_TYPE {
                match record_type.into() {
                    RecordType::ZeroType => {}
                    RecordType::FullType => {
                        record.extend_from_slice(&self.buffer[fragment.offset..fragment.limit]);
                        return Ok(true);
                    }
                    RecordType::FirstType => {
                        in_fragmented_record = true;
                        record.clear();
                        record.extend_from_slice(&self.buffer[fragment.offset..fragment.limit]);
                    }
                    RecordType::MiddleType => {
                        if !in_fragmented_record {
                            return Err(Error::LogRead(format!(
                                "missing start of fragmented record({})",
                                fragment.len()
                            )));
                        }
                        record.extend_from_slice(&self.buffer[fragment.offset..fragment.limit]);
                    }
                    RecordType::LastType => {
                        if !in_fragmented_record {
                            return Err(Error::LogRead(format!(
                                "missing start of fragmented record({})",
                                fragment.len()
                            )));
                        }
                        record.extend_from_slice(&self.buffer[fragment.offset..fragment.limit]);
                        return Ok(true);
                    }
                    RecordType::Unknown => {
                        return Err(Error::LogRead("unknown record type".to_string()));
                    }
                }
            } else {
                match record_type.into() {
                    RecordError::Eof => {
                        if in_fragmented_record {
                            record.clear();
                        }
                        return Ok(false);
                    }
                    // A corrupted fragment poisons the whole logical record.
                    RecordError::BadRecord
                    | RecordError::BadRecordLen
                    | RecordError::BadRecordChecksum => {
                        if in_fragmented_record {
                            record.clear();
                            in_fragmented_record = false;
                        }
                    }
                    _ => {
                        return Ok(false);
                    }
                }
            }
        }
    }

    async fn read_physical_record(&mut self) -> Result<(Span, u8)> {
        loop {
            let mut fragment = Span::default();
            if self.data.len() < HEADER_SIZE {
                let mut r = RecordError::Eof as u8;
                if !self.try_read_more(&mut r).await {
                    return Ok((fragment, r));
                }
                continue;
            }
            let header = &self.buffer[self.data.offset..];
            let a = (header[4] as u32) & 0xff;
            let b = (header[5] as u32) & 0xff;
            let tp = header[6];
            if tp > MAX_RECORD_TYPE {
                return Ok((fragment, RecordError::BadHeader as u8));
            }
            let l = (a | (b << 8)) as usize;
            if l + HEADER_SIZE > self.data.len() {
                self.data.limit = 0;
                self.data.offset = 0;
                if !self.eof {
                    return Err(Error::LogRead("read log header error".to_string()));
                } else {
                    return Ok((fragment, RecordError::Eof as u8));
                }
            }
            if tp == RecordType::ZeroType as u8 && l == 0 {
                // A zeroed header marks the preallocated tail of the file.
                // Nothing after it in this block can be a record, so the
                // rest of the buffer is consumed before reporting it.
                self.data.offset = 0;
                self.data.limit = 0;
                return Ok((fragment, RecordError::BadRecord as u8));
            }
            let expect = crc_unmask(decode_fixed_uint32(&header[..4]));
            let actual = crc32c::crc32c(&self.buffer
                [(self.data.offset + HEADER_SIZE - 1)..(self.data.offset + HEADER_SIZE + l)]);
            if expect != actual {
                // Skip the rest of the buffer; a bad CRC usually means a
                // torn tail, not a single flipped record.
                self.data.offset = 0;
                self.data.limit = 0;
                return Ok((fragment, RecordError::BadRecordChecksum as u8));
            }
            fragment.offset = self.data.offset + HEADER_SIZE;
            fragment.limit = fragment.offset + l;
            self.data.offset += HEADER_SIZE + l;
            return Ok((fragment, tp));
        }
    }

    async fn try_read_more(&mut self, err: &mut u8) -> bool {
        if self.eof {
            *err = RecordError::Eof as u8;
            self.data.limit = 0;
            self.data.offset = 0;
            return false;
        }
        if self.buffer.len() < BLOCK_SIZE {
            self.buffer.resize(BLOCK_SIZE, 0);
        }
        match self.reader.read(&mut self.buffer[..BLOCK_SIZE]).await {
            Ok(r) => {
                self.end_of_buffer_offset += r;
                self.data.offset = 0;
                self.data.limit = r;
                if r < BLOCK_SIZE {
                    self.eof = true;
                }
                true
            }
            Err(_) => {
                *err = RecordError::Eof as u8;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::{LogReader, LogWriter, BLOCK_SIZE};
    use crate::common::{FileSystem, SyncPosixFileSystem};
    use rand::{thread_rng, Rng};
    use tokio::runtime::Runtime;

    fn inner_test_log_read_and_write(record_size: usize) {
        let dir = tempfile::Builder::new()
            .prefix("test_log_read_and_write")
            .tempdir()
            .unwrap();
        let fs = SyncPosixFileSystem {};
        let writer = fs
            .open_writable_file_writer(dir.path().join("wal"))
            .unwrap();
        let mut writer = LogWriter::new(writer, 0);
        let mut rng = thread_rng();
        let mut data: [u8; 100000] = [0u8; 100000];
        rng.fill(&mut data[..]);
        let r = Runtime::new().unwrap();
        r.block_on(async {
            let mut left = 100000;
            let mut offset = 0;
            while left > 0 {
                let cur = std::cmp::min(left, record_size);
                writer
                    .add_record(&data[offset..(offset + cur)])
                    .await
                    .unwrap();
                writer.fsync().await.unwrap();
                offset += cur;
                left -= cur;
            }
        });
        let reader = fs.open_sequential_file(dir.path().join("wal")).unwrap();
        let mut reader = LogReader::new(reader);
        r.block_on(async move {
            let mut record = vec![];
            let mut left = 100000;
            let mut offset = 0;
            while reader.read_record(&mut record).await.unwrap() {
                let cur = std::cmp::min(left, record_size);
                assert_eq!(record.as_slice(), &data[offset..(offset + cur)]);
                offset += cur;
                left -= cur;
            }
            assert_eq!(left, 0);
        });
    }

    #[test]
    fn test_log_read_and_write() {
        inner_test_log_read_and_write(100);
        inner_test_log_read_and_write(BLOCK_SIZE);
        inner_test_log_read_and_write(10000);
    }

    #[test]
    fn test_corrupt_record_dropped() {
        let dir = tempfile::Builder::new()
            .prefix("test_corrupt_record")
            .tempdir()
            .unwrap();
        let fs = SyncPosixFileSystem {};
        let path = dir.path().join("wal");
        let r = Runtime::new().unwrap();
        {
            let writer = fs.open_writable_file_writer(path.clone()).unwrap();
            let mut writer = LogWriter::new(writer, 0);
            r.block_on(async {
                writer.add_record(b"first-record").await.unwrap();
                writer.add_record(b"second-record").await.unwrap();
                writer.fsync().await.unwrap();
            });
        }
        // Flip a payload byte of the second record.
        let mut content = std::fs::read(&path).unwrap();
        let second_payload = super::HEADER_SIZE * 2 + b"first-record".len() + 3;
        content[second_payload] ^= 0xff;
        std::fs::write(&path, &content).unwrap();

        let reader = fs.open_sequential_file(path).unwrap();
        let mut reader = LogReader::new(reader);
        r.block_on(async move {
            let mut record = vec![];
            assert!(reader.read_record(&mut record).await.unwrap());
            assert_eq!(record.as_slice(), b"first-record");
            assert!(!reader.read_record(&mut record).await.unwrap());
        });
    }

    #[test]
    fn test_sync_drops_preallocated_tail() {
        let dir = tempfile::Builder::new()
            .prefix("test_sync_truncates")
            .tempdir()
            .unwrap();
        let fs = SyncPosixFileSystem {};
        let path = dir.path().join("wal");
        let r = Runtime::new().unwrap();
        let writer = fs.open_writable_file_writer(path.clone()).unwrap();
        let mut writer = LogWriter::new(writer, 0);
        r.block_on(async {
            writer.add_record(b"tiny").await.unwrap();
            writer.fsync().await.unwrap();
        });
        // The file must end at the written length, not at the fallocate
        // capacity, so readers never see a zero-filled tail.
        let on_disk = std::fs::metadata(&path).unwrap().len();
        assert_eq!(on_disk as usize, writer.get_file_size());
    }

    #[test]
    fn test_zero_filled_tail_terminates_read() {
        let dir = tempfile::Builder::new()
            .prefix("test_zero_tail")
            .tempdir()
            .unwrap();
        let fs = SyncPosixFileSystem {};
        let path = dir.path().join("wal");
        let r = Runtime::new().unwrap();
        {
            let writer = fs.open_writable_file_writer(path.clone()).unwrap();
            let mut writer = LogWriter::new(writer, 0);
            r.block_on(async {
                writer.add_record(b"only-record").await.unwrap();
                writer.fsync().await.unwrap();
            });
        }
        // Extend the file with zero blocks the way a crash between
        // fallocate and truncate would leave it.
        let mut content = std::fs::read(&path).unwrap();
        content.resize(content.len() + BLOCK_SIZE * 3, 0);
        std::fs::write(&path, &content).unwrap();

        let reader = fs.open_sequential_file(path).unwrap();
        let mut reader = LogReader::new(reader);
        r.block_on(async move {
            let mut record = vec![];
            assert!(reader.read_record(&mut record).await.unwrap());
            assert_eq!(record.as_slice(), b"only-record");
            assert!(!reader.read_record(&mut record).await.unwrap());
        });
    }
}
