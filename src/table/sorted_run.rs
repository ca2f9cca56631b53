use crate::common::format::{extract_value_type, ValueType};
use crate::common::{
    Error, InternalKeyComparator, KeyComparator, RandomAccessFileReader, Result,
    WritableFileWriter,
};
use crate::iterator::AsyncIterator;
use crate::table::{
    TableBuilder, TableBuilderOptions, TableFactory, TableReader, TableReaderOptions,
};
use crate::util::{
    crc_mask, crc_unmask, decode_fixed_uint32, decode_fixed_uint64, get_length_prefixed_slice,
    put_length_prefixed_slice,
};
use async_trait::async_trait;
use std::sync::Arc;

const SORTED_RUN_MAGIC: u32 = 0x5352_554e;
const FOOTER_SIZE: usize = 32;
const FLUSH_BLOCK_SIZE: usize = 64 * 1024;

/// A flat run of length-prefixed internal key/value records followed by a
/// fixed footer:
///
/// ```text
/// record*  | num_entries u64 | num_deletions u64 | data_size u64
///          | masked crc32c of data u32 | magic u32
/// ```
///
/// Records are stored in ascending internal key order and the reader keeps
/// the whole run in memory, so lookups are a binary search.
#[derive(Default, Clone)]
pub struct SortedRunTableFactory {}

#[async_trait]
impl TableFactory for SortedRunTableFactory {
    fn name(&self) -> &'static str {
        "SortedRunTable"
    }

    async fn open_reader(
        &self,
        options: &TableReaderOptions,
        file: Box<RandomAccessFileReader>,
    ) -> Result<Arc<dyn TableReader>> {
        let reader =
            SortedRunTableReader::open(file, options.file_size, options.internal_comparator.clone())
                .await?;
        Ok(Arc::new(reader))
    }

    fn new_builder(
        &self,
        options: &TableBuilderOptions,
        file: Box<WritableFileWriter>,
    ) -> Result<Box<dyn TableBuilder>> {
        Ok(Box::new(SortedRunTableBuilder::new(
            file,
            options.internal_comparator.clone(),
        )))
    }
}

pub struct SortedRunTableBuilder {
    file: Box<WritableFileWriter>,
    comparator: InternalKeyComparator,
    buf: Vec<u8>,
    last_key: Vec<u8>,
    num_entries: u64,
    num_deletions: u64,
    data_size: u64,
    crc: u32,
    abandoned: bool,
}

impl SortedRunTableBuilder {
    pub fn new(file: Box<WritableFileWriter>, comparator: InternalKeyComparator) -> Self {
        Self {
            file,
            comparator,
            buf: Vec::with_capacity(FLUSH_BLOCK_SIZE),
            last_key: vec![],
            num_entries: 0,
            num_deletions: 0,
            data_size: 0,
            crc: 0,
            abandoned: false,
        }
    }
}

#[async_trait]
impl TableBuilder for SortedRunTableBuilder {
    fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.num_entries > 0 && !self.comparator.compare_key(&self.last_key, key).is_lt() {
            return Err(Error::Corruption(format!(
                "keys added out of order to table {}",
                self.file.name()
            )));
        }
        put_length_prefixed_slice(&mut self.buf, key);
        put_length_prefixed_slice(&mut self.buf, value);
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        if extract_value_type(key) == ValueType::TypeDeletion as u8 {
            self.num_deletions += 1;
        }
        Ok(())
    }

    fn should_flush(&self) -> bool {
        self.buf.len() >= FLUSH_BLOCK_SIZE
    }

    async fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.crc = crc32c::crc32c_append(self.crc, &self.buf);
            self.data_size += self.buf.len() as u64;
            self.file.append(&self.buf).await?;
            self.buf.clear();
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.flush().await?;
        let mut footer = Vec::with_capacity(FOOTER_SIZE);
        footer.extend_from_slice(&self.num_entries.to_le_bytes());
        footer.extend_from_slice(&self.num_deletions.to_le_bytes());
        footer.extend_from_slice(&self.data_size.to_le_bytes());
        footer.extend_from_slice(&crc_mask(self.crc).to_le_bytes());
        footer.extend_from_slice(&SORTED_RUN_MAGIC.to_le_bytes());
        self.file.append(&footer).await?;
        self.file.sync().await?;
        Ok(())
    }

    fn abandon(&mut self) {
        self.abandoned = true;
        self.buf.clear();
    }

    fn file_size(&self) -> u64 {
        self.file.file_size() as u64 + self.buf.len() as u64
    }

    fn num_entries(&self) -> u64 {
        self.num_entries
    }

    fn num_deletions(&self) -> u64 {
        self.num_deletions
    }

    fn need_compact(&self) -> bool {
        self.num_deletions * 4 > self.num_entries
    }

    fn last_key(&self) -> &[u8] {
        &self.last_key
    }
}

pub struct SortedRunTableReader {
    entries: Arc<Vec<(Vec<u8>, Vec<u8>)>>,
    comparator: InternalKeyComparator,
    file_size: u64,
    num_entries: u64,
}

impl SortedRunTableReader {
    pub async fn open(
        file: Box<RandomAccessFileReader>,
        file_size: usize,
        comparator: InternalKeyComparator,
    ) -> Result<Self> {
        let file_size = if file_size > 0 {
            file_size
        } else {
            file.file_size()
        };
        if file_size < FOOTER_SIZE {
            return Err(Error::Corruption(format!(
                "table {} is too short for a footer",
                file.name()
            )));
        }
        let mut content = vec![0u8; file_size];
        let read = file.read_exact(0, file_size, &mut content).await?;
        if read != file_size {
            return Err(Error::Corruption(format!(
                "table {} truncated, expect {} bytes got {}",
                file.name(),
                file_size,
                read
            )));
        }
        let footer = &content[(file_size - FOOTER_SIZE)..];
        let magic = decode_fixed_uint32(&footer[28..]);
        if magic != SORTED_RUN_MAGIC {
            return Err(Error::Corruption(format!(
                "bad magic number in table {}",
                file.name()
            )));
        }
        let num_entries = decode_fixed_uint64(footer);
        let data_size = decode_fixed_uint64(&footer[16..]) as usize;
        if data_size + FOOTER_SIZE != file_size {
            return Err(Error::Corruption(format!(
                "table {} data size mismatch",
                file.name()
            )));
        }
        let data = &content[..data_size];
        let expect_crc = crc_unmask(decode_fixed_uint32(&footer[24..]));
        let actual_crc = crc32c::crc32c(data);
        if expect_crc != actual_crc {
            return Err(Error::InvalidChecksum(format!(
                "table {} checksum mismatch, expect {} got {}",
                file.name(),
                expect_crc,
                actual_crc
            )));
        }
        let mut entries = Vec::with_capacity(num_entries as usize);
        let mut offset = 0;
        while offset < data_size {
            let key = get_length_prefixed_slice(&data[offset..], &mut offset)
                .ok_or_else(|| Error::Corruption(format!("bad record in table {}", file.name())))?
                .to_vec();
            let value = get_length_prefixed_slice(&data[offset..], &mut offset)
                .ok_or_else(|| Error::Corruption(format!("bad record in table {}", file.name())))?
                .to_vec();
            entries.push((key, value));
        }
        if entries.len() as u64 != num_entries {
            return Err(Error::Corruption(format!(
                "table {} entry count mismatch, footer says {} found {}",
                file.name(),
                num_entries,
                entries.len()
            )));
        }
        Ok(Self {
            entries: Arc::new(entries),
            comparator,
            file_size: file_size as u64,
            num_entries,
        })
    }
}

impl TableReader for SortedRunTableReader {
    fn new_iterator(&self) -> Box<dyn AsyncIterator> {
        Box::new(SortedRunTableIterator {
            cursor: self.entries.len(),
            entries: self.entries.clone(),
            comparator: self.comparator.clone(),
        })
    }

    fn file_size(&self) -> u64 {
        self.file_size
    }

    fn num_entries(&self) -> u64 {
        self.num_entries
    }
}

pub struct SortedRunTableIterator {
    entries: Arc<Vec<(Vec<u8>, Vec<u8>)>>,
    comparator: InternalKeyComparator,
    cursor: usize,
}

#[async_trait]
impl AsyncIterator for SortedRunTableIterator {
    fn valid(&self) -> bool {
        self.cursor < self.entries.len()
    }

    async fn seek(&mut self, key: &[u8]) {
        self.cursor = self
            .entries
            .partition_point(|(k, _)| self.comparator.compare_key(k, key).is_lt());
    }

    async fn seek_to_first(&mut self) {
        self.cursor = 0;
    }

    async fn next(&mut self) {
        self.cursor += 1;
    }

    fn key(&self) -> &[u8] {
        &self.entries[self.cursor].0
    }

    fn value(&self) -> &[u8] {
        &self.entries[self.cursor].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::format::pack_sequence_and_type;
    use crate::common::{make_internal_seek_key, InMemFileSystem};
    use crate::common::FileSystem;
    use std::path::PathBuf;
    use tokio::runtime::Runtime;

    fn internal_key(user_key: &[u8], seq: u64, tp: ValueType) -> Vec<u8> {
        let mut key = user_key.to_vec();
        key.extend_from_slice(&pack_sequence_and_type(seq, tp).to_le_bytes());
        key
    }

    #[test]
    fn test_build_and_read_table() {
        let fs = InMemFileSystem::default();
        let path = PathBuf::from("db/000007.sst");
        let comparator = InternalKeyComparator::default();
        let r = Runtime::new().unwrap();

        let file = fs.open_writable_file_writer(path.clone()).unwrap();
        let factory = SortedRunTableFactory::default();
        let opts = TableBuilderOptions {
            internal_comparator: comparator.clone(),
            ..Default::default()
        };
        let mut builder = factory.new_builder(&opts, file).unwrap();
        for i in 0..1000u64 {
            let k = internal_key(format!("k{:08}", i).as_bytes(), i + 1, ValueType::TypeValue);
            builder.add(&k, format!("v{}", i).as_bytes()).unwrap();
            if builder.should_flush() {
                r.block_on(builder.flush()).unwrap();
            }
        }
        r.block_on(builder.finish()).unwrap();
        assert_eq!(builder.num_entries(), 1000);
        assert_eq!(builder.num_deletions(), 0);

        let read_opts = TableReaderOptions {
            file_size: builder.file_size() as usize,
            internal_comparator: comparator.clone(),
            ..Default::default()
        };
        let file = fs.open_random_access_file(path.clone()).unwrap();
        let reader = r.block_on(factory.open_reader(&read_opts, file)).unwrap();
        assert_eq!(reader.num_entries(), 1000);

        let mut iter = reader.new_iterator();
        r.block_on(iter.seek_to_first());
        let mut i = 0;
        while iter.valid() {
            assert_eq!(
                crate::common::extract_user_key(iter.key()),
                format!("k{:08}", i).as_bytes()
            );
            r.block_on(iter.next());
            i += 1;
        }
        assert_eq!(i, 1000);

        r.block_on(iter.seek(&make_internal_seek_key(b"k00000500")));
        assert!(iter.valid());
        assert_eq!(iter.value(), b"v500");
        r.block_on(iter.seek(&make_internal_seek_key(b"k00000999z")));
        assert!(!iter.valid());
    }

    #[test]
    fn test_out_of_order_add_rejected() {
        let fs = InMemFileSystem::default();
        let comparator = InternalKeyComparator::default();
        let file = fs
            .open_writable_file_writer(PathBuf::from("db/000008.sst"))
            .unwrap();
        let mut builder = SortedRunTableBuilder::new(file, comparator);
        builder
            .add(&internal_key(b"b", 5, ValueType::TypeValue), b"v")
            .unwrap();
        let e = builder
            .add(&internal_key(b"a", 6, ValueType::TypeValue), b"v")
            .unwrap_err();
        assert!(e.is_corruption());
    }

    #[test]
    fn test_corrupt_table_detected() {
        let fs = InMemFileSystem::default();
        let path = PathBuf::from("db/000009.sst");
        let comparator = InternalKeyComparator::default();
        let r = Runtime::new().unwrap();

        let file = fs.open_writable_file_writer(path.clone()).unwrap();
        let mut builder = SortedRunTableBuilder::new(file, comparator.clone());
        for i in 0..10u64 {
            builder
                .add(
                    &internal_key(format!("k{}", i).as_bytes(), i + 1, ValueType::TypeValue),
                    b"value",
                )
                .unwrap();
        }
        r.block_on(builder.finish()).unwrap();

        let mut content = fs.read_file_content(path.clone()).unwrap();
        content[3] ^= 0xff;
        let corrupted = PathBuf::from("db/000010.sst");
        {
            let mut writer = fs.open_writable_file_writer(corrupted.clone()).unwrap();
            r.block_on(writer.append(&content)).unwrap();
            r.block_on(writer.sync()).unwrap();
        }
        let file = fs.open_random_access_file(corrupted).unwrap();
        let e = r
            .block_on(SortedRunTableReader::open(
                file,
                content.len(),
                comparator,
            ))
            .err()
            .unwrap();
        assert!(matches!(e, Error::InvalidChecksum(_)));
    }
}
