mod sorted_run;
mod table_cache;

use crate::common::{InternalKeyComparator, KeyComparator, Result};
use crate::common::{RandomAccessFileReader, WritableFileWriter};
use crate::iterator::AsyncIterator;
use async_trait::async_trait;
use std::sync::Arc;

pub use sorted_run::{SortedRunTableBuilder, SortedRunTableFactory, SortedRunTableReader};
pub use table_cache::TableCache;

#[derive(Default)]
pub struct TableBuilderOptions {
    pub skip_filter: bool,
    pub internal_comparator: InternalKeyComparator,
    pub column_family_id: u32,
    pub target_file_size: usize,
}

pub struct TableReaderOptions {
    pub file_size: usize,
    pub level: u32,
    pub internal_comparator: InternalKeyComparator,
}

impl Default for TableReaderOptions {
    fn default() -> Self {
        TableReaderOptions {
            file_size: 0,
            level: 0,
            internal_comparator: InternalKeyComparator::default(),
        }
    }
}

/// Writes one table file. `add` expects internal keys in ascending order;
/// `finish` seals the file and makes its metadata final. A builder that is
/// not finished must be abandoned so the partial file can be discarded.
#[async_trait]
pub trait TableBuilder: Send {
    fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()>;
    fn should_flush(&self) -> bool;
    async fn flush(&mut self) -> Result<()>;
    async fn finish(&mut self) -> Result<()>;
    fn abandon(&mut self);
    fn file_size(&self) -> u64;
    fn num_entries(&self) -> u64;
    fn num_deletions(&self) -> u64;
    fn need_compact(&self) -> bool;
    fn last_key(&self) -> &[u8];
}

pub trait TableReader: Send + Sync {
    fn new_iterator(&self) -> Box<dyn AsyncIterator>;
    fn file_size(&self) -> u64;
    fn num_entries(&self) -> u64;
}

#[async_trait]
pub trait TableFactory: Send + Sync {
    fn name(&self) -> &'static str;
    async fn open_reader(
        &self,
        options: &TableReaderOptions,
        file: Box<RandomAccessFileReader>,
    ) -> Result<Arc<dyn TableReader>>;
    fn new_builder(
        &self,
        options: &TableBuilderOptions,
        file: Box<WritableFileWriter>,
    ) -> Result<Box<dyn TableBuilder>>;
}

/// Table held entirely in a sorted vector. Only used as a lightweight
/// data source in tests.
pub struct InMemTableIterator {
    data: Vec<(Vec<u8>, Vec<u8>)>,
    comparator: InternalKeyComparator,
    cursor: usize,
}

impl InMemTableIterator {
    pub fn new(mut data: Vec<(Vec<u8>, Vec<u8>)>, comparator: &InternalKeyComparator) -> Self {
        data.sort_by(|a, b| comparator.compare_key(&a.0, &b.0));
        let cursor = data.len();
        Self {
            data,
            comparator: comparator.clone(),
            cursor,
        }
    }
}

#[async_trait]
impl AsyncIterator for InMemTableIterator {
    fn valid(&self) -> bool {
        self.cursor < self.data.len()
    }

    async fn seek(&mut self, key: &[u8]) {
        self.cursor = self
            .data
            .partition_point(|(k, _)| self.comparator.compare_key(k, key).is_lt());
    }

    async fn seek_to_first(&mut self) {
        self.cursor = 0;
    }

    async fn next(&mut self) {
        self.cursor += 1;
    }

    fn key(&self) -> &[u8] {
        &self.data[self.cursor].0
    }

    fn value(&self) -> &[u8] {
        &self.data[self.cursor].1
    }
}
