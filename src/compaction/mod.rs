mod compaction;
mod compaction_iter;
mod compaction_job;
mod flush_job;
mod merge_helper;
mod picker;
mod stats;

pub use compaction::{Compaction, CompactionInput, GrandparentState};
pub use compaction_iter::CompactionIter;
pub use compaction_job::run_compaction_job;
pub use flush_job::run_flush_memtable_job;
pub use merge_helper::{MergeHelper, MergeOutcome};
pub use picker::LevelCompactionPicker;
pub use stats::{CompactionIterStats, CompactionStatistics};

use crate::common::Result;
use crate::iterator::{AsyncIterator, InternalIterator};
use crate::memtable::Memtable;
use crate::version::VersionEdit;
use std::sync::Arc;

/// The sink that makes a batch of version edits durable. Flush and
/// compaction jobs only produce edits; the engine owns the manifest and
/// decides when they become visible.
#[async_trait::async_trait]
pub trait CompactionEngine: Clone + Sync + Send + 'static {
    async fn apply(&mut self, edits: Vec<VersionEdit>) -> Result<()>;
}

/// Memtables picked for one flush round, tagged with their column family.
#[derive(Default)]
pub struct FlushRequest {
    pub mems: Vec<(u32, Arc<Memtable>)>,
}

impl FlushRequest {
    pub fn new(cf_id: u32, mem: Arc<Memtable>) -> Self {
        Self {
            mems: vec![(cf_id, mem)],
        }
    }

    pub fn add_memtable(&mut self, cf_id: u32, mem: Arc<Memtable>) {
        self.mems.push((cf_id, mem));
    }
}

/// Either a synchronous iterator (memtables) or an asynchronous one
/// (table files). Compaction code is written against this enum so the
/// same key-reduction logic serves flushes and compactions.
pub(crate) enum InnerIterator {
    Async(Box<dyn AsyncIterator>),
    Sync(Box<dyn InternalIterator>),
}

impl InnerIterator {
    pub async fn seek(&mut self, key: &[u8]) {
        match self {
            InnerIterator::Async(iter) => iter.seek(key).await,
            InnerIterator::Sync(iter) => iter.seek(key),
        }
    }

    pub async fn seek_to_first(&mut self) {
        match self {
            InnerIterator::Async(iter) => iter.seek_to_first().await,
            InnerIterator::Sync(iter) => iter.seek_to_first(),
        }
    }

    pub async fn next(&mut self) {
        match self {
            InnerIterator::Async(iter) => iter.next().await,
            InnerIterator::Sync(iter) => iter.next(),
        }
    }

    pub fn valid(&self) -> bool {
        match self {
            InnerIterator::Async(iter) => iter.valid(),
            InnerIterator::Sync(iter) => iter.valid(),
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            InnerIterator::Async(iter) => iter.key(),
            InnerIterator::Sync(iter) => iter.key(),
        }
    }

    pub fn value(&self) -> &[u8] {
        match self {
            InnerIterator::Async(iter) => iter.value(),
            InnerIterator::Sync(iter) => iter.value(),
        }
    }

    pub fn status(&self) -> Result<()> {
        match self {
            InnerIterator::Async(iter) => iter.status(),
            InnerIterator::Sync(iter) => iter.status(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use crate::common::format::{pack_sequence_and_type, ValueType};
    use crate::common::InMemFileSystem;
    use crate::iterator::AsyncIterator;
    use crate::table::TableReader;
    use crate::version::{FileMetaData, TableFile};
    use std::path::PathBuf;
    use std::sync::Arc;

    struct EmptyTable {}

    impl TableReader for EmptyTable {
        fn new_iterator(&self) -> Box<dyn AsyncIterator> {
            unimplemented!()
        }
        fn file_size(&self) -> u64 {
            0
        }
        fn num_entries(&self) -> u64 {
            0
        }
    }

    fn ikey(user_key: &[u8], seq: u64) -> Vec<u8> {
        let mut k = user_key.to_vec();
        k.extend_from_slice(&pack_sequence_and_type(seq, ValueType::TypeValue).to_le_bytes());
        k
    }

    /// A table handle with metadata only, for tests that never read data.
    pub(crate) fn make_table(
        id: u64,
        level: u32,
        smallest: &[u8],
        largest: &[u8],
        file_size: u64,
    ) -> Arc<TableFile> {
        let mut meta = FileMetaData::new(id, level, ikey(smallest, 1), ikey(largest, 1));
        meta.fd.file_size = file_size;
        Arc::new(TableFile::new(
            meta,
            Arc::new(EmptyTable {}),
            Arc::new(InMemFileSystem::default()),
            PathBuf::from(format!("db/{:06}.sst", id)),
        ))
    }
}
