use crate::common::{make_table_file_name, InternalKeyComparator, Result};
use crate::options::ImmutableDBOptions;
use crate::table::{TableFactory, TableReader, TableReaderOptions};
use crate::util::LruCache;
use crate::version::FileMetaData;
use std::sync::{Arc, Mutex};

/// Caches open table readers by file number so repeated compactions and
/// verification scans do not reopen and reparse the same file.
pub struct TableCache {
    cache: Mutex<LruCache<Arc<dyn TableReader>>>,
    options: Arc<ImmutableDBOptions>,
    factory: Arc<dyn TableFactory>,
    comparator: InternalKeyComparator,
}

impl TableCache {
    pub fn new(
        options: Arc<ImmutableDBOptions>,
        factory: Arc<dyn TableFactory>,
        comparator: InternalKeyComparator,
        capacity: usize,
    ) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            options,
            factory,
            comparator,
        }
    }

    pub async fn get_table_reader(&self, m: &FileMetaData) -> Result<Arc<dyn TableReader>> {
        {
            let mut cache = self.cache.lock().unwrap();
            if let Some(reader) = cache.lookup(m.id()) {
                return Ok(reader);
            }
        }
        let fname = make_table_file_name(&self.options.db_path, m.id());
        let file = self.options.fs.open_random_access_file(fname)?;
        let read_opts = TableReaderOptions {
            file_size: m.fd.file_size as usize,
            level: m.level,
            internal_comparator: self.comparator.clone(),
        };
        let reader = self.factory.open_reader(&read_opts, file).await?;
        let mut cache = self.cache.lock().unwrap();
        cache.insert(m.id(), reader.clone());
        Ok(reader)
    }

    pub fn evict(&self, file_number: u64) {
        let mut cache = self.cache.lock().unwrap();
        cache.erase(file_number);
    }
}
