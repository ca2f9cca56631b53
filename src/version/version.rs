use crate::common::{Error, KeyComparator, Result};
use crate::version::TableFile;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct LevelInfo {
    // Sorted by smallest key; files never overlap within a level.
    pub tables: Vec<Arc<TableFile>>,
    pub total_file_size: u64,
}

/// The file layout of one column family at a point in time. Versions are
/// immutable; applying an edit produces a new version that shares unchanged
/// levels with its parent.
#[derive(Clone, Default)]
pub struct VersionStorageInfo {
    level0: LevelInfo,
    levels: Vec<LevelInfo>,
    max_level: usize,
}

impl VersionStorageInfo {
    pub fn new(to_add: Vec<Arc<TableFile>>, max_level: usize) -> Self {
        let max_level = std::cmp::max(max_level, 2);
        let info = VersionStorageInfo {
            level0: LevelInfo::default(),
            levels: vec![LevelInfo::default(); max_level - 1],
            max_level,
        };
        if to_add.is_empty() {
            info
        } else {
            // Fresh versions are only built from a recovered manifest, where
            // every referenced file must exist.
            info.apply(to_add, &[]).unwrap()
        }
    }

    pub fn size(&self) -> usize {
        self.max_level
    }

    pub fn max_level(&self) -> usize {
        self.max_level
    }

    pub fn get_level0_file_num(&self) -> usize {
        self.level0.tables.len()
    }

    pub fn level_total_file_size(&self, level: usize) -> u64 {
        if level == 0 {
            self.level0.total_file_size
        } else {
            self.levels[level - 1].total_file_size
        }
    }

    pub fn level_tables(&self, level: usize) -> &[Arc<TableFile>] {
        if level == 0 {
            &self.level0.tables
        } else {
            &self.levels[level - 1].tables
        }
    }

    pub fn scan<F: FnMut(&Arc<TableFile>)>(&self, mut consumer: F, level: usize) {
        for f in self.level_tables(level) {
            consumer(f);
        }
    }

    /// Builds the next version. Every deleted file must be present in this
    /// version; a miss means the manifest and the in-memory state diverged.
    pub fn apply(
        &self,
        to_add: Vec<Arc<TableFile>>,
        to_delete: &[(u32, u64)],
    ) -> Result<Self> {
        let mut levels: Vec<LevelInfo> = Vec::with_capacity(self.levels.len());
        levels.extend(self.levels.iter().cloned());
        let mut level0 = self.level0.clone();

        for (level, file_number) in to_delete {
            let info = if *level == 0 {
                &mut level0
            } else {
                let idx = *level as usize - 1;
                if idx >= levels.len() {
                    return Err(Error::Corruption(format!(
                        "delete file {} at level {} beyond max level",
                        file_number, level
                    )));
                }
                &mut levels[idx]
            };
            match info.tables.iter().position(|t| t.id() == *file_number) {
                Some(pos) => {
                    let table = info.tables.remove(pos);
                    info.total_file_size -= table.meta.fd.file_size;
                    table.mark_removed();
                }
                None => {
                    return Err(Error::Corruption(format!(
                        "compaction input file {} not found at level {}",
                        file_number, level
                    )));
                }
            }
        }

        let mut touched = vec![false; self.max_level];
        for f in to_add {
            let level = f.meta.level as usize;
            let info = if level == 0 {
                &mut level0
            } else {
                if level - 1 >= levels.len() {
                    return Err(Error::Corruption(format!(
                        "add file {} at level {} beyond max level",
                        f.id(),
                        level
                    )));
                }
                &mut levels[level - 1]
            };
            info.total_file_size += f.meta.fd.file_size;
            info.tables.push(f);
            touched[level] = true;
        }
        for (level, touched) in touched.iter().enumerate().skip(1) {
            if *touched {
                levels[level - 1]
                    .tables
                    .sort_by(|a, b| a.meta.smallest.cmp(&b.meta.smallest));
            }
        }

        Ok(Self {
            level0,
            levels,
            max_level: self.max_level,
        })
    }

    /// Files in `level` whose user key range intersects [smallest, largest],
    /// under the column family's user comparator.
    pub fn get_overlap_with_compaction(
        &self,
        level: u32,
        smallest: &[u8],
        largest: &[u8],
        ucmp: &dyn KeyComparator,
    ) -> Vec<Arc<TableFile>> {
        let mut tables = vec![];
        for t in self.level_tables(level as usize) {
            if ucmp.compare_key(t.largest_user_key(), smallest).is_ge()
                && ucmp.compare_key(t.smallest_user_key(), largest).is_le()
            {
                tables.push(t.clone());
            }
        }
        tables
    }

    /// Rough byte count of `level` data within [start, end] user keys.
    /// Fully covered files count whole; files straddling a boundary count
    /// half.
    pub fn approximate_size(
        &self,
        level: usize,
        start: &[u8],
        end: &[u8],
        ucmp: &dyn KeyComparator,
    ) -> u64 {
        let mut total = 0;
        for t in self.level_tables(level) {
            if ucmp.compare_key(t.largest_user_key(), start).is_lt()
                || ucmp.compare_key(t.smallest_user_key(), end).is_gt()
            {
                continue;
            }
            if ucmp.compare_key(t.smallest_user_key(), start).is_ge()
                && ucmp.compare_key(t.largest_user_key(), end).is_le()
            {
                total += t.meta.fd.file_size;
            } else {
                total += t.meta.fd.file_size / 2;
            }
        }
        total
    }
}

pub struct Version {
    cf_id: u32,
    log_number: u64,
    cf_name: String,
    comparator: String,
    storage: VersionStorageInfo,
}

impl Version {
    pub fn new(
        cf_id: u32,
        cf_name: String,
        comparator: String,
        tables: Vec<Arc<TableFile>>,
        log_number: u64,
        max_level: u32,
    ) -> Self {
        Version {
            storage: VersionStorageInfo::new(tables, max_level as usize),
            cf_id,
            cf_name,
            log_number,
            comparator,
        }
    }

    pub fn apply(
        &self,
        to_add: Vec<Arc<TableFile>>,
        to_delete: &[(u32, u64)],
        log_number: u64,
    ) -> Result<Self> {
        let storage = self.storage.apply(to_add, to_delete)?;
        Ok(Version {
            storage,
            cf_id: self.cf_id,
            cf_name: self.cf_name.clone(),
            log_number: std::cmp::max(self.log_number, log_number),
            comparator: self.comparator.clone(),
        })
    }

    pub fn get_log_number(&self) -> u64 {
        self.log_number
    }

    pub fn get_cf_id(&self) -> u32 {
        self.cf_id
    }

    pub fn get_cf_name(&self) -> &str {
        &self.cf_name
    }

    pub fn get_comparator_name(&self) -> &str {
        &self.comparator
    }

    pub fn get_level_num(&self) -> usize {
        self.storage.size()
    }

    pub fn scan<F: FnMut(&Arc<TableFile>)>(&self, f: F, level: usize) {
        self.storage.scan(f, level);
    }

    pub fn get_storage_info(&self) -> &VersionStorageInfo {
        &self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::format::pack_sequence_and_type;
    use crate::common::format::ValueType;
    use crate::common::InMemFileSystem;
    use crate::iterator::AsyncIterator;
    use crate::table::TableReader;
    use crate::version::FileMetaData;
    use std::path::PathBuf;

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

    #[test]
    fn test_apply_keeps_levels_sorted() {
        let info = VersionStorageInfo::new(vec![], 7);
        let info = info
            .apply(
                vec![
                    make_table(3, 1, b"m", b"p", 100),
                    make_table(1, 1, b"a", b"c", 100),
                    make_table(2, 1, b"e", b"k", 100),
                    make_table(4, 0, b"a", b"z", 50),
                ],
                &[],
            )
            .unwrap();
        let ids: Vec<u64> = info.level_tables(1).iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(info.get_level0_file_num(), 1);
        assert_eq!(info.level_total_file_size(1), 300);

        let info = info
            .apply(vec![make_table(5, 1, b"q", b"s", 70)], &[(1, 2)])
            .unwrap();
        let ids: Vec<u64> = info.level_tables(1).iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![1, 3, 5]);
        assert_eq!(info.level_total_file_size(1), 270);
    }

    #[test]
    fn test_apply_missing_input_is_corruption() {
        let info = VersionStorageInfo::new(vec![make_table(1, 1, b"a", b"c", 100)], 7);
        let e = info.apply(vec![], &[(1, 99)]).err().unwrap();
        assert!(e.is_corruption());
        // Deleting twice must fail the second time.
        let next = info.apply(vec![], &[(1, 1)]).unwrap();
        let e = next.apply(vec![], &[(1, 1)]).err().unwrap();
        assert!(e.is_corruption());
    }

    #[test]
    fn test_overlap_and_approximate_size() {
        let ucmp = crate::common::DefaultUserComparator::default();
        let info = VersionStorageInfo::new(
            vec![
                make_table(1, 1, b"a", b"c", 100),
                make_table(2, 1, b"e", b"k", 100),
                make_table(3, 1, b"m", b"p", 100),
            ],
            7,
        );
        let overlap = info.get_overlap_with_compaction(1, b"b", b"f", &ucmp);
        let ids: Vec<u64> = overlap.iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(info
            .get_overlap_with_compaction(1, b"x", b"z", &ucmp)
            .is_empty());

        // File 2 is fully inside, files 1 and 3 straddle the bounds.
        assert_eq!(info.approximate_size(1, b"b", b"n", &ucmp), 100 + 50 + 50);
    }
}
