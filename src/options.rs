use crate::common::{
    CompactionFilter, FileSystem, InternalKeyComparator, MergeOperator, SyncPosixFileSystem,
};
use crate::table::{SortedRunTableFactory, TableFactory};
use std::sync::Arc;

#[derive(Clone)]
pub struct ColumnFamilyOptions {
    pub write_buffer_size: usize,
    pub max_level: u32,
    pub comparator: InternalKeyComparator,
    pub factory: Arc<dyn TableFactory>,
    pub target_file_size_base: usize,
    pub max_bytes_for_level_base: u64,
    pub max_bytes_for_level_multiplier: f64,
    pub level0_file_num_compaction_trigger: usize,
    pub max_compaction_bytes: u64,
    pub merge_operator: Option<Arc<dyn MergeOperator>>,
    pub compaction_filter: Option<Arc<dyn CompactionFilter>>,
    pub min_merge_operands: usize,
    pub table_cache_capacity: usize,
}

impl Default for ColumnFamilyOptions {
    fn default() -> Self {
        ColumnFamilyOptions {
            write_buffer_size: 4 << 20,
            max_level: 7,
            comparator: InternalKeyComparator::default(),
            factory: Arc::new(SortedRunTableFactory::default()),
            target_file_size_base: 64 << 20,
            max_bytes_for_level_base: 256 << 20,
            max_bytes_for_level_multiplier: 10.0,
            level0_file_num_compaction_trigger: 4,
            max_compaction_bytes: 25 * (64 << 20),
            merge_operator: None,
            compaction_filter: None,
            min_merge_operands: 2,
            table_cache_capacity: 1024,
        }
    }
}

pub struct ImmutableDBOptions {
    pub max_manifest_file_size: usize,
    pub max_subcompactions: usize,
    pub max_background_jobs: usize,
    pub paranoid_checks: bool,
    pub paranoid_file_checks: bool,
    pub db_path: String,
    pub fs: Arc<dyn FileSystem>,
}

impl Default for ImmutableDBOptions {
    fn default() -> Self {
        ImmutableDBOptions {
            max_manifest_file_size: 128 << 20,
            max_subcompactions: 1,
            max_background_jobs: 2,
            paranoid_checks: true,
            paranoid_file_checks: false,
            db_path: "db".to_string(),
            fs: Arc::new(SyncPosixFileSystem {}),
        }
    }
}

#[derive(Clone)]
pub struct ColumnFamilyDescriptor {
    pub name: String,
    pub options: ColumnFamilyOptions,
}

impl Default for ColumnFamilyDescriptor {
    fn default() -> Self {
        ColumnFamilyDescriptor {
            name: "default".to_string(),
            options: ColumnFamilyOptions::default(),
        }
    }
}
