pub mod common;
pub mod compaction;
pub mod iterator;
pub mod log;
pub mod memtable;
pub mod options;
pub mod table;
pub mod util;
pub mod version;

pub use common::{
    CompactionFilter, CompactionFilterDecision, Error, FileSystem, InMemFileSystem,
    InternalKeyComparator, KeyComparator, MergeOperator, Result, SyncPosixFileSystem,
};
pub use compaction::{
    run_compaction_job, run_flush_memtable_job, CompactionEngine, FlushRequest,
    LevelCompactionPicker,
};
pub use options::{ColumnFamilyDescriptor, ColumnFamilyOptions, ImmutableDBOptions};
pub use table::{SortedRunTableFactory, TableBuilder, TableFactory, TableReader};
pub use version::{
    start_manifest_job, KernelNumberContext, Manifest, ManifestScheduler, Snapshot, SnapshotList,
    Version, VersionEdit, VersionSet,
};
