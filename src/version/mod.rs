mod edit;
mod manifest;
mod snapshot;
mod table_file;
mod version;
mod version_set;

pub use edit::VersionEdit;
pub use manifest::{start_manifest_job, Manifest, ManifestScheduler};
pub use snapshot::{Snapshot, SnapshotList};
pub use table_file::{FileDescriptor, FileMetaData, TableFile};
pub use version::{Version, VersionStorageInfo};
pub use version_set::{ColumnFamilyData, KernelNumberContext, VersionSet};
