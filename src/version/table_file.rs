use crate::common::FileSystem;
use crate::table::TableReader;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FileDescriptor {
    pub file_size: u64,
    pub file_number: u64,
    pub smallest_seqno: u64,
    pub largest_seqno: u64,
}

impl FileDescriptor {
    pub fn new(file_number: u64, file_size: u64) -> Self {
        Self {
            file_size,
            file_number,
            smallest_seqno: u64::MAX,
            largest_seqno: 0,
        }
    }

    pub fn get_number(&self) -> u64 {
        self.file_number
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FileMetaData {
    pub fd: FileDescriptor,
    pub level: u32,
    // Internal key boundaries of the file.
    pub smallest: Bytes,
    pub largest: Bytes,
    pub num_entries: u64,
    pub num_deletions: u64,
    pub marked_for_compaction: bool,
}

impl FileMetaData {
    pub fn new(file_number: u64, level: u32, smallest: Vec<u8>, largest: Vec<u8>) -> Self {
        Self {
            fd: FileDescriptor::new(file_number, 0),
            level,
            smallest: Bytes::from(smallest),
            largest: Bytes::from(largest),
            num_entries: 0,
            num_deletions: 0,
            marked_for_compaction: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.fd.get_number()
    }

    /// Widens the key range to cover one more entry written to the file.
    pub fn update_boundary(&mut self, key: &[u8], seqno: u64) {
        if self.smallest.is_empty() {
            self.smallest = Bytes::copy_from_slice(key);
        }
        self.largest = Bytes::copy_from_slice(key);
        self.fd.smallest_seqno = std::cmp::min(self.fd.smallest_seqno, seqno);
        self.fd.largest_seqno = std::cmp::max(self.fd.largest_seqno, seqno);
    }

    pub fn smallest_user_key(&self) -> &[u8] {
        let l = self.smallest.len();
        &self.smallest[..l.saturating_sub(8)]
    }

    pub fn largest_user_key(&self) -> &[u8] {
        let l = self.largest.len();
        &self.largest[..l.saturating_sub(8)]
    }
}

/// An open table file in some version. The struct owns the on-disk file:
/// when the last version referencing it is gone and it was marked removed,
/// dropping the handle deletes the file.
pub struct TableFile {
    pub meta: FileMetaData,
    pub reader: Arc<dyn TableReader>,
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    deleted: AtomicBool,
    being_compact: AtomicBool,
}

impl TableFile {
    pub fn new(
        meta: FileMetaData,
        reader: Arc<dyn TableReader>,
        fs: Arc<dyn FileSystem>,
        path: PathBuf,
    ) -> Self {
        Self {
            meta,
            reader,
            path,
            fs,
            deleted: AtomicBool::new(false),
            being_compact: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.meta.id()
    }

    pub fn smallest_user_key(&self) -> &[u8] {
        self.meta.smallest_user_key()
    }

    pub fn largest_user_key(&self) -> &[u8] {
        self.meta.largest_user_key()
    }

    pub fn mark_removed(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    /// Claims the file for a compaction. Returns false if another job got
    /// there first.
    pub fn mark_compaction(&self) -> bool {
        !self.being_compact.swap(true, Ordering::SeqCst)
    }

    pub fn unmark_compaction(&self) {
        self.being_compact.store(false, Ordering::Release);
    }

    pub fn is_pending_compaction(&self) -> bool {
        self.being_compact.load(Ordering::Acquire)
    }
}

impl Drop for TableFile {
    fn drop(&mut self) {
        if self.deleted.load(Ordering::Acquire) {
            let _ = self.fs.remove(self.path.clone());
        }
    }
}
