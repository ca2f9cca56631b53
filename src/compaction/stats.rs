use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every subcompaction of one job. Iterators batch
/// their local tallies and flush them here periodically, so reading the
/// totals mid-job gives a close but not exact picture.
#[derive(Default)]
pub struct CompactionStatistics {
    pub num_input_records: AtomicU64,
    pub num_input_deletion_records: AtomicU64,
    pub num_input_corrupt_records: AtomicU64,
    pub num_record_drop_user: AtomicU64,
    pub num_record_drop_hidden: AtomicU64,
    pub num_record_drop_obsolete: AtomicU64,
    pub total_input_raw_key_bytes: AtomicU64,
    pub total_input_raw_value_bytes: AtomicU64,
    pub bytes_written: AtomicU64,
}

impl CompactionStatistics {
    pub fn add(&self, other: &CompactionIterStats) {
        self.num_input_records
            .fetch_add(other.num_input_records, Ordering::Relaxed);
        self.num_input_deletion_records
            .fetch_add(other.num_input_deletion_records, Ordering::Relaxed);
        self.num_input_corrupt_records
            .fetch_add(other.num_input_corrupt_records, Ordering::Relaxed);
        self.num_record_drop_user
            .fetch_add(other.num_record_drop_user, Ordering::Relaxed);
        self.num_record_drop_hidden
            .fetch_add(other.num_record_drop_hidden, Ordering::Relaxed);
        self.num_record_drop_obsolete
            .fetch_add(other.num_record_drop_obsolete, Ordering::Relaxed);
        self.total_input_raw_key_bytes
            .fetch_add(other.total_input_raw_key_bytes, Ordering::Relaxed);
        self.total_input_raw_value_bytes
            .fetch_add(other.total_input_raw_value_bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_written(&self, n: u64) {
        self.bytes_written.fetch_add(n, Ordering::Relaxed);
    }
}

/// Per-iterator tallies, accumulated without atomics and drained into
/// [`CompactionStatistics`] every so many records.
#[derive(Default, Clone, Debug)]
pub struct CompactionIterStats {
    pub num_input_records: u64,
    pub num_input_deletion_records: u64,
    pub num_input_corrupt_records: u64,
    pub num_record_drop_user: u64,
    pub num_record_drop_hidden: u64,
    pub num_record_drop_obsolete: u64,
    pub total_input_raw_key_bytes: u64,
    pub total_input_raw_value_bytes: u64,
}

impl CompactionIterStats {
    pub fn take(&mut self) -> CompactionIterStats {
        std::mem::take(self)
    }
}
