use crate::common::{InternalKeyComparator, KeyComparator};
use crate::options::ColumnFamilyOptions;
use crate::version::{TableFile, Version};
use std::cmp::Ordering;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub struct CompactionInput {
    pub level: u32,
    pub tables: Vec<Arc<TableFile>>,
}

/// Tracks how much output-level-plus-one data the current output file
/// overlaps, so files are cut before a future compaction of them gets too
/// expensive.
#[derive(Default)]
pub struct GrandparentState {
    index: usize,
    overlapped_bytes: u64,
    seen_key: bool,
}

/// An immutable plan for one compaction: the input files per level, the
/// output level and the limits that control output file cutting.
pub struct Compaction {
    pub cf_id: u32,
    pub cf_options: Arc<ColumnFamilyOptions>,
    pub inputs: Vec<CompactionInput>,
    pub output_level: u32,
    pub bottommost_level: bool,
    pub max_output_file_size: u64,
    pub max_grandparent_overlap_bytes: u64,
    pub grandparents: Vec<Arc<TableFile>>,
    pub input_version: Arc<Version>,
    pub cf_dropped: Arc<AtomicBool>,
}

impl Compaction {
    pub fn comparator(&self) -> &InternalKeyComparator {
        &self.cf_options.comparator
    }

    pub fn num_input_tables(&self) -> usize {
        self.inputs.iter().map(|i| i.tables.len()).sum()
    }

    /// True when `user_key` cannot appear in any level beyond the output
    /// level. `level_ptrs` carries one cursor per level; keys arrive in
    /// ascending order so each cursor only ever moves forward.
    pub fn key_not_exists_beyond_output_level(
        &self,
        user_key: &[u8],
        level_ptrs: &mut [usize],
    ) -> bool {
        let user_comparator = self.cf_options.comparator.get_user_comparator();
        let storage = self.input_version.get_storage_info();
        for level in (self.output_level as usize + 1)..storage.max_level() {
            let tables = storage.level_tables(level);
            let ptr = &mut level_ptrs[level];
            while *ptr < tables.len() {
                let table = &tables[*ptr];
                match user_comparator.compare_key(user_key, table.largest_user_key()) {
                    Ordering::Greater => {
                        *ptr += 1;
                    }
                    _ => {
                        if user_comparator
                            .compare_key(user_key, table.smallest_user_key())
                            .is_ge()
                        {
                            return false;
                        }
                        break;
                    }
                }
            }
        }
        true
    }

    /// Decides whether the current output file should be finished before
    /// writing `internal_key`, based on overlap with the grandparent level.
    pub fn should_stop_before(&self, internal_key: &[u8], state: &mut GrandparentState) -> bool {
        let icmp = &self.cf_options.comparator;
        while state.index < self.grandparents.len()
            && icmp
                .compare_key(internal_key, &self.grandparents[state.index].meta.largest)
                .is_gt()
        {
            if state.seen_key {
                state.overlapped_bytes += self.grandparents[state.index].meta.fd.file_size;
            }
            state.index += 1;
        }
        state.seen_key = true;
        if state.overlapped_bytes > self.max_grandparent_overlap_bytes {
            state.overlapped_bytes = 0;
            return true;
        }
        false
    }

    /// A single input file with no output-level overlap can be moved to
    /// the output level by a metadata-only edit.
    pub fn is_trivial_move(&self) -> bool {
        if self.inputs.len() != 1 || self.inputs[0].tables.len() != 1 {
            return false;
        }
        if self.cf_options.merge_operator.is_some() || self.cf_options.compaction_filter.is_some()
        {
            return false;
        }
        let total_grandparent_bytes: u64 = self
            .grandparents
            .iter()
            .map(|t| t.meta.fd.file_size)
            .sum();
        total_grandparent_bytes <= self.max_grandparent_overlap_bytes
    }
}

impl Drop for Compaction {
    fn drop(&mut self) {
        for input in &self.inputs {
            for table in &input.tables {
                table.unmark_compaction();
            }
        }
    }
}
