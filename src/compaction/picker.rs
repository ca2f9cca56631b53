use super::compaction::{Compaction, CompactionInput};
use crate::common::KeyComparator;
use crate::options::{ColumnFamilyOptions, ImmutableDBOptions};
use crate::version::{TableFile, Version};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Chooses what to compact. Level zero is scored by file count against the
/// flush trigger, deeper levels by their size against a per-level budget
/// that grows by a fixed multiplier.
pub struct LevelCompactionPicker {
    cf_opts: HashMap<u32, Arc<ColumnFamilyOptions>>,
    db_opts: Arc<ImmutableDBOptions>,
}

impl LevelCompactionPicker {
    pub fn new(
        cf_opts: HashMap<u32, Arc<ColumnFamilyOptions>>,
        db_opts: Arc<ImmutableDBOptions>,
    ) -> Self {
        Self { cf_opts, db_opts }
    }

    pub fn pick_compaction(
        &self,
        cf_id: u32,
        version: Arc<Version>,
        cf_dropped: Arc<AtomicBool>,
    ) -> Option<Compaction> {
        let opts = self.cf_opts.get(&cf_id)?.clone();
        let mut scores = self.calculate_compaction_score(version.as_ref(), opts.as_ref());
        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let (level, score) = scores.first()?.clone();
        if score < 1.0 {
            return None;
        }
        let output_level = level + 1;
        let inputs = self.pick_input_files(version.as_ref(), opts.as_ref(), level, output_level)?;

        let info = version.get_storage_info();
        let bottommost_level = ((output_level as usize + 1)..info.max_level())
            .all(|l| info.level_tables(l).is_empty());
        let ucmp = opts.comparator.get_user_comparator().clone();
        let (smallest, largest) = input_user_key_range(&inputs, ucmp.as_ref());
        let grandparents = if (output_level as usize + 1) < info.max_level() {
            info.get_overlap_with_compaction(output_level + 1, &smallest, &largest, ucmp.as_ref())
        } else {
            vec![]
        };
        Some(Compaction {
            cf_id,
            inputs,
            output_level,
            bottommost_level,
            max_output_file_size: opts.target_file_size_base as u64,
            max_grandparent_overlap_bytes: 10 * opts.target_file_size_base as u64,
            grandparents,
            input_version: version,
            cf_options: opts,
            cf_dropped,
        })
    }

    fn calculate_compaction_score(
        &self,
        version: &Version,
        opts: &ColumnFamilyOptions,
    ) -> Vec<(u32, f64)> {
        let info = version.get_storage_info();
        let mut scores = vec![];
        let level0_pending = info.level_tables(0).iter().any(|t| t.is_pending_compaction());
        if !level0_pending {
            scores.push((
                0,
                info.get_level0_file_num() as f64 / opts.level0_file_num_compaction_trigger as f64,
            ));
        }
        let mut level_budget = opts.max_bytes_for_level_base as f64;
        // The last level has nowhere to push data.
        for level in 1..(info.max_level() - 1) {
            scores.push((
                level as u32,
                info.level_total_file_size(level) as f64 / level_budget,
            ));
            level_budget *= opts.max_bytes_for_level_multiplier;
        }
        scores
    }

    /// Claims the chosen files for this compaction. Any file already owned
    /// by another job aborts the pick; claimed files are released through
    /// the returned [`Compaction`] when it is dropped.
    fn pick_input_files(
        &self,
        version: &Version,
        opts: &ColumnFamilyOptions,
        level: u32,
        output_level: u32,
    ) -> Option<Vec<CompactionInput>> {
        let info = version.get_storage_info();
        let user_comparator = opts.comparator.get_user_comparator();
        let mut start_tables = vec![];
        if level == 0 {
            for t in info.level_tables(0) {
                start_tables.push(t.clone());
            }
        } else {
            // The file with the least output-level overlap is the cheapest
            // to move down.
            let mut candidates: Vec<(Arc<TableFile>, u64)> = vec![];
            for t in info.level_tables(level as usize) {
                if t.is_pending_compaction() {
                    continue;
                }
                let overlap = info.get_overlap_with_compaction(
                    output_level,
                    t.smallest_user_key(),
                    t.largest_user_key(),
                    user_comparator.as_ref(),
                );
                if overlap.iter().any(|o| o.is_pending_compaction()) {
                    continue;
                }
                let overlap_size: u64 = overlap.iter().map(|o| o.meta.fd.file_size).sum();
                candidates.push((t.clone(), overlap_size));
            }
            candidates.sort_by_key(|(_, size)| *size);
            start_tables.push(candidates.first()?.0.clone());
        }
        if start_tables.is_empty() {
            return None;
        }

        let mut smallest = vec![];
        let mut largest = vec![];
        for t in &start_tables {
            if smallest.is_empty()
                || user_comparator
                    .compare_key(t.smallest_user_key(), &smallest)
                    .is_lt()
            {
                smallest = t.smallest_user_key().to_vec();
            }
            if largest.is_empty()
                || user_comparator
                    .compare_key(&largest, t.largest_user_key())
                    .is_lt()
            {
                largest = t.largest_user_key().to_vec();
            }
        }
        let output_tables = info.get_overlap_with_compaction(
            output_level,
            &smallest,
            &largest,
            user_comparator.as_ref(),
        );
        if output_tables.iter().any(|t| t.is_pending_compaction()) {
            return None;
        }

        let mut claimed = vec![];
        for t in start_tables.iter().chain(output_tables.iter()) {
            if t.mark_compaction() {
                claimed.push(t.clone());
            } else {
                for c in claimed {
                    c.unmark_compaction();
                }
                return None;
            }
        }

        let mut inputs = vec![CompactionInput {
            level,
            tables: start_tables,
        }];
        if !output_tables.is_empty() {
            inputs.push(CompactionInput {
                level: output_level,
                tables: output_tables,
            });
        }
        Some(inputs)
    }
}

fn input_user_key_range(inputs: &[CompactionInput], ucmp: &dyn KeyComparator) -> (Vec<u8>, Vec<u8>) {
    let mut smallest: Vec<u8> = vec![];
    let mut largest: Vec<u8> = vec![];
    for input in inputs {
        for t in &input.tables {
            if smallest.is_empty()
                || ucmp.compare_key(t.smallest_user_key(), &smallest).is_lt()
            {
                smallest = t.smallest_user_key().to_vec();
            }
            if largest.is_empty() || ucmp.compare_key(&largest, t.largest_user_key()).is_lt() {
                largest = t.largest_user_key().to_vec();
            }
        }
    }
    (smallest, largest)
}
