use super::compaction::Compaction;
use super::merge_helper::MergeHelper;
use super::stats::{CompactionIterStats, CompactionStatistics};
use super::InnerIterator;
use crate::common::format::{
    extract_sequence, pack_sequence_and_type, ParsedInternalKey, ValueType,
};
use crate::common::{
    CompactionFilter, CompactionFilterDecision, Error, KeyComparator, Result,
    MAX_SEQUENCE_NUMBER,
};
use crate::iterator::{AsyncIterator, InternalIterator};
use std::collections::VecDeque;
use std::sync::Arc;

const RECORD_STATS_EVERY: u64 = 1000;

/// Reduces a merged stream of internal keys to the records worth keeping:
/// entries shadowed within one snapshot stripe are dropped, obsolete
/// deletions are elided, merge operands are collapsed and the compaction
/// filter gets a say on the newest visible value of each key.
pub struct CompactionIter {
    inner: InnerIterator,
    user_comparator: Arc<dyn KeyComparator>,
    // Ascending; the stripe boundaries for visibility decisions.
    snapshots: Vec<u64>,
    earliest_snapshot: u64,
    key: Vec<u8>,
    value: Vec<u8>,
    // The inner iterator already sits on the next unprocessed record.
    at_next: bool,
    valid: bool,
    has_current_user_key: bool,
    current_user_key: Vec<u8>,
    current_user_key_snapshot: u64,
    current_sequence: u64,
    bottommost_level: bool,
    merge: Option<MergeHelper>,
    merge_out: VecDeque<(Vec<u8>, Vec<u8>)>,
    filter: Option<Arc<dyn CompactionFilter>>,
    filter_level: u32,
    compaction: Option<Arc<Compaction>>,
    level_ptrs: Vec<usize>,
    status: Option<Error>,
    stats: CompactionIterStats,
    stats_sink: Arc<CompactionStatistics>,
    records_since_stats: u64,
}

impl CompactionIter {
    pub fn new(
        iter: Box<dyn InternalIterator>,
        user_comparator: Arc<dyn KeyComparator>,
        snapshots: Vec<u64>,
        merge: Option<MergeHelper>,
        filter: Option<Arc<dyn CompactionFilter>>,
        bottommost_level: bool,
        stats_sink: Arc<CompactionStatistics>,
    ) -> Self {
        Self::build(
            InnerIterator::Sync(iter),
            user_comparator,
            snapshots,
            merge,
            filter,
            None,
            bottommost_level,
            stats_sink,
        )
    }

    pub fn new_with_async(
        iter: Box<dyn AsyncIterator>,
        user_comparator: Arc<dyn KeyComparator>,
        snapshots: Vec<u64>,
        merge: Option<MergeHelper>,
        filter: Option<Arc<dyn CompactionFilter>>,
        compaction: Option<Arc<Compaction>>,
        bottommost_level: bool,
        stats_sink: Arc<CompactionStatistics>,
    ) -> Self {
        Self::build(
            InnerIterator::Async(iter),
            user_comparator,
            snapshots,
            merge,
            filter,
            compaction,
            bottommost_level,
            stats_sink,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        inner: InnerIterator,
        user_comparator: Arc<dyn KeyComparator>,
        mut snapshots: Vec<u64>,
        merge: Option<MergeHelper>,
        filter: Option<Arc<dyn CompactionFilter>>,
        compaction: Option<Arc<Compaction>>,
        bottommost_level: bool,
        stats_sink: Arc<CompactionStatistics>,
    ) -> Self {
        snapshots.sort_unstable();
        snapshots.dedup();
        let earliest_snapshot = snapshots.first().cloned().unwrap_or(MAX_SEQUENCE_NUMBER);
        let (filter_level, level_ptrs) = match &compaction {
            Some(c) => (
                c.output_level,
                vec![0; c.input_version.get_storage_info().max_level()],
            ),
            None => (0, vec![]),
        };
        Self {
            inner,
            user_comparator,
            snapshots,
            earliest_snapshot,
            key: vec![],
            value: vec![],
            at_next: false,
            valid: false,
            has_current_user_key: false,
            current_user_key: vec![],
            current_user_key_snapshot: 0,
            current_sequence: 0,
            bottommost_level,
            merge,
            merge_out: VecDeque::new(),
            filter,
            filter_level,
            compaction,
            level_ptrs,
            status: None,
            stats: CompactionIterStats::default(),
            stats_sink,
            records_since_stats: 0,
        }
    }

    pub async fn seek_to_first(&mut self) {
        self.inner.seek_to_first().await;
        self.next_from_input().await;
    }

    pub async fn seek(&mut self, key: &[u8]) {
        self.inner.seek(key).await;
        self.next_from_input().await;
    }

    pub async fn next(&mut self) {
        if let Some((key, value)) = self.merge_out.pop_front() {
            self.current_sequence = extract_sequence(&key);
            self.key = key;
            self.value = value;
            self.valid = true;
            return;
        }
        if !self.at_next {
            self.inner.next().await;
        }
        self.next_from_input().await;
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn current_sequence(&self) -> u64 {
        self.current_sequence
    }

    pub fn status(&self) -> Result<()> {
        match &self.status {
            Some(e) => Err(e.clone()),
            None => self.inner.status(),
        }
    }

    async fn next_from_input(&mut self) {
        self.at_next = false;
        self.valid = false;
        while !self.valid && self.status.is_none() && self.inner.valid() {
            self.key.clear();
            self.key.extend_from_slice(self.inner.key());
            self.value.clear();
            self.value.extend_from_slice(self.inner.value());
            self.stats.num_input_records += 1;
            self.stats.total_input_raw_key_bytes += self.key.len() as u64;
            self.stats.total_input_raw_value_bytes += self.value.len() as u64;
            self.maybe_report_stats();

            let (sequence, mut tp) = match ParsedInternalKey::parse(&self.key) {
                Ok(ikey) => (ikey.sequence, ikey.tp),
                Err(e) => {
                    self.stats.num_input_corrupt_records += 1;
                    self.status = Some(e);
                    return;
                }
            };
            let user_key_len = self.key.len() - 8;
            self.current_sequence = sequence;
            if tp == ValueType::TypeDeletion {
                self.stats.num_input_deletion_records += 1;
            }

            let first_occurrence = !self.has_current_user_key
                || !self
                    .user_comparator
                    .same_key(&self.key[..user_key_len], &self.current_user_key);
            if first_occurrence {
                self.current_user_key.clear();
                self.current_user_key
                    .extend_from_slice(&self.key[..user_key_len]);
                self.has_current_user_key = true;
                self.current_user_key_snapshot = 0;
                if tp == ValueType::TypeValue {
                    tp = self.invoke_filter(sequence, user_key_len);
                }
            }

            let last_snapshot = self.current_user_key_snapshot;
            let (prev_snapshot, current_snapshot) =
                self.find_earliest_visible_snapshot(sequence);
            self.current_user_key_snapshot = current_snapshot;
            debug_assert!(self.current_user_key_snapshot > 0);

            if !first_occurrence && last_snapshot == current_snapshot {
                // A newer entry for the same user key lives in the same
                // snapshot stripe, so nothing can observe this one.
                self.stats.num_record_drop_hidden += 1;
                self.inner.next().await;
            } else if tp == ValueType::TypeDeletion
                && sequence <= self.earliest_snapshot
                && self.key_absent_beyond_output_level(user_key_len)
            {
                // No snapshot needs the tombstone and no deeper level can
                // hold a key it would shadow.
                self.stats.num_record_drop_obsolete += 1;
                self.inner.next().await;
            } else if tp == ValueType::TypeMerge {
                let merge = match self.merge.as_mut() {
                    Some(merge) => merge,
                    None => {
                        self.status = Some(Error::Config(
                            "merge record without a merge operator".to_string(),
                        ));
                        return;
                    }
                };
                match merge
                    .merge_until(&mut self.inner, prev_snapshot, self.bottommost_level)
                    .await
                {
                    Ok(_) => {
                        self.merge_out = merge.take_output();
                        if let Some((key, value)) = self.merge_out.pop_front() {
                            self.current_sequence = extract_sequence(&key);
                            self.key = key;
                            self.value = value;
                            self.valid = true;
                            self.at_next = true;
                        }
                    }
                    Err(e) => {
                        self.status = Some(e);
                        return;
                    }
                }
            } else {
                self.prepare_output(sequence, tp, user_key_len);
                self.valid = true;
            }
        }
        if !self.valid && self.status.is_none() {
            if let Err(e) = self.inner.status() {
                self.status = Some(e);
            }
        }
    }

    /// Runs the compaction filter on the newest visible value of a key.
    /// Entries above the latest snapshot are the only ones a filter may
    /// touch without changing what a snapshot reader sees.
    fn invoke_filter(&mut self, sequence: u64, user_key_len: usize) -> ValueType {
        let filter = match &self.filter {
            Some(filter) => filter,
            None => return ValueType::TypeValue,
        };
        if let Some(latest) = self.snapshots.last() {
            if sequence <= *latest {
                return ValueType::TypeValue;
            }
        }
        match filter.filter(self.filter_level, &self.key[..user_key_len], &self.value) {
            CompactionFilterDecision::Keep => ValueType::TypeValue,
            CompactionFilterDecision::Remove => {
                self.stats.num_record_drop_user += 1;
                self.value.clear();
                self.key.truncate(user_key_len);
                self.key.extend_from_slice(
                    &pack_sequence_and_type(sequence, ValueType::TypeDeletion).to_le_bytes(),
                );
                ValueType::TypeDeletion
            }
            CompactionFilterDecision::ChangeValue(value) => {
                self.value = value;
                ValueType::TypeValue
            }
        }
    }

    fn key_absent_beyond_output_level(&mut self, user_key_len: usize) -> bool {
        if self.bottommost_level {
            return true;
        }
        match &self.compaction {
            Some(c) => c
                .key_not_exists_beyond_output_level(&self.key[..user_key_len], &mut self.level_ptrs),
            None => false,
        }
    }

    /// At the bottommost level a sequence below every snapshot carries no
    /// information, so it is rewritten to zero and the key compresses
    /// better against its neighbors.
    fn prepare_output(&mut self, sequence: u64, tp: ValueType, user_key_len: usize) {
        if self.bottommost_level
            && tp == ValueType::TypeValue
            && sequence != 0
            && sequence < self.earliest_snapshot
        {
            self.key.truncate(user_key_len);
            self.key
                .extend_from_slice(&pack_sequence_and_type(0, tp).to_le_bytes());
            self.current_sequence = 0;
        }
    }

    /// Returns the snapshot stripe of `current`: the nearest snapshot at or
    /// below it and the earliest snapshot that can see it.
    fn find_earliest_visible_snapshot(&self, current: u64) -> (u64, u64) {
        if self.snapshots.is_empty() {
            return (0, MAX_SEQUENCE_NUMBER);
        }
        let pos = match self.snapshots.binary_search(&current) {
            Ok(pos) => pos,
            Err(pos) => pos,
        };
        let visible = if pos < self.snapshots.len() {
            self.snapshots[pos]
        } else {
            MAX_SEQUENCE_NUMBER
        };
        if pos > 0 {
            (self.snapshots[pos - 1], visible)
        } else {
            (0, visible)
        }
    }

    fn maybe_report_stats(&mut self) {
        self.records_since_stats += 1;
        if self.records_since_stats >= RECORD_STATS_EVERY {
            self.records_since_stats = 0;
            self.stats_sink.add(&self.stats.take());
        }
    }
}

impl Drop for CompactionIter {
    fn drop(&mut self) {
        self.stats_sink.add(&self.stats.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{DefaultUserComparator, InternalKeyComparator, MergeOperator};
    use crate::memtable::Memtable;
    use std::sync::atomic::Ordering;
    use tokio::runtime::Runtime;

    fn collect(
        memtable: &Memtable,
        snapshots: Vec<u64>,
        bottommost_level: bool,
        stats: Arc<CompactionStatistics>,
    ) -> Vec<(Vec<u8>, Vec<u8>)> {
        let comparator = memtable.get_comparator();
        let mut iter = CompactionIter::new(
            Box::new(memtable.new_iterator()),
            comparator.get_user_comparator().clone(),
            snapshots,
            None,
            None,
            bottommost_level,
            stats,
        );
        let r = Runtime::new().unwrap();
        r.block_on(async move {
            let mut data = vec![];
            iter.seek_to_first().await;
            while iter.valid() {
                data.push((iter.key().to_vec(), iter.value().to_vec()));
                iter.next().await;
            }
            iter.status().unwrap();
            data
        })
    }

    fn test_compaction_with_snapshot(
        memtable: &Memtable,
        snapshots: Vec<u64>,
        expected_ret: Vec<(Vec<u8>, Vec<u8>)>,
        bottommost_level: bool,
    ) {
        let stats = Arc::new(CompactionStatistics::default());
        let ret = collect(memtable, snapshots, bottommost_level, stats);
        assert_eq!(ret.len(), expected_ret.len());
        for i in 0..ret.len() {
            assert_eq!(ret[i], expected_ret[i], "record {}", i);
        }
    }

    #[test]
    fn test_compaction_iterator() {
        let comparator = InternalKeyComparator::default();
        let memtable = Memtable::new(10, 10, comparator.clone(), MAX_SEQUENCE_NUMBER);

        // no pending snapshot
        let mut expected_ret1 = vec![];

        // a pending snapshot with 12
        let mut expected_ret2 = vec![];

        // a pending snapshot with 14
        let mut expected_ret3 = vec![];

        // pending snapshots with 10, 14
        let mut expected_ret4 = vec![];

        // a pending snapshot with 14 and bottommost level
        let mut expected_ret5 = vec![];

        for i in 0..1000u64 {
            let key = format!("test_compaction-{}", i);
            let mut k1 = key.into_bytes();
            let l = k1.len();

            let v0 = pack_sequence_and_type(10, ValueType::TypeValue);
            k1.extend_from_slice(&v0.to_le_bytes());
            memtable.insert(&k1, b"v0");
            expected_ret4.push((k1.clone(), b"v0".to_vec()));
            k1.resize(l, 0);

            let v1 = pack_sequence_and_type(12, ValueType::TypeValue);
            k1.extend_from_slice(&v1.to_le_bytes());
            memtable.insert(&k1, b"v1");
            if i % 2 != 0 {
                expected_ret1.push((k1.clone(), b"v1".to_vec()));
                expected_ret3.push((k1.clone(), b"v1".to_vec()));
                expected_ret4.push((k1.clone(), b"v1".to_vec()));
                // Below every snapshot at the bottommost level the sequence
                // is rewritten to zero.
                let mut zeroed = k1.clone();
                zeroed.resize(l, 0);
                zeroed.extend_from_slice(
                    &pack_sequence_and_type(0, ValueType::TypeValue).to_le_bytes(),
                );
                expected_ret5.push((zeroed, b"v1".to_vec()));
            }
            expected_ret2.push((k1.clone(), b"v1".to_vec()));

            k1.resize(l, 0);

            if i % 2 == 0 {
                let v2 = pack_sequence_and_type(14, ValueType::TypeDeletion);
                k1.extend_from_slice(&v2.to_le_bytes());
                memtable.insert(&k1, b"");
                if i % 4 != 0 {
                    expected_ret1.push((k1.clone(), vec![]));
                    expected_ret2.push((k1.clone(), vec![]));
                }
                expected_ret3.push((k1.clone(), vec![]));
                expected_ret4.push((k1.clone(), vec![]));
                k1.resize(l, 0);
            }
            if i % 4 == 0 {
                let v3 = pack_sequence_and_type(16, ValueType::TypeValue);
                k1.extend_from_slice(&v3.to_le_bytes());
                memtable.insert(&k1, b"v3");
                expected_ret1.push((k1.clone(), b"v3".to_vec()));
                expected_ret2.push((k1.clone(), b"v3".to_vec()));
                expected_ret3.push((k1.clone(), b"v3".to_vec()));
                expected_ret4.push((k1.clone(), b"v3".to_vec()));
                expected_ret5.push((k1, b"v3".to_vec()));
            }
        }
        expected_ret1.sort_by(|a, b| comparator.compare_key(&a.0, &b.0));
        expected_ret2.sort_by(|a, b| comparator.compare_key(&a.0, &b.0));
        expected_ret3.sort_by(|a, b| comparator.compare_key(&a.0, &b.0));
        expected_ret4.sort_by(|a, b| comparator.compare_key(&a.0, &b.0));
        expected_ret5.sort_by(|a, b| comparator.compare_key(&a.0, &b.0));
        test_compaction_with_snapshot(&memtable, vec![], expected_ret1, false);
        test_compaction_with_snapshot(&memtable, vec![12], expected_ret2, false);
        test_compaction_with_snapshot(&memtable, vec![14], expected_ret3, false);
        test_compaction_with_snapshot(&memtable, vec![10, 14], expected_ret4, false);
        test_compaction_with_snapshot(&memtable, vec![14], expected_ret5, true);
    }

    #[test]
    fn test_obsolete_deletion_dropped_at_bottom() {
        let comparator = InternalKeyComparator::default();
        let memtable = Memtable::new(1, 1 << 20, comparator, MAX_SEQUENCE_NUMBER);
        memtable.delete(15, b"gone");
        memtable.add(5, ValueType::TypeValue, b"kept", b"v");

        // With a snapshot at 20 every record is below it; the tombstone has
        // nothing left to shadow at the bottommost level.
        let stats = Arc::new(CompactionStatistics::default());
        let ret = collect(&memtable, vec![20], true, stats.clone());
        assert_eq!(ret.len(), 1);
        assert_eq!(crate::util::extract_user_key(&ret[0].0), b"kept");
        assert_eq!(stats.num_record_drop_obsolete.load(Ordering::Relaxed), 1);

        // On an intermediate level the tombstone must survive: a deeper
        // level may still hold an older version of the key.
        let ret = collect(&memtable, vec![20], false, Arc::default());
        assert_eq!(ret.len(), 2);
    }

    struct CounterOperator;

    impl MergeOperator for CounterOperator {
        fn name(&self) -> &'static str {
            "CounterOperator"
        }

        fn full_merge(
            &self,
            _user_key: &[u8],
            existing_value: Option<&[u8]>,
            operands: &[&[u8]],
        ) -> Option<Vec<u8>> {
            let mut total: i64 = existing_value
                .map(|v| String::from_utf8_lossy(v).parse().unwrap_or(0))
                .unwrap_or(0);
            for op in operands {
                total += String::from_utf8_lossy(op).parse::<i64>().ok()?;
            }
            Some(total.to_string().into_bytes())
        }
    }

    #[test]
    fn test_merge_chain_collapses() {
        let comparator = InternalKeyComparator::default();
        let memtable = Memtable::new(1, 1 << 20, comparator.clone(), MAX_SEQUENCE_NUMBER);
        memtable.add(10, ValueType::TypeValue, b"a", b"5");
        memtable.add(20, ValueType::TypeMerge, b"a", b"1");
        memtable.add(30, ValueType::TypeMerge, b"a", b"1");

        let merge = MergeHelper::new(
            Arc::new(DefaultUserComparator::default()),
            Arc::new(CounterOperator),
            2,
        );
        let mut iter = CompactionIter::new(
            Box::new(memtable.new_iterator()),
            comparator.get_user_comparator().clone(),
            vec![],
            Some(merge),
            None,
            false,
            Arc::default(),
        );
        let r = Runtime::new().unwrap();
        let ret = r.block_on(async move {
            let mut data = vec![];
            iter.seek_to_first().await;
            while iter.valid() {
                data.push((iter.key().to_vec(), iter.value().to_vec()));
                iter.next().await;
            }
            iter.status().unwrap();
            data
        });
        assert_eq!(ret.len(), 1);
        let parsed = ParsedInternalKey::parse(&ret[0].0).unwrap();
        assert_eq!(parsed.user_key, b"a");
        assert_eq!(parsed.sequence, 30);
        assert_eq!(parsed.tp, ValueType::TypeValue);
        assert_eq!(ret[0].1, b"7");
    }

    struct DropOddFilter;

    impl CompactionFilter for DropOddFilter {
        fn name(&self) -> &'static str {
            "DropOddFilter"
        }

        fn filter(
            &self,
            _level: u32,
            user_key: &[u8],
            _existing_value: &[u8],
        ) -> CompactionFilterDecision {
            if user_key.last().map_or(false, |b| b % 2 == 1) {
                CompactionFilterDecision::Remove
            } else {
                CompactionFilterDecision::Keep
            }
        }
    }

    #[test]
    fn test_compaction_filter_rewrites_to_deletion() {
        let comparator = InternalKeyComparator::default();
        let memtable = Memtable::new(1, 1 << 20, comparator.clone(), MAX_SEQUENCE_NUMBER);
        memtable.add(10, ValueType::TypeValue, &[b'k', 1], b"v1");
        memtable.add(11, ValueType::TypeValue, &[b'k', 2], b"v2");

        let mut iter = CompactionIter::new(
            Box::new(memtable.new_iterator()),
            comparator.get_user_comparator().clone(),
            vec![],
            None,
            Some(Arc::new(DropOddFilter)),
            false,
            Arc::default(),
        );
        let r = Runtime::new().unwrap();
        let ret = r.block_on(async move {
            let mut data = vec![];
            iter.seek_to_first().await;
            while iter.valid() {
                data.push((iter.key().to_vec(), iter.value().to_vec()));
                iter.next().await;
            }
            data
        });
        assert_eq!(ret.len(), 2);
        let parsed = ParsedInternalKey::parse(&ret[0].0).unwrap();
        assert_eq!(parsed.tp, ValueType::TypeDeletion);
        assert_eq!(parsed.sequence, 10);
        assert!(ret[0].1.is_empty());
        let parsed = ParsedInternalKey::parse(&ret[1].0).unwrap();
        assert_eq!(parsed.tp, ValueType::TypeValue);
        assert_eq!(ret[1].1, b"v2");
    }
}
