mod compaction_filter;
mod error;
mod file;
pub mod file_system;
pub mod format;
mod merge_operator;

pub use compaction_filter::{CompactionFilter, CompactionFilterDecision};
pub use error::{Error, Result};
pub use file::{
    make_current_file, make_descriptor_file_name, make_log_file, make_table_file_name,
    parse_file_name, DBFile,
};
pub use file_system::{
    FileSystem, InMemFileSystem, RandomAccessFile, RandomAccessFileReader, SequentialFile,
    SequentialFileReader, SyncPosixFileSystem, WritableFile, WritableFileWriter,
};
pub use format::{
    make_internal_seek_key, pack_sequence_and_type, MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK,
};
pub use merge_operator::MergeOperator;

pub use crate::util::extract_user_key;
use std::cmp::Ordering;
use std::sync::Arc;

pub trait KeyComparator: Send + Sync {
    fn name(&self) -> &'static str;
    fn compare_key(&self, lhs: &[u8], rhs: &[u8]) -> Ordering;
    fn same_key(&self, lhs: &[u8], rhs: &[u8]) -> bool {
        self.compare_key(lhs, rhs) == Ordering::Equal
    }
    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]);
    fn find_short_successor(&self, key: &mut Vec<u8>) {
        // Find first character that can be incremented
        let n = key.len();
        for i in 0..n {
            let byte = key[i];
            if byte != 0xff {
                key[i] = byte + 1;
                key.resize(i + 1, 0);
                return;
            }
        }
        // *key is a run of 0xffs.  Leave it alone.
    }
}

#[derive(Default, Debug, Clone, Copy)]
pub struct DefaultUserComparator {}

impl KeyComparator for DefaultUserComparator {
    fn name(&self) -> &'static str {
        "leveldb.BytewiseComparator"
    }

    fn compare_key(&self, lhs: &[u8], rhs: &[u8]) -> Ordering {
        lhs.cmp(rhs)
    }

    fn same_key(&self, lhs: &[u8], rhs: &[u8]) -> bool {
        lhs.eq(rhs)
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let l = std::cmp::min(start.len(), limit.len());
        let mut diff_index = 0;
        while diff_index < l && start[diff_index] == limit[diff_index] {
            diff_index += 1;
        }
        if diff_index < l {
            let start_byte = start[diff_index];
            let limit_byte = limit[diff_index];
            if start_byte >= limit_byte {
                return;
            }
            if diff_index + 1 < limit.len() || start_byte + 1 < limit_byte {
                start[diff_index] += 1;
                start.resize(diff_index + 1, 0);
            } else {
                diff_index += 1;
                while diff_index < start.len() {
                    if start[diff_index] < 0xffu8 {
                        start[diff_index] += 1;
                        start.resize(diff_index + 1, 0);
                        break;
                    }
                    diff_index += 1;
                }
            }
        }
    }
}

/// Orders internal keys: user key ascending through the wrapped comparator,
/// then the 8 byte footer descending so newer sequences come first.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user_comparator: Arc<dyn KeyComparator>,
}

impl Default for InternalKeyComparator {
    fn default() -> Self {
        InternalKeyComparator::new(Arc::new(DefaultUserComparator::default()))
    }
}

impl InternalKeyComparator {
    pub fn new(user_comparator: Arc<dyn KeyComparator>) -> Self {
        Self { user_comparator }
    }

    pub fn get_user_comparator(&self) -> &Arc<dyn KeyComparator> {
        &self.user_comparator
    }
}

impl KeyComparator for InternalKeyComparator {
    fn name(&self) -> &'static str {
        "rocksdb.InternalKeyComparator"
    }

    #[inline]
    fn compare_key(&self, lhs: &[u8], rhs: &[u8]) -> Ordering {
        debug_assert!(lhs.len() >= 8 && rhs.len() >= 8);
        let (l_p, l_s) = lhs.split_at(lhs.len() - 8);
        let (r_p, r_s) = rhs.split_at(rhs.len() - 8);
        match self.user_comparator.compare_key(l_p, r_p) {
            Ordering::Equal => {
                let l_num = crate::util::decode_fixed_uint64(l_s);
                let r_num = crate::util::decode_fixed_uint64(r_s);
                r_num.cmp(&l_num)
            }
            res => res,
        }
    }

    #[inline]
    fn same_key(&self, lhs: &[u8], rhs: &[u8]) -> bool {
        let (l_p, _) = lhs.split_at(lhs.len() - 8);
        let (r_p, _) = rhs.split_at(rhs.len() - 8);
        self.user_comparator.same_key(l_p, r_p)
    }

    fn find_shortest_separator(&self, start: &mut Vec<u8>, limit: &[u8]) {
        let user_start = extract_user_key(start);
        let user_limit = extract_user_key(limit);
        let mut tmp = user_start.to_vec();
        self.user_comparator
            .find_shortest_separator(&mut tmp, user_limit);
        if tmp.len() <= user_start.len()
            && self.user_comparator.compare_key(user_start, &tmp) == Ordering::Less
        {
            tmp.extend_from_slice(
                &format::pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK)
                    .to_le_bytes(),
            );
            std::mem::swap(start, &mut tmp);
        }
    }

    fn find_short_successor(&self, key: &mut Vec<u8>) {
        let user_key = extract_user_key(key);
        let mut tmp = user_key.to_vec();
        self.user_comparator.find_short_successor(&mut tmp);
        if tmp.len() <= user_key.len()
            && self.user_comparator.compare_key(user_key, &tmp) == Ordering::Less
        {
            tmp.extend_from_slice(
                &format::pack_sequence_and_type(MAX_SEQUENCE_NUMBER, VALUE_TYPE_FOR_SEEK)
                    .to_le_bytes(),
            );
            std::mem::swap(key, &mut tmp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::format::ValueType;

    fn ikey(user: &[u8], seq: u64, tp: ValueType) -> Vec<u8> {
        let mut k = user.to_vec();
        k.extend_from_slice(&pack_sequence_and_type(seq, tp).to_le_bytes());
        k
    }

    #[test]
    fn test_internal_key_ordering() {
        let c = InternalKeyComparator::default();
        let a_new = ikey(b"a", 9, ValueType::TypeValue);
        let a_old = ikey(b"a", 3, ValueType::TypeValue);
        let b_old = ikey(b"b", 1, ValueType::TypeDeletion);
        assert_eq!(c.compare_key(&a_new, &a_old), Ordering::Less);
        assert_eq!(c.compare_key(&a_old, &b_old), Ordering::Less);
        assert!(c.same_key(&a_new, &a_old));
        assert!(!c.same_key(&a_old, &b_old));
    }
}
