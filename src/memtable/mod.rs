mod list;

pub use list::{MemtableList, MemtableListVersion};

use crate::common::format::{pack_sequence_and_type, ValueType};
use crate::common::{InternalKeyComparator, KeyComparator};
use crate::iterator::InternalIterator;
use crate::util::decode_fixed_uint64;
use crate::version::VersionEdit;
use crossbeam_skiplist::SkipMap;
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// An internal key ordered for the skiplist: user key ascending, then the
/// 8-byte footer descending so newer versions of a key come first.
#[derive(Clone, Eq, PartialEq)]
struct MemKey(Vec<u8>);

impl MemKey {
    fn footer(&self) -> u64 {
        decode_fixed_uint64(&self.0[self.0.len() - 8..])
    }

    fn user_key(&self) -> &[u8] {
        &self.0[..self.0.len() - 8]
    }
}

impl Ord for MemKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.user_key()
            .cmp(other.user_key())
            .then_with(|| other.footer().cmp(&self.footer()))
    }
}

impl PartialOrd for MemKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct FlushState {
    in_progress: bool,
    completed: bool,
    edit: Option<Arc<VersionEdit>>,
}

/// An in-memory write buffer backed by a lock-free skiplist. Writers insert
/// concurrently; once the buffer fills it becomes immutable and waits in a
/// [`MemtableList`] to be flushed.
pub struct Memtable {
    id: u64,
    table: Arc<SkipMap<MemKey, Vec<u8>>>,
    comparator: InternalKeyComparator,
    mem_size: AtomicUsize,
    max_write_buffer_size: usize,
    first_seqno: AtomicU64,
    earliest_seqno: AtomicU64,
    next_log_number: AtomicU64,
    pending_schedule: AtomicBool,
    flush_state: Mutex<FlushState>,
}

impl Memtable {
    pub fn new(
        id: u64,
        max_write_buffer_size: usize,
        comparator: InternalKeyComparator,
        earliest_seq: u64,
    ) -> Self {
        Self {
            id,
            table: Arc::new(SkipMap::new()),
            comparator,
            mem_size: AtomicUsize::new(0),
            max_write_buffer_size,
            first_seqno: AtomicU64::new(0),
            earliest_seqno: AtomicU64::new(earliest_seq),
            next_log_number: AtomicU64::new(0),
            pending_schedule: AtomicBool::new(false),
            flush_state: Mutex::new(FlushState::default()),
        }
    }

    pub fn get_id(&self) -> u64 {
        self.id
    }

    pub fn insert(&self, internal_key: &[u8], value: &[u8]) {
        self.table
            .insert(MemKey(internal_key.to_vec()), value.to_vec());
        self.mem_size
            .fetch_add(internal_key.len() + value.len() + 8, Ordering::Relaxed);
    }

    pub fn add(&self, sequence: u64, tp: ValueType, user_key: &[u8], value: &[u8]) {
        let mut key = Vec::with_capacity(user_key.len() + 8);
        key.extend_from_slice(user_key);
        key.extend_from_slice(&pack_sequence_and_type(sequence, tp).to_le_bytes());
        self.first_seqno
            .compare_exchange(0, sequence, Ordering::SeqCst, Ordering::SeqCst)
            .ok();
        self.insert(&key, value);
    }

    pub fn delete(&self, sequence: u64, user_key: &[u8]) {
        self.add(sequence, ValueType::TypeDeletion, user_key, b"");
    }

    pub fn new_iterator(&self) -> MemtableIterator {
        MemtableIterator {
            table: self.table.clone(),
            current: None,
        }
    }

    pub fn get_comparator(&self) -> InternalKeyComparator {
        self.comparator.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn mem_size(&self) -> usize {
        self.mem_size.load(Ordering::Relaxed)
    }

    pub fn should_flush(&self) -> bool {
        self.mem_size() >= self.max_write_buffer_size
    }

    pub fn get_first_sequence(&self) -> u64 {
        self.first_seqno.load(Ordering::Acquire)
    }

    pub fn get_earliest_sequence(&self) -> u64 {
        self.earliest_seqno.load(Ordering::Acquire)
    }

    pub fn set_next_log_number(&self, num: u64) {
        self.next_log_number.store(num, Ordering::Release);
    }

    pub fn get_next_log_number(&self) -> u64 {
        self.next_log_number.load(Ordering::Acquire)
    }

    /// Marks the memtable as queued for flush. Returns false if another
    /// caller scheduled it first.
    pub fn mark_schedule_flush(&self) -> bool {
        !self.pending_schedule.swap(true, Ordering::SeqCst)
    }

    pub fn mark_flush_in_progress(&self) {
        let mut state = self.flush_state.lock().unwrap();
        state.in_progress = true;
    }

    pub fn rollback_flush(&self) {
        let mut state = self.flush_state.lock().unwrap();
        state.in_progress = false;
        state.completed = false;
        state.edit = None;
    }

    pub fn is_flush_in_progress(&self) -> bool {
        self.flush_state.lock().unwrap().in_progress
    }

    pub fn mark_flush_completed(&self, edit: Arc<VersionEdit>) {
        let mut state = self.flush_state.lock().unwrap();
        state.completed = true;
        state.edit = Some(edit);
    }

    pub fn is_flush_completed(&self) -> bool {
        self.flush_state.lock().unwrap().completed
    }

    pub fn get_flush_edit(&self) -> Option<Arc<VersionEdit>> {
        self.flush_state.lock().unwrap().edit.clone()
    }
}

/// Forward iterator over one memtable. It owns a handle to the skiplist
/// and remembers only its current key, stepping with range queries, so it
/// stays valid while writers keep inserting.
pub struct MemtableIterator {
    table: Arc<SkipMap<MemKey, Vec<u8>>>,
    current: Option<(MemKey, Vec<u8>)>,
}

impl InternalIterator for MemtableIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek(&mut self, key: &[u8]) {
        let probe = MemKey(key.to_vec());
        self.current = self
            .table
            .range((Included(probe), Unbounded))
            .next()
            .map(|e| (e.key().clone(), e.value().clone()));
    }

    fn seek_to_first(&mut self) {
        self.current = self
            .table
            .front()
            .map(|e| (e.key().clone(), e.value().clone()));
    }

    fn next(&mut self) {
        let last = match &self.current {
            Some((key, _)) => key.clone(),
            None => return,
        };
        self.current = self
            .table
            .range((Excluded(last), Unbounded))
            .next()
            .map(|e| (e.key().clone(), e.value().clone()));
    }

    fn key(&self) -> &[u8] {
        &self.current.as_ref().unwrap().0 .0
    }

    fn value(&self) -> &[u8] {
        &self.current.as_ref().unwrap().1
    }
}
