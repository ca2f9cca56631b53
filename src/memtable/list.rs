use crate::memtable::Memtable;
use crate::version::VersionEdit;
use std::sync::Arc;

/// Immutable snapshot of the flush queue. `mems` keeps the newest memtable
/// at index 0, so flush candidates are picked from the back.
#[derive(Default, Clone)]
pub struct MemtableListVersion {
    mems: Vec<Arc<Memtable>>,
}

impl MemtableListVersion {
    pub fn add(&self, mem: Arc<Memtable>) -> MemtableListVersion {
        let mut mems = Vec::with_capacity(self.mems.len() + 1);
        mems.push(mem);
        mems.extend_from_slice(&self.mems);
        MemtableListVersion { mems }
    }

    pub fn remove(&self, ids: &[u64]) -> MemtableListVersion {
        let mems = self
            .mems
            .iter()
            .filter(|m| !ids.contains(&m.get_id()))
            .cloned()
            .collect();
        MemtableListVersion { mems }
    }

    pub fn len(&self) -> usize {
        self.mems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mems.is_empty()
    }

    pub fn mems(&self) -> &[Arc<Memtable>] {
        &self.mems
    }
}

/// Tracks immutable memtables between the moment a write buffer fills and
/// the moment its flushed file lands in the manifest. Flushes may finish
/// out of order but results are committed oldest first.
pub struct MemtableList {
    current: Arc<MemtableListVersion>,
    num_flush_not_started: usize,
    commit_in_progress: bool,
}

impl Default for MemtableList {
    fn default() -> Self {
        Self {
            current: Arc::new(MemtableListVersion::default()),
            num_flush_not_started: 0,
            commit_in_progress: false,
        }
    }
}

impl MemtableList {
    pub fn add(&mut self, mem: Arc<Memtable>) {
        self.current = Arc::new(self.current.add(mem));
        self.num_flush_not_started += 1;
    }

    pub fn current(&self) -> Arc<MemtableListVersion> {
        self.current.clone()
    }

    pub fn is_flush_pending(&self) -> bool {
        self.num_flush_not_started > 0
    }

    /// Takes every memtable not yet being flushed, oldest first, and marks
    /// them in progress.
    pub fn pick_memtables_to_flush(&mut self) -> Vec<Arc<Memtable>> {
        let mut picked = vec![];
        for mem in self.current.mems.iter().rev() {
            if !mem.is_flush_in_progress() {
                mem.mark_flush_in_progress();
                self.num_flush_not_started -= 1;
                picked.push(mem.clone());
            }
        }
        picked
    }

    pub fn rollback_memtable_flush(&mut self, mems: &[Arc<Memtable>]) {
        for mem in mems {
            mem.rollback_flush();
            self.num_flush_not_started += 1;
        }
    }

    /// Starts committing the oldest run of completed flushes. Returns the
    /// memtables of that run and their distinct edits, or None when the
    /// oldest memtable is still being written or a commit is underway.
    pub fn start_commit(&mut self) -> Option<(Vec<Arc<Memtable>>, Vec<VersionEdit>)> {
        if self.commit_in_progress {
            return None;
        }
        let mut mems = vec![];
        let mut edits: Vec<Arc<VersionEdit>> = vec![];
        for mem in self.current.mems.iter().rev() {
            if !mem.is_flush_completed() {
                break;
            }
            let edit = match mem.get_flush_edit() {
                Some(edit) => edit,
                None => break,
            };
            // Memtables flushed by one job share a single edit.
            if !edits.iter().any(|e| Arc::ptr_eq(e, &edit)) {
                edits.push(edit);
            }
            mems.push(mem.clone());
        }
        if mems.is_empty() {
            return None;
        }
        self.commit_in_progress = true;
        let edits = edits.iter().map(|e| e.as_ref().clone()).collect();
        Some((mems, edits))
    }

    pub fn finish_commit(&mut self, success: bool, mems: &[Arc<Memtable>]) {
        self.commit_in_progress = false;
        if !success {
            self.rollback_memtable_flush(mems);
        }
    }

    /// Drops flushed memtables from the queue once their edit is durable.
    pub fn remove_flushed(&mut self, ids: &[u64]) {
        self.current = Arc::new(self.current.remove(ids));
    }
}
