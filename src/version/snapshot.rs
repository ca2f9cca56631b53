use std::collections::BTreeMap;
use std::sync::Arc;

/// A pin on every sequence number at or below `sequence`. Entries hidden
/// behind a live snapshot cannot be dropped by compaction.
pub struct Snapshot {
    sequence: u64,
}

impl Snapshot {
    pub fn get_sequence(&self) -> u64 {
        self.sequence
    }
}

/// Live snapshots ordered by sequence. Several snapshots may pin the same
/// sequence, so each entry carries a reference count.
#[derive(Default)]
pub struct SnapshotList {
    snapshots: BTreeMap<u64, usize>,
    count: usize,
}

impl SnapshotList {
    pub fn new_snapshot(&mut self, sequence: u64) -> Arc<Snapshot> {
        *self.snapshots.entry(sequence).or_insert(0) += 1;
        self.count += 1;
        Arc::new(Snapshot { sequence })
    }

    pub fn release_snapshot(&mut self, s: Arc<Snapshot>) {
        if let Some(refs) = self.snapshots.get_mut(&s.sequence) {
            *refs -= 1;
            if *refs == 0 {
                self.snapshots.remove(&s.sequence);
            }
            self.count -= 1;
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// All pinned sequences in ascending order.
    pub fn collect_snapshots(&self, snapshots: &mut Vec<u64>) {
        snapshots.extend(self.snapshots.keys().copied());
    }

    pub fn oldest(&self) -> Option<u64> {
        self.snapshots.keys().next().copied()
    }
}
