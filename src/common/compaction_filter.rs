pub enum CompactionFilterDecision {
    Keep,
    /// Turn the entry into a deletion tombstone.
    Remove,
    ChangeValue(Vec<u8>),
}

/// User hook invoked on the newest visible value of each key during
/// compaction. Only plain values are offered; deletions and merge operands
/// pass through untouched, as do entries still protected by a snapshot.
pub trait CompactionFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn filter(&self, level: u32, user_key: &[u8], existing_value: &[u8])
        -> CompactionFilterDecision;
}
