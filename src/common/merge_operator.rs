/// User hook that combines a stack of merge operands for one key.
///
/// Operands are always passed oldest first. Returning `None` from either
/// method means the operator could not combine the inputs; a failed full
/// merge is treated as corruption by the compaction, a failed partial merge
/// simply keeps the operands separate.
pub trait MergeOperator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Combines the base value (if any) with every pending operand into the
    /// final value for the key.
    fn full_merge(
        &self,
        user_key: &[u8],
        existing_value: Option<&[u8]>,
        operands: &[&[u8]],
    ) -> Option<Vec<u8>>;

    /// Collapses two or more operands into a single operand without knowing
    /// the base value. Optional; the default declines.
    fn partial_merge(&self, _user_key: &[u8], _operands: &[&[u8]]) -> Option<Vec<u8>> {
        None
    }
}
