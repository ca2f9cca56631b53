use super::InnerIterator;
use crate::common::format::{pack_sequence_and_type, ParsedInternalKey, ValueType};
use crate::common::{Error, KeyComparator, MergeOperator, Result};
use std::collections::VecDeque;
use std::sync::Arc;

pub enum MergeOutcome {
    /// The operand stack collapsed into a single value record.
    Success,
    /// Some operands must be kept as merge records because a snapshot or a
    /// deeper level may still need them.
    InProgress,
}

/// Collapses a run of merge operands for one user key. The caller positions
/// the input iterator on the newest merge record; `merge_until` consumes
/// operands downward until it finds a base value, a snapshot boundary or the
/// next user key.
pub struct MergeHelper {
    user_comparator: Arc<dyn KeyComparator>,
    merge_operator: Arc<dyn MergeOperator>,
    min_partial_merge_operands: usize,
    // Internal keys and operand values, newest first.
    keys: Vec<Vec<u8>>,
    values: Vec<Vec<u8>>,
}

impl MergeHelper {
    pub fn new(
        user_comparator: Arc<dyn KeyComparator>,
        merge_operator: Arc<dyn MergeOperator>,
        min_partial_merge_operands: usize,
    ) -> Self {
        Self {
            user_comparator,
            merge_operator,
            min_partial_merge_operands: std::cmp::max(2, min_partial_merge_operands),
            keys: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Records produced by the last `merge_until`, newest first.
    pub fn take_output(&mut self) -> VecDeque<(Vec<u8>, Vec<u8>)> {
        std::mem::take(&mut self.keys)
            .into_iter()
            .zip(std::mem::take(&mut self.values))
            .collect()
    }

    /// `stop_before` is an exclusive sequence bound: operands at or below it
    /// belong to an older snapshot stripe and are left untouched. `at_bottom`
    /// means no level below the output can hold an older base value, so an
    /// exhausted operand stack may be merged against nothing.
    pub async fn merge_until(
        &mut self,
        iter: &mut InnerIterator,
        stop_before: u64,
        at_bottom: bool,
    ) -> Result<MergeOutcome> {
        self.keys.clear();
        self.values.clear();

        let original_key = iter.key().to_vec();
        let first = ParsedInternalKey::parse(&original_key)?;
        debug_assert_eq!(first.tp, ValueType::TypeMerge);
        let user_key = first.user_key.to_vec();
        self.keys.push(original_key.clone());
        self.values.push(iter.value().to_vec());

        let mut hit_next_key = false;
        loop {
            iter.next().await;
            if !iter.valid() {
                iter.status()?;
                break;
            }
            let parsed = match ParsedInternalKey::parse(iter.key()) {
                Ok(parsed) => parsed,
                // Leave the undecodable record for the outer iterator.
                Err(_) => break,
            };
            if !self
                .user_comparator
                .same_key(parsed.user_key, &user_key)
            {
                hit_next_key = true;
                break;
            }
            if stop_before > 0 && parsed.sequence <= stop_before {
                break;
            }
            match parsed.tp {
                ValueType::TypeMerge => {
                    self.keys.push(iter.key().to_vec());
                    self.values.push(iter.value().to_vec());
                }
                ValueType::TypeValue | ValueType::TypeDeletion => {
                    let base = if parsed.tp == ValueType::TypeValue {
                        Some(iter.value().to_vec())
                    } else {
                        None
                    };
                    let merged = self.full_merge(&user_key, base.as_deref())?;
                    self.collapse(&original_key, first.sequence, merged);
                    // The base record is folded into the result.
                    iter.next().await;
                    iter.status()?;
                    return Ok(MergeOutcome::Success);
                }
            }
        }

        if at_bottom && (hit_next_key || !iter.valid()) {
            // No older record for this key can exist anywhere below.
            let merged = self.full_merge(&user_key, None)?;
            self.collapse(&original_key, first.sequence, merged);
            return Ok(MergeOutcome::Success);
        }

        if self.values.len() >= self.min_partial_merge_operands {
            let operands: Vec<&[u8]> =
                self.values.iter().rev().map(|v| v.as_slice()).collect();
            if let Some(merged) = self.merge_operator.partial_merge(&user_key, &operands) {
                self.keys.clear();
                self.values.clear();
                self.keys.push(original_key);
                self.values.push(merged);
            }
        }
        Ok(MergeOutcome::InProgress)
    }

    fn full_merge(&self, user_key: &[u8], base: Option<&[u8]>) -> Result<Vec<u8>> {
        let operands: Vec<&[u8]> = self.values.iter().rev().map(|v| v.as_slice()).collect();
        self.merge_operator
            .full_merge(user_key, base, &operands)
            .ok_or_else(|| {
                Error::Corruption(format!(
                    "merge operator {} failed",
                    self.merge_operator.name()
                ))
            })
    }

    fn collapse(&mut self, original_key: &[u8], sequence: u64, merged: Vec<u8>) {
        let mut key = original_key[..original_key.len() - 8].to_vec();
        key.extend_from_slice(
            &pack_sequence_and_type(sequence, ValueType::TypeValue).to_le_bytes(),
        );
        self.keys.clear();
        self.values.clear();
        self.keys.push(key);
        self.values.push(merged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{DefaultUserComparator, InternalKeyComparator};
    use crate::table::InMemTableIterator;
    use tokio::runtime::Runtime;

    struct AppendOperator;

    impl MergeOperator for AppendOperator {
        fn name(&self) -> &'static str {
            "AppendOperator"
        }

        fn full_merge(
            &self,
            _user_key: &[u8],
            existing_value: Option<&[u8]>,
            operands: &[&[u8]],
        ) -> Option<Vec<u8>> {
            let mut out = existing_value.map(|v| v.to_vec()).unwrap_or_default();
            for op in operands {
                out.extend_from_slice(op);
            }
            Some(out)
        }

        fn partial_merge(&self, _user_key: &[u8], operands: &[&[u8]]) -> Option<Vec<u8>> {
            let mut out = Vec::new();
            for op in operands {
                out.extend_from_slice(op);
            }
            Some(out)
        }
    }

    fn ikey(user: &[u8], seq: u64, tp: ValueType) -> Vec<u8> {
        let mut k = user.to_vec();
        k.extend_from_slice(&pack_sequence_and_type(seq, tp).to_le_bytes());
        k
    }

    fn helper() -> MergeHelper {
        MergeHelper::new(
            Arc::new(DefaultUserComparator::default()),
            Arc::new(AppendOperator),
            2,
        )
    }

    fn iter_over(data: Vec<(Vec<u8>, Vec<u8>)>) -> InnerIterator {
        let comparator = InternalKeyComparator::default();
        InnerIterator::Async(Box::new(InMemTableIterator::new(data, &comparator)))
    }

    #[test]
    fn test_merge_with_base_value() {
        let r = Runtime::new().unwrap();
        let mut iter = iter_over(vec![
            (ikey(b"a", 30, ValueType::TypeMerge), b"+1".to_vec()),
            (ikey(b"a", 20, ValueType::TypeMerge), b"+2".to_vec()),
            (ikey(b"a", 10, ValueType::TypeValue), b"5".to_vec()),
            (ikey(b"b", 5, ValueType::TypeValue), b"x".to_vec()),
        ]);
        let mut helper = helper();
        r.block_on(async {
            iter.seek_to_first().await;
            let outcome = helper.merge_until(&mut iter, 0, false).await.unwrap();
            assert!(matches!(outcome, MergeOutcome::Success));
        });
        let out = helper.take_output();
        assert_eq!(out.len(), 1);
        let (key, value) = &out[0];
        let parsed = ParsedInternalKey::parse(key).unwrap();
        assert_eq!(parsed.user_key, b"a");
        assert_eq!(parsed.sequence, 30);
        assert_eq!(parsed.tp, ValueType::TypeValue);
        assert_eq!(value, b"5+2+1");
        // The base value was consumed along with the operands.
        assert!(iter.valid());
        assert_eq!(crate::util::extract_user_key(iter.key()), b"b");
    }

    #[test]
    fn test_merge_against_deletion_and_bottom() {
        let r = Runtime::new().unwrap();
        let mut iter = iter_over(vec![
            (ikey(b"a", 30, ValueType::TypeMerge), b"+1".to_vec()),
            (ikey(b"a", 10, ValueType::TypeDeletion), vec![]),
            (ikey(b"b", 25, ValueType::TypeMerge), b"+9".to_vec()),
        ]);
        let mut helper = helper();
        r.block_on(async {
            iter.seek_to_first().await;
            let outcome = helper.merge_until(&mut iter, 0, false).await.unwrap();
            assert!(matches!(outcome, MergeOutcome::Success));
            let out = helper.take_output();
            assert_eq!(out[0].1, b"+1");

            // `b` has no base record at all; at the bottom level the stack
            // still collapses to a value.
            let outcome = helper.merge_until(&mut iter, 0, true).await.unwrap();
            assert!(matches!(outcome, MergeOutcome::Success));
            let out = helper.take_output();
            let parsed = ParsedInternalKey::parse(&out[0].0).unwrap();
            assert_eq!(parsed.user_key, b"b");
            assert_eq!(parsed.tp, ValueType::TypeValue);
            assert_eq!(out[0].1, b"+9");
        });
    }

    #[test]
    fn test_snapshot_stops_merge() {
        let r = Runtime::new().unwrap();
        let mut iter = iter_over(vec![
            (ikey(b"a", 30, ValueType::TypeMerge), b"+1".to_vec()),
            (ikey(b"a", 20, ValueType::TypeMerge), b"+2".to_vec()),
            (ikey(b"a", 10, ValueType::TypeValue), b"5".to_vec()),
        ]);
        let mut helper = helper();
        r.block_on(async {
            iter.seek_to_first().await;
            // Operands at or below sequence 20 belong to an older snapshot.
            let outcome = helper.merge_until(&mut iter, 20, false).await.unwrap();
            assert!(matches!(outcome, MergeOutcome::InProgress));
        });
        let out = helper.take_output();
        assert_eq!(out.len(), 1);
        let parsed = ParsedInternalKey::parse(&out[0].0).unwrap();
        assert_eq!(parsed.sequence, 30);
        assert_eq!(parsed.tp, ValueType::TypeMerge);
        assert_eq!(out[0].1, b"+1");
        assert!(iter.valid());
        let parsed = ParsedInternalKey::parse(iter.key()).unwrap();
        assert_eq!(parsed.sequence, 20);
    }
}
