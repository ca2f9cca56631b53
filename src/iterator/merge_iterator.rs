use crate::common::{InternalKeyComparator, KeyComparator, Result};
use crate::iterator::InternalIterator;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct IteratorWrapper {
    inner: Box<dyn InternalIterator>,
    comparator: InternalKeyComparator,
}

impl PartialEq<Self> for IteratorWrapper {
    fn eq(&self, other: &Self) -> bool {
        if self.inner.valid() && other.inner.valid() {
            return self
                .comparator
                .same_key(self.inner.key(), other.inner.key());
        }
        if !self.inner.valid() && !other.inner.valid() {
            return true;
        }
        false
    }
}

impl Eq for IteratorWrapper {}

impl PartialOrd<Self> for IteratorWrapper {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IteratorWrapper {
    // BinaryHeap is a max-heap, so the comparison is reversed to keep the
    // smallest internal key at the top.
    fn cmp(&self, other: &Self) -> Ordering {
        if self.inner.valid() && other.inner.valid() {
            self.comparator
                .compare_key(other.inner.key(), self.inner.key())
        } else if self.inner.valid() {
            Ordering::Less
        } else if other.inner.valid() {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }
}

/// Merges several sorted child iterators into one sorted stream.
pub struct MergingIterator {
    children: BinaryHeap<IteratorWrapper>,
    other: Vec<IteratorWrapper>,
}

impl MergingIterator {
    pub fn new(iters: Vec<Box<dyn InternalIterator>>, cmp: InternalKeyComparator) -> Self {
        let other: Vec<IteratorWrapper> = iters
            .into_iter()
            .map(|iter| IteratorWrapper {
                inner: iter,
                comparator: cmp.clone(),
            })
            .collect();
        Self {
            children: BinaryHeap::with_capacity(other.len()),
            other,
        }
    }

    fn current_forward(&mut self) {
        while let Some(x) = self.children.peek() {
            if !x.inner.valid() {
                let iter = self.children.pop().unwrap();
                self.other.push(iter);
            } else {
                break;
            }
        }
    }

    fn collect_iterators(&mut self) -> Vec<IteratorWrapper> {
        let mut iters = Vec::with_capacity(self.other.len() + self.children.len());
        std::mem::swap(&mut iters, &mut self.other);
        while let Some(iter) = self.children.pop() {
            iters.push(iter);
        }
        iters
    }
}

impl InternalIterator for MergingIterator {
    fn valid(&self) -> bool {
        self.children
            .peek()
            .map_or(false, |iter| iter.inner.valid())
    }

    fn seek(&mut self, key: &[u8]) {
        let iters = self.collect_iterators();
        for mut iter in iters {
            iter.inner.seek(key);
            if iter.inner.valid() {
                self.children.push(iter);
            } else {
                self.other.push(iter);
            }
        }
    }

    fn seek_to_first(&mut self) {
        let iters = self.collect_iterators();
        for mut iter in iters {
            iter.inner.seek_to_first();
            if iter.inner.valid() {
                self.children.push(iter);
            } else {
                self.other.push(iter);
            }
        }
    }

    fn next(&mut self) {
        {
            let mut x = self.children.peek_mut().unwrap();
            x.inner.next();
        }
        self.current_forward();
    }

    fn key(&self) -> &[u8] {
        self.children.peek().unwrap().inner.key()
    }

    fn value(&self) -> &[u8] {
        self.children.peek().unwrap().inner.value()
    }

    fn status(&self) -> Result<()> {
        for iter in self.children.iter().chain(self.other.iter()) {
            iter.inner.status()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::extract_user_key;
    use crate::memtable::Memtable;
    use crate::common::format::ValueType;
    use std::sync::Arc;

    #[test]
    fn test_merge_memtable_iterators() {
        let comparator = InternalKeyComparator::default();
        let mems: Vec<Arc<Memtable>> = (0..4)
            .map(|i| Arc::new(Memtable::new(i, 1 << 20, comparator.clone(), 0)))
            .collect();
        let mut keys = vec![];
        for i in 0..1000u64 {
            let k = format!("k{:08}", i * 7 % 1000);
            mems[(i % 4) as usize].add(i + 1, ValueType::TypeValue, k.as_bytes(), b"v");
            keys.push(k);
        }
        keys.sort();
        keys.dedup();
        let iters: Vec<Box<dyn InternalIterator>> = mems
            .iter()
            .map(|m| {
                let it: Box<dyn InternalIterator> = Box::new(m.new_iterator());
                it
            })
            .collect();
        let mut iter = MergingIterator::new(iters, comparator);
        iter.seek_to_first();
        let mut i = 0;
        while iter.valid() {
            let user_key = extract_user_key(iter.key()).to_vec();
            assert_eq!(user_key, keys[i].as_bytes());
            iter.next();
            i += 1;
        }
        assert_eq!(i, keys.len());
        assert!(iter.status().is_ok());
    }
}
