use std::collections::{BTreeMap, HashMap};

/// A small LRU map keyed by file number. Recency is tracked with a
/// monotonically increasing tick so eviction does not need a linked list.
pub struct LruCache<V: Clone> {
    capacity: usize,
    tick: u64,
    entries: HashMap<u64, (V, u64)>,
    order: BTreeMap<u64, u64>,
}

impl<V: Clone> LruCache<V> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            capacity,
            tick: 0,
            entries: HashMap::default(),
            order: BTreeMap::default(),
        }
    }

    pub fn lookup(&mut self, id: u64) -> Option<V> {
        self.tick += 1;
        let tick = self.tick;
        match self.entries.get_mut(&id) {
            Some((v, last_used)) => {
                self.order.remove(last_used);
                self.order.insert(tick, id);
                *last_used = tick;
                Some(v.clone())
            }
            None => None,
        }
    }

    pub fn insert(&mut self, id: u64, v: V) {
        self.tick += 1;
        if let Some((_, last_used)) = self.entries.remove(&id) {
            self.order.remove(&last_used);
        }
        self.entries.insert(id, (v, self.tick));
        self.order.insert(self.tick, id);
        while self.entries.len() > self.capacity {
            let oldest = match self.order.iter().next() {
                Some((_, id)) => *id,
                None => break,
            };
            if let Some((_, last_used)) = self.entries.remove(&oldest) {
                self.order.remove(&last_used);
            }
        }
    }

    pub fn erase(&mut self, id: u64) {
        if let Some((_, last_used)) = self.entries.remove(&id) {
            self.order.remove(&last_used);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
