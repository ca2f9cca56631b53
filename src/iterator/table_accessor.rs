use crate::version::TableFile;
use std::sync::Arc;

/// Positions over the files of one sorted level. The accessor works on
/// user keys; file boundaries within a level never overlap.
pub trait TableAccessor: Send {
    fn seek(&mut self, key: &[u8]);
    fn seek_to_first(&mut self);
    fn next(&mut self);
    fn valid(&self) -> bool;
    fn size(&self) -> usize;
    fn table(&self) -> Arc<TableFile>;
}

pub struct VecTableAccessor {
    tables: Vec<Arc<TableFile>>,
    cursor: usize,
}

impl VecTableAccessor {
    pub fn new(tables: Vec<Arc<TableFile>>) -> Self {
        Self { tables, cursor: 0 }
    }
}

impl TableAccessor for VecTableAccessor {
    fn seek(&mut self, key: &[u8]) {
        // First file whose largest user key is not below the target.
        self.cursor = match self
            .tables
            .binary_search_by(|node| node.largest_user_key().cmp(key))
        {
            Ok(idx) => idx,
            Err(upper) => upper,
        };
    }

    fn seek_to_first(&mut self) {
        self.cursor = 0;
    }

    fn next(&mut self) {
        self.cursor += 1;
    }

    fn valid(&self) -> bool {
        self.cursor < self.tables.len()
    }

    fn size(&self) -> usize {
        self.tables.len()
    }

    fn table(&self) -> Arc<TableFile> {
        self.tables[self.cursor].clone()
    }
}
