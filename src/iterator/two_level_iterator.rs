use crate::common::extract_user_key;
use crate::common::Result;
use crate::iterator::table_accessor::TableAccessor;
use crate::iterator::AsyncIterator;

/// Iterates a whole sorted level by chaining per-file iterators behind a
/// [`TableAccessor`] cursor.
pub struct TwoLevelIterator<A: TableAccessor> {
    table_accessor: A,
    current: Option<Box<dyn AsyncIterator>>,
    status: Option<crate::common::Error>,
}

impl<A: TableAccessor> TwoLevelIterator<A> {
    pub fn new(table_accessor: A) -> Self {
        Self {
            table_accessor,
            current: None,
            status: None,
        }
    }

    // Opens the next file that has any data, skipping empty files.
    async fn forward_iterator(&mut self) {
        while self.table_accessor.valid() {
            let mut iter = self.table_accessor.table().reader.new_iterator();
            iter.seek_to_first().await;
            if iter.valid() {
                self.current = Some(iter);
                return;
            }
            if let Err(e) = iter.status() {
                self.status = Some(e);
                break;
            }
            self.table_accessor.next();
        }
        self.current = None;
    }
}

#[async_trait::async_trait]
impl<A: TableAccessor> AsyncIterator for TwoLevelIterator<A> {
    fn valid(&self) -> bool {
        self.current.as_ref().map_or(false, |iter| iter.valid())
    }

    async fn seek(&mut self, key: &[u8]) {
        self.status = None;
        self.table_accessor.seek(extract_user_key(key));
        if self.table_accessor.valid() {
            let mut iter = self.table_accessor.table().reader.new_iterator();
            iter.seek(key).await;
            if iter.valid() {
                self.current = Some(iter);
                return;
            }
            if let Err(e) = iter.status() {
                self.status = Some(e);
                self.current = None;
                return;
            }
            self.table_accessor.next();
        }
        self.forward_iterator().await;
    }

    async fn seek_to_first(&mut self) {
        self.status = None;
        self.table_accessor.seek_to_first();
        self.forward_iterator().await;
    }

    async fn next(&mut self) {
        self.current.as_mut().unwrap().next().await;
        if self.current.as_ref().unwrap().valid() {
            return;
        }
        if let Err(e) = self.current.as_ref().unwrap().status() {
            self.status = Some(e);
            self.current = None;
            return;
        }
        self.table_accessor.next();
        self.forward_iterator().await;
    }

    fn key(&self) -> &[u8] {
        assert!(self.valid());
        self.current.as_ref().unwrap().key()
    }

    fn value(&self) -> &[u8] {
        self.current.as_ref().unwrap().value()
    }

    fn status(&self) -> Result<()> {
        if let Some(e) = &self.status {
            return Err(e.clone());
        }
        if let Some(iter) = &self.current {
            iter.status()?;
        }
        Ok(())
    }
}
