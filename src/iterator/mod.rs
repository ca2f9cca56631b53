mod async_merge_iterator;
mod merge_iterator;
mod table_accessor;
mod two_level_iterator;

pub use async_merge_iterator::MergingIterator as AsyncMergingIterator;
pub use merge_iterator::MergingIterator;
pub use table_accessor::{TableAccessor, VecTableAccessor};
pub use two_level_iterator::TwoLevelIterator;

use crate::common::Result;
use async_trait::async_trait;

/// A forward cursor over internal key/value pairs. After a seek, `next`
/// only moves towards larger internal keys.
///
/// `key` and `value` must only be called while `valid()` returns true.
/// An iterator that stops early because of an internal error reports it
/// through `status`; an exhausted iterator with `Ok` status has simply
/// reached the end of its data.
pub trait InternalIterator: Send {
    fn valid(&self) -> bool;
    fn seek(&mut self, key: &[u8]);
    fn seek_to_first(&mut self);
    fn next(&mut self);
    fn key(&self) -> &[u8];
    fn value(&self) -> &[u8];
    fn status(&self) -> Result<()> {
        Ok(())
    }
}

/// The asynchronous twin of [`InternalIterator`], used wherever stepping
/// may issue file reads.
#[async_trait]
pub trait AsyncIterator: Send {
    fn valid(&self) -> bool;
    async fn seek(&mut self, key: &[u8]);
    async fn seek_to_first(&mut self);
    async fn next(&mut self);
    fn key(&self) -> &[u8];
    fn value(&self) -> &[u8];
    fn status(&self) -> Result<()> {
        Ok(())
    }
}
