use super::compaction_iter::CompactionIter;
use super::merge_helper::MergeHelper;
use super::stats::CompactionStatistics;
use super::{CompactionEngine, FlushRequest};
use crate::common::{make_table_file_name, Error, Result};
use crate::iterator::{InternalIterator, MergingIterator};
use crate::memtable::Memtable;
use crate::options::{ColumnFamilyOptions, ImmutableDBOptions};
use crate::table::TableBuilderOptions;
use crate::version::{FileMetaData, VersionEdit, VersionSet};
use fail::fail_point;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Writes the contents of a group of immutable memtables into one level
/// zero table file.
pub struct FlushJob {
    options: Arc<ImmutableDBOptions>,
    cf_options: Arc<ColumnFamilyOptions>,
    mems: Vec<Arc<Memtable>>,
    meta: FileMetaData,
    cf_id: u32,
    snapshots: Vec<u64>,
    stats: Arc<CompactionStatistics>,
}

impl FlushJob {
    pub fn new(
        options: Arc<ImmutableDBOptions>,
        cf_options: Arc<ColumnFamilyOptions>,
        mems: Vec<Arc<Memtable>>,
        cf_id: u32,
        file_number: u64,
        snapshots: Vec<u64>,
        stats: Arc<CompactionStatistics>,
    ) -> Self {
        let meta = FileMetaData::new(file_number, 0, vec![], vec![]);
        Self {
            options,
            cf_options,
            mems,
            meta,
            cf_id,
            snapshots,
            stats,
        }
    }

    pub async fn run(&mut self) -> Result<FileMetaData> {
        fail_point!("flush_job::run", |_| {
            Err(Error::Other("injected flush error".to_string()))
        });
        let fname = make_table_file_name(&self.options.db_path, self.meta.id());
        let file = self.options.fs.open_writable_file_writer(fname)?;
        let mut build_opts = TableBuilderOptions::default();
        build_opts.column_family_id = self.cf_id;
        build_opts.internal_comparator = self.cf_options.comparator.clone();
        let mut builder = self.cf_options.factory.new_builder(&build_opts, file)?;

        let iters: Vec<Box<dyn InternalIterator>> = self
            .mems
            .iter()
            .map(|m| Box::new(m.new_iterator()) as Box<dyn InternalIterator>)
            .collect();
        let merging = MergingIterator::new(iters, self.cf_options.comparator.clone());
        let user_comparator = self.cf_options.comparator.get_user_comparator().clone();
        let merge = self.cf_options.merge_operator.clone().map(|op| {
            MergeHelper::new(
                user_comparator.clone(),
                op,
                self.cf_options.min_merge_operands,
            )
        });
        let mut iter = CompactionIter::new(
            Box::new(merging),
            user_comparator,
            self.snapshots.clone(),
            merge,
            None,
            false,
            self.stats.clone(),
        );
        iter.seek_to_first().await;
        while iter.valid() {
            if builder.should_flush() {
                builder.flush().await?;
            }
            builder.add(iter.key(), iter.value())?;
            self.meta.update_boundary(iter.key(), iter.current_sequence());
            iter.next().await;
        }
        iter.status()?;
        drop(iter);
        builder.finish().await?;
        self.meta.fd.file_size = builder.file_size();
        self.meta.num_entries = builder.num_entries();
        self.meta.num_deletions = builder.num_deletions();
        self.stats.add_bytes_written(self.meta.fd.file_size);
        log::info!(
            "column family {} flushed {} memtables into table {} ({} entries, {} bytes)",
            self.cf_id,
            self.mems.len(),
            self.meta.id(),
            self.meta.num_entries,
            self.meta.fd.file_size,
        );
        Ok(self.meta.clone())
    }
}

/// Flushes the picked memtables of every requested column family and
/// commits the results through `engine` in queue order.
pub async fn run_flush_memtable_job<E: CompactionEngine>(
    engine: E,
    reqs: Vec<FlushRequest>,
    version_set: Arc<Mutex<VersionSet>>,
    options: Arc<ImmutableDBOptions>,
    snapshots: Vec<u64>,
    stats: Arc<CompactionStatistics>,
) -> Result<()> {
    let mut grouped: HashMap<u32, Vec<Arc<Memtable>>> = HashMap::new();
    for req in reqs {
        for (cf_id, mem) in req.mems {
            grouped.entry(cf_id).or_default().push(mem);
        }
    }
    let mut cf_ids: Vec<u32> = grouped.keys().copied().collect();
    cf_ids.sort_unstable();

    for cf_id in &cf_ids {
        let mems = &grouped[cf_id];
        let cf_options = {
            let vs = version_set.lock().unwrap();
            match vs.get_column_family(*cf_id) {
                Some(cf) => cf.get_options(),
                // The column family vanished; its memtables go with it.
                None => continue,
            }
        };
        let mut edit = VersionEdit::default();
        edit.column_family = *cf_id;
        edit.mems_deleted = mems.iter().map(|m| m.get_id()).collect();
        edit.set_log_number(
            mems.iter()
                .map(|m| m.get_next_log_number())
                .max()
                .unwrap_or(0),
        );
        let non_empty: Vec<Arc<Memtable>> =
            mems.iter().filter(|m| !m.is_empty()).cloned().collect();
        if !non_empty.is_empty() {
            let file_number = {
                let vs = version_set.lock().unwrap();
                vs.new_file_number()
            };
            let mut job = FlushJob::new(
                options.clone(),
                cf_options,
                non_empty,
                *cf_id,
                file_number,
                snapshots.clone(),
                stats.clone(),
            );
            match job.run().await {
                Ok(meta) => edit.add_file_meta(meta),
                Err(e) => {
                    let mut vs = version_set.lock().unwrap();
                    if let Some(cf) = vs.mut_column_family(*cf_id) {
                        cf.immutable_memtables().rollback_memtable_flush(mems);
                    }
                    if options.paranoid_checks && e.is_io() {
                        vs.record_background_error(e.clone());
                    }
                    return Err(e);
                }
            }
        }
        let edit = Arc::new(edit);
        for mem in mems {
            mem.mark_flush_completed(edit.clone());
        }
    }
    install_memtable_flush_results(engine, version_set, &cf_ids).await
}

/// Commits completed flushes oldest first. Flush jobs may finish out of
/// order; only a completed prefix of the queue is committed at a time.
async fn install_memtable_flush_results<E: CompactionEngine>(
    mut engine: E,
    version_set: Arc<Mutex<VersionSet>>,
    cf_ids: &[u32],
) -> Result<()> {
    for cf_id in cf_ids {
        loop {
            let (mems, edits) = {
                let mut vs = version_set.lock().unwrap();
                match vs.start_flush_commit(*cf_id) {
                    Some(batch) => batch,
                    None => break,
                }
            };
            let res = engine.apply(edits).await;
            {
                let mut vs = version_set.lock().unwrap();
                vs.finish_flush_commit(*cf_id, res.is_ok(), &mems);
            }
            res?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::format::ValueType;
    use crate::common::{FileSystem, InMemFileSystem, InternalKeyComparator};
    use crate::table::{TableFactory, TableReaderOptions};
    use tokio::runtime::Runtime;

    #[test]
    fn test_flush_two_memtables() {
        let fs = Arc::new(InMemFileSystem::default());
        let options = Arc::new(ImmutableDBOptions {
            fs: fs.clone(),
            ..Default::default()
        });
        let cf_options = Arc::new(ColumnFamilyOptions::default());
        let comparator = InternalKeyComparator::default();

        let m1 = Arc::new(Memtable::new(1, 1 << 20, comparator.clone(), 0));
        let m2 = Arc::new(Memtable::new(2, 1 << 20, comparator.clone(), 0));
        for i in 0..100u64 {
            m1.add(
                i + 1,
                ValueType::TypeValue,
                format!("k{:04}", i).as_bytes(),
                b"old",
            );
        }
        for i in 50..150u64 {
            m2.add(
                i + 101,
                ValueType::TypeValue,
                format!("k{:04}", i).as_bytes(),
                b"new",
            );
        }

        let mut job = FlushJob::new(
            options.clone(),
            cf_options.clone(),
            vec![m1, m2],
            0,
            7,
            vec![],
            Arc::default(),
        );
        let r = Runtime::new().unwrap();
        let meta = r.block_on(job.run()).unwrap();
        // Shadowed versions of k0050..k0099 are dropped.
        assert_eq!(meta.num_entries, 150);
        assert_eq!(crate::util::extract_user_key(&meta.smallest), b"k0000");
        assert_eq!(crate::util::extract_user_key(&meta.largest), b"k0149");

        let reader = r
            .block_on(async {
                let fname = make_table_file_name(&options.db_path, 7);
                let file = fs.open_random_access_file(fname)?;
                let opts = TableReaderOptions {
                    file_size: meta.fd.file_size as usize,
                    level: 0,
                    internal_comparator: comparator,
                };
                cf_options.factory.open_reader(&opts, file).await
            })
            .unwrap();
        assert_eq!(reader.num_entries(), 150);
        let mut iter = reader.new_iterator();
        r.block_on(async {
            iter.seek(&crate::common::make_internal_seek_key(b"k0075")).await;
            assert!(iter.valid());
            assert_eq!(iter.value(), b"new");
        });
    }
}
