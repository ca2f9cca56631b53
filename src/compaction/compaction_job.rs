use super::compaction::{Compaction, GrandparentState};
use super::compaction_iter::CompactionIter;
use super::merge_helper::MergeHelper;
use super::stats::CompactionStatistics;
use super::CompactionEngine;
use crate::common::format::make_internal_seek_key;
use crate::common::{make_table_file_name, Error, KeyComparator, Result};
use crate::iterator::{AsyncIterator, AsyncMergingIterator, TwoLevelIterator, VecTableAccessor};
use crate::options::ImmutableDBOptions;
use crate::table::{TableBuilder, TableBuilderOptions, TableFactory, TableReaderOptions};
use crate::util::extract_user_key;
use crate::version::{FileMetaData, KernelNumberContext, VersionEdit};
use fail::fail_point;
use futures::channel::oneshot;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use yatp::task::future::TaskCell;
use yatp::ThreadPool;

/// One key range of a compaction, processed independently of its siblings.
struct SubcompactionState {
    // User key bounds; None means unbounded. `end` is exclusive.
    start: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
    outputs: Vec<FileMetaData>,
    builder: Option<Box<dyn TableBuilder>>,
    current_output: Option<FileMetaData>,
}

impl SubcompactionState {
    fn new(start: Option<Vec<u8>>, end: Option<Vec<u8>>) -> Self {
        Self {
            start,
            end,
            outputs: vec![],
            builder: None,
            current_output: None,
        }
    }
}

/// Runs one planned compaction to completion: reads the merged inputs,
/// reduces them, writes output tables and installs a single version edit
/// through `engine`. Input files are released when `compaction` drops,
/// whatever the outcome.
#[allow(clippy::too_many_arguments)]
pub async fn run_compaction_job<E: CompactionEngine>(
    mut engine: E,
    compaction: Compaction,
    kernel: Arc<KernelNumberContext>,
    options: Arc<ImmutableDBOptions>,
    pool: &ThreadPool<TaskCell>,
    snapshots: Vec<u64>,
    stats: Arc<CompactionStatistics>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let compaction = Arc::new(compaction);
    if compaction.is_trivial_move() {
        let table = &compaction.inputs[0].tables[0];
        let mut edit = VersionEdit::default();
        edit.column_family = compaction.cf_id;
        let mut meta = table.meta.clone();
        meta.level = compaction.output_level;
        edit.add_file_meta(meta);
        edit.delete_file(compaction.inputs[0].level, table.id());
        log::info!(
            "column family {} moves table {} from level {} to level {}",
            compaction.cf_id,
            table.id(),
            compaction.inputs[0].level,
            compaction.output_level,
        );
        return engine.apply(vec![edit]).await;
    }

    let mut subs: Vec<SubcompactionState> = gen_subcompaction_boundaries(&compaction, &options)
        .into_iter()
        .map(|(start, end)| SubcompactionState::new(start, end))
        .collect();

    let result = if subs.len() == 1 {
        process_subcompaction(
            compaction.clone(),
            &mut subs[0],
            kernel.clone(),
            options.clone(),
            snapshots.clone(),
            stats.clone(),
            shutdown.clone(),
        )
        .await
    } else {
        let mut receivers = vec![];
        let rest: Vec<SubcompactionState> = subs.drain(1..).collect();
        for mut sub in rest {
            let (tx, rx) = oneshot::channel();
            let compaction = compaction.clone();
            let kernel = kernel.clone();
            let options = options.clone();
            let snapshots = snapshots.clone();
            let stats = stats.clone();
            let shutdown = shutdown.clone();
            pool.spawn(async move {
                let res = process_subcompaction(
                    compaction, &mut sub, kernel, options, snapshots, stats, shutdown,
                )
                .await;
                let _ = tx.send((sub, res));
            });
            receivers.push(rx);
        }
        let mut result = process_subcompaction(
            compaction.clone(),
            &mut subs[0],
            kernel.clone(),
            options.clone(),
            snapshots.clone(),
            stats.clone(),
            shutdown.clone(),
        )
        .await;
        // The first failure in subcompaction order decides the job result.
        for rx in receivers {
            match rx.await {
                Ok((sub, res)) => {
                    subs.push(sub);
                    if result.is_ok() {
                        result = res;
                    }
                }
                Err(_) => {
                    if result.is_ok() {
                        result = Err(Error::Cancel("subcompaction worker gone".to_string()));
                    }
                }
            }
        }
        result
    };

    match result {
        Ok(()) => install_compaction_results(engine, &compaction, &options, subs).await,
        Err(e) => {
            cleanup_compaction(&options, &mut subs);
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_subcompaction(
    compaction: Arc<Compaction>,
    state: &mut SubcompactionState,
    kernel: Arc<KernelNumberContext>,
    options: Arc<ImmutableDBOptions>,
    snapshots: Vec<u64>,
    stats: Arc<CompactionStatistics>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let cf_opts = &compaction.cf_options;
    let user_comparator = cf_opts.comparator.get_user_comparator().clone();
    let mut iters: Vec<Box<dyn AsyncIterator>> = vec![];
    for input in &compaction.inputs {
        if input.level == 0 {
            // Level zero files overlap and need one cursor each.
            for t in &input.tables {
                iters.push(t.reader.new_iterator());
            }
        } else {
            iters.push(Box::new(TwoLevelIterator::new(VecTableAccessor::new(
                input.tables.clone(),
            ))));
        }
    }
    let merging = AsyncMergingIterator::new(iters, cf_opts.comparator.clone());
    let merge = cf_opts.merge_operator.clone().map(|op| {
        MergeHelper::new(user_comparator.clone(), op, cf_opts.min_merge_operands)
    });
    let mut iter = CompactionIter::new_with_async(
        Box::new(merging),
        user_comparator.clone(),
        snapshots,
        merge,
        cf_opts.compaction_filter.clone(),
        Some(compaction.clone()),
        compaction.bottommost_level,
        stats.clone(),
    );
    match &state.start {
        Some(start) => iter.seek(&make_internal_seek_key(start)).await,
        None => iter.seek_to_first().await,
    }

    let mut grandparent_state = GrandparentState::default();
    while iter.valid() {
        if shutdown.load(Ordering::Acquire) || compaction.cf_dropped.load(Ordering::Acquire) {
            return Err(Error::Cancel("compaction stopped".to_string()));
        }
        if let Some(end) = &state.end {
            if user_comparator
                .compare_key(extract_user_key(iter.key()), end)
                .is_ge()
            {
                break;
            }
        }
        let grandparent_cut = compaction.should_stop_before(iter.key(), &mut grandparent_state);
        if let Some(builder) = &state.builder {
            // Never split the versions of one user key across two files.
            let size_cut = builder.file_size() >= compaction.max_output_file_size
                && !user_comparator.same_key(
                    extract_user_key(builder.last_key()),
                    extract_user_key(iter.key()),
                );
            if size_cut || grandparent_cut {
                finish_output(state, &compaction, &options, &stats).await?;
            }
        }
        if state.builder.is_none() {
            open_output(state, &compaction, kernel.as_ref(), &options)?;
        }
        if let Some(builder) = state.builder.as_mut() {
            if builder.should_flush() {
                builder.flush().await?;
            }
            builder.add(iter.key(), iter.value())?;
        }
        if let Some(meta) = state.current_output.as_mut() {
            meta.update_boundary(iter.key(), iter.current_sequence());
        }
        iter.next().await;
    }
    iter.status()?;
    finish_output(state, &compaction, &options, &stats).await
}

fn open_output(
    state: &mut SubcompactionState,
    compaction: &Compaction,
    kernel: &KernelNumberContext,
    options: &Arc<ImmutableDBOptions>,
) -> Result<()> {
    let file_number = kernel.new_file_number();
    let fname = make_table_file_name(&options.db_path, file_number);
    let file = options.fs.open_writable_file_writer(fname)?;
    let mut build_opts = TableBuilderOptions::default();
    build_opts.column_family_id = compaction.cf_id;
    build_opts.internal_comparator = compaction.cf_options.comparator.clone();
    build_opts.target_file_size = compaction.max_output_file_size as usize;
    let builder = compaction.cf_options.factory.new_builder(&build_opts, file)?;
    state.builder = Some(builder);
    state.current_output = Some(FileMetaData::new(
        file_number,
        compaction.output_level,
        vec![],
        vec![],
    ));
    Ok(())
}

async fn finish_output(
    state: &mut SubcompactionState,
    compaction: &Compaction,
    options: &Arc<ImmutableDBOptions>,
    stats: &Arc<CompactionStatistics>,
) -> Result<()> {
    fail_point!("compaction_job::finish_output", |_| {
        Err(Error::Other("injected compaction output error".to_string()))
    });
    let mut builder = match state.builder.take() {
        Some(builder) => builder,
        None => return Ok(()),
    };
    let mut meta = match state.current_output.take() {
        Some(meta) => meta,
        None => return Ok(()),
    };
    builder.finish().await?;
    meta.fd.file_size = builder.file_size();
    meta.num_entries = builder.num_entries();
    meta.num_deletions = builder.num_deletions();
    meta.marked_for_compaction = builder.need_compact();
    stats.add_bytes_written(meta.fd.file_size);
    if options.paranoid_file_checks {
        verify_output(&meta, compaction, options).await?;
    }
    log::info!(
        "compaction output table {} at level {} ({} entries, {} bytes)",
        meta.id(),
        meta.level,
        meta.num_entries,
        meta.fd.file_size,
    );
    state.outputs.push(meta);
    Ok(())
}

/// Reads the freshly written table back and recounts its entries.
async fn verify_output(
    meta: &FileMetaData,
    compaction: &Compaction,
    options: &Arc<ImmutableDBOptions>,
) -> Result<()> {
    let fname = make_table_file_name(&options.db_path, meta.id());
    let file = options.fs.open_random_access_file(fname)?;
    let opts = TableReaderOptions {
        file_size: meta.fd.file_size as usize,
        level: meta.level,
        internal_comparator: compaction.cf_options.comparator.clone(),
    };
    let reader = compaction.cf_options.factory.open_reader(&opts, file).await?;
    let mut iter = reader.new_iterator();
    iter.seek_to_first().await;
    let mut count = 0u64;
    while iter.valid() {
        count += 1;
        iter.next().await;
    }
    if count != meta.num_entries {
        return Err(Error::Corruption(format!(
            "table {} re-read {} entries but {} were written",
            meta.id(),
            count,
            meta.num_entries
        )));
    }
    Ok(())
}

async fn install_compaction_results<E: CompactionEngine>(
    mut engine: E,
    compaction: &Arc<Compaction>,
    options: &Arc<ImmutableDBOptions>,
    subs: Vec<SubcompactionState>,
) -> Result<()> {
    let mut edit = VersionEdit::default();
    edit.column_family = compaction.cf_id;
    let mut output_ids = vec![];
    for sub in subs {
        for meta in sub.outputs {
            output_ids.push(meta.id());
            edit.add_file_meta(meta);
        }
    }
    for input in &compaction.inputs {
        for t in &input.tables {
            edit.delete_file(input.level, t.id());
        }
    }
    log::info!(
        "column family {} compacted {} tables into {} tables at level {}",
        compaction.cf_id,
        compaction.num_input_tables(),
        output_ids.len(),
        compaction.output_level,
    );
    match engine.apply(vec![edit]).await {
        Ok(()) => Ok(()),
        Err(e) => {
            for id in output_ids {
                let _ = options
                    .fs
                    .remove(make_table_file_name(&options.db_path, id));
            }
            Err(e)
        }
    }
}

fn cleanup_compaction(options: &Arc<ImmutableDBOptions>, subs: &mut Vec<SubcompactionState>) {
    for sub in subs {
        if let Some(mut builder) = sub.builder.take() {
            builder.abandon();
        }
        if let Some(meta) = sub.current_output.take() {
            let _ = options
                .fs
                .remove(make_table_file_name(&options.db_path, meta.id()));
        }
        for meta in sub.outputs.drain(..) {
            let _ = options
                .fs
                .remove(make_table_file_name(&options.db_path, meta.id()));
        }
    }
}

/// Splits the compacted key space into roughly equal sized ranges so wide
/// compactions can use several threads. Bounds come from the input file
/// boundaries; sizes are estimated from file metadata.
fn gen_subcompaction_boundaries(
    compaction: &Compaction,
    options: &ImmutableDBOptions,
) -> Vec<(Option<Vec<u8>>, Option<Vec<u8>>)> {
    let single = vec![(None, None)];
    if options.max_subcompactions <= 1 {
        return single;
    }
    let user_comparator = compaction.cf_options.comparator.get_user_comparator();
    let info = compaction.input_version.get_storage_info();
    let mut bounds: Vec<Vec<u8>> = vec![];
    for input in &compaction.inputs {
        for t in &input.tables {
            bounds.push(t.smallest_user_key().to_vec());
            bounds.push(t.largest_user_key().to_vec());
        }
    }
    bounds.sort_by(|a, b| user_comparator.compare_key(a, b));
    bounds.dedup_by(|a, b| user_comparator.same_key(a, b));
    if bounds.len() <= 2 {
        return single;
    }

    let mut sized: Vec<(Vec<u8>, u64)> = vec![];
    let mut total = 0u64;
    for w in bounds.windows(2) {
        let mut size = 0;
        for input in &compaction.inputs {
            size += info.approximate_size(
                input.level as usize,
                &w[0],
                &w[1],
                user_comparator.as_ref(),
            );
        }
        total += size;
        sized.push((w[1].clone(), size));
    }
    let max_output = std::cmp::max(1, compaction.max_output_file_size * 4 / 5);
    let limit = std::cmp::min(options.max_subcompactions as u64, total / max_output);
    let n = std::cmp::min(sized.len() as u64, std::cmp::max(1, limit));
    if n <= 1 {
        return single;
    }
    let mean = total / n;
    let mut splits: Vec<Vec<u8>> = vec![];
    let mut acc = 0u64;
    // The last bound is the overall maximum, never a split point.
    for (bound, size) in sized.iter().take(sized.len() - 1) {
        acc += size;
        if acc >= mean && (splits.len() as u64) < n - 1 {
            splits.push(bound.clone());
            acc = 0;
        }
    }
    if splits.is_empty() {
        return single;
    }
    let mut ranges = vec![];
    let mut start: Option<Vec<u8>> = None;
    for split in splits {
        ranges.push((start.clone(), Some(split.clone())));
        start = Some(split);
    }
    ranges.push((start, None));
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::format::{pack_sequence_and_type, ParsedInternalKey, ValueType};
    use crate::common::{FileSystem, InMemFileSystem, InternalKeyComparator};
    use crate::compaction::test_util::make_table;
    use crate::compaction::CompactionInput;
    use crate::options::ColumnFamilyOptions;
    use crate::table::SortedRunTableFactory;
    use crate::version::{TableFile, Version};
    use std::sync::Mutex;
    use tokio::runtime::Runtime;
    use yatp::Builder as PoolBuilder;

    fn make_version(tables: Vec<Arc<TableFile>>) -> Arc<Version> {
        Arc::new(Version::new(
            0,
            "default".to_string(),
            "leveldb.BytewiseComparator".to_string(),
            tables,
            0,
            7,
        ))
    }

    #[test]
    fn test_subcompaction_boundaries() {
        let tables = vec![
            make_table(1, 0, b"a", b"d", 100),
            make_table(2, 0, b"c", b"f", 100),
            make_table(3, 1, b"a", b"c", 100),
            make_table(4, 1, b"d", b"f", 100),
            make_table(5, 1, b"g", b"k", 100),
        ];
        let version = make_version(tables.clone());
        let compaction = Compaction {
            cf_id: 0,
            cf_options: Arc::new(ColumnFamilyOptions::default()),
            inputs: vec![
                CompactionInput {
                    level: 0,
                    tables: tables[..2].to_vec(),
                },
                CompactionInput {
                    level: 1,
                    tables: tables[2..].to_vec(),
                },
            ],
            output_level: 1,
            bottommost_level: true,
            max_output_file_size: 100,
            max_grandparent_overlap_bytes: 1000,
            grandparents: vec![],
            input_version: version,
            cf_dropped: Arc::new(AtomicBool::new(false)),
        };
        let options = ImmutableDBOptions {
            max_subcompactions: 4,
            ..Default::default()
        };
        let ranges = gen_subcompaction_boundaries(&compaction, &options);
        assert_eq!(ranges.len(), 3);
        assert!(ranges[0].0.is_none());
        assert!(ranges.last().unwrap().1.is_none());
        for w in ranges.windows(2) {
            assert_eq!(w[0].1, w[1].0);
        }
    }

    #[derive(Clone)]
    struct CaptureEngine {
        edits: Arc<Mutex<Vec<VersionEdit>>>,
    }

    #[async_trait::async_trait]
    impl CompactionEngine for CaptureEngine {
        async fn apply(&mut self, edits: Vec<VersionEdit>) -> Result<()> {
            self.edits.lock().unwrap().extend(edits);
            Ok(())
        }
    }

    fn build_table(
        fs: &Arc<InMemFileSystem>,
        file_number: u64,
        level: u32,
        entries: &[(&[u8], u64, ValueType, &[u8])],
    ) -> Arc<TableFile> {
        let r = Runtime::new().unwrap();
        let comparator = InternalKeyComparator::default();
        let factory = SortedRunTableFactory::default();
        let path = make_table_file_name("db", file_number);
        let file = fs.open_writable_file_writer(path.clone()).unwrap();
        let opts = TableBuilderOptions {
            internal_comparator: comparator.clone(),
            ..Default::default()
        };
        let mut builder = factory.new_builder(&opts, file).unwrap();
        let mut meta = FileMetaData::new(file_number, level, vec![], vec![]);
        for (user_key, seq, tp, value) in entries {
            let mut key = user_key.to_vec();
            key.extend_from_slice(&pack_sequence_and_type(*seq, *tp).to_le_bytes());
            builder.add(&key, value).unwrap();
            meta.update_boundary(&key, *seq);
        }
        r.block_on(builder.finish()).unwrap();
        meta.fd.file_size = builder.file_size();
        meta.num_entries = builder.num_entries();
        meta.num_deletions = builder.num_deletions();
        let file = fs.open_random_access_file(path.clone()).unwrap();
        let read_opts = TableReaderOptions {
            file_size: meta.fd.file_size as usize,
            level,
            internal_comparator: comparator,
        };
        let reader = r.block_on(factory.open_reader(&read_opts, file)).unwrap();
        Arc::new(TableFile::new(meta, reader, fs.clone(), path))
    }

    fn two_level_compaction(fs: &Arc<InMemFileSystem>) -> Compaction {
        let l0 = build_table(
            fs,
            1,
            0,
            &[
                (b"k02", 20, ValueType::TypeValue, b"new"),
                (b"k04", 21, ValueType::TypeDeletion, b""),
            ],
        );
        let l1a = build_table(
            fs,
            2,
            1,
            &[
                (b"k01", 5, ValueType::TypeValue, b"old1"),
                (b"k02", 6, ValueType::TypeValue, b"old2"),
            ],
        );
        let l1b = build_table(
            fs,
            3,
            1,
            &[
                (b"k04", 7, ValueType::TypeValue, b"old4"),
                (b"k05", 8, ValueType::TypeValue, b"old5"),
            ],
        );
        let version = make_version(vec![l0.clone(), l1a.clone(), l1b.clone()]);
        Compaction {
            cf_id: 0,
            cf_options: Arc::new(ColumnFamilyOptions::default()),
            inputs: vec![
                CompactionInput {
                    level: 0,
                    tables: vec![l0],
                },
                CompactionInput {
                    level: 1,
                    tables: vec![l1a, l1b],
                },
            ],
            output_level: 1,
            bottommost_level: true,
            max_output_file_size: 64 << 20,
            max_grandparent_overlap_bytes: 640 << 20,
            grandparents: vec![],
            input_version: version,
            cf_dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn test_compact_two_levels() {
        let fs = Arc::new(InMemFileSystem::default());
        let options = Arc::new(ImmutableDBOptions {
            fs: fs.clone(),
            paranoid_file_checks: true,
            ..Default::default()
        });
        let compaction = two_level_compaction(&fs);
        let factory = compaction.cf_options.factory.clone();
        let comparator = compaction.cf_options.comparator.clone();
        let kernel = Arc::new(KernelNumberContext::default());
        kernel.mark_file_number_used(9);
        let engine = CaptureEngine {
            edits: Arc::new(Mutex::new(vec![])),
        };
        let pool = PoolBuilder::new("compaction-test")
            .max_thread_count(2)
            .build_multilevel_future_pool();
        let r = Runtime::new().unwrap();
        r.block_on(run_compaction_job(
            engine.clone(),
            compaction,
            kernel,
            options.clone(),
            &pool,
            vec![],
            Arc::default(),
            Arc::new(AtomicBool::new(false)),
        ))
        .unwrap();

        let edits = engine.edits.lock().unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].deleted_files.len(), 3);
        assert_eq!(edits[0].add_files.len(), 1);
        let meta = &edits[0].add_files[0];
        assert_eq!(meta.level, 1);
        assert_eq!(meta.num_entries, 3);

        let file = fs
            .open_random_access_file(make_table_file_name("db", meta.id()))
            .unwrap();
        let read_opts = TableReaderOptions {
            file_size: meta.fd.file_size as usize,
            level: 1,
            internal_comparator: comparator,
        };
        let reader = r.block_on(factory.open_reader(&read_opts, file)).unwrap();
        let mut iter = reader.new_iterator();
        let got = r.block_on(async move {
            let mut got = vec![];
            iter.seek_to_first().await;
            while iter.valid() {
                let parsed = ParsedInternalKey::parse(iter.key()).unwrap();
                got.push((
                    parsed.user_key.to_vec(),
                    parsed.sequence,
                    iter.value().to_vec(),
                ));
                iter.next().await;
            }
            got
        });
        // The tombstone for k04 and everything it shadowed is gone, and
        // surviving sequences are zeroed at the bottommost level.
        assert_eq!(
            got,
            vec![
                (b"k01".to_vec(), 0, b"old1".to_vec()),
                (b"k02".to_vec(), 0, b"new".to_vec()),
                (b"k05".to_vec(), 0, b"old5".to_vec()),
            ]
        );
    }

    #[test]
    fn test_shutdown_cancels_compaction() {
        let fs = Arc::new(InMemFileSystem::default());
        let options = Arc::new(ImmutableDBOptions {
            fs: fs.clone(),
            ..Default::default()
        });
        let compaction = two_level_compaction(&fs);
        let kernel = Arc::new(KernelNumberContext::default());
        kernel.mark_file_number_used(9);
        let engine = CaptureEngine {
            edits: Arc::new(Mutex::new(vec![])),
        };
        let pool = PoolBuilder::new("compaction-test")
            .max_thread_count(2)
            .build_multilevel_future_pool();
        let r = Runtime::new().unwrap();
        let err = r
            .block_on(run_compaction_job(
                engine.clone(),
                compaction,
                kernel,
                options,
                &pool,
                vec![],
                Arc::default(),
                Arc::new(AtomicBool::new(true)),
            ))
            .unwrap_err();
        assert!(err.is_cancel());
        assert!(engine.edits.lock().unwrap().is_empty());
        // No output file leaks into the directory.
        let files = fs.list_files("db".into()).unwrap();
        assert_eq!(files.len(), 3);
    }
}
