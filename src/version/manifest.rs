use crate::common::{
    make_current_file, make_descriptor_file_name, make_table_file_name, parse_file_name, DBFile,
    Error, FileSystem, KeyComparator, Result,
};
use crate::compaction::CompactionEngine;
use crate::log::{LogReader, LogWriter};
use crate::options::{ColumnFamilyDescriptor, ColumnFamilyOptions, ImmutableDBOptions};
use crate::table::TableReaderOptions;
use crate::version::{
    FileMetaData, KernelNumberContext, TableFile, Version, VersionEdit, VersionSet,
};
use async_trait::async_trait;
use fail::fail_point;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::channel::oneshot::{channel as once_chan, Sender as OnceSender};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use yatp::task::future::TaskCell;
use yatp::ThreadPool;

const MAX_BATCH_SIZE: usize = 8;

/// Owner of the manifest log. All version edits funnel through one
/// instance, so the descriptor file has a single writer: append and sync
/// the records first, then install the change in memory under the version
/// set lock. Table readers for new files are opened before taking the
/// lock, which is never held across an await.
pub struct Manifest {
    log: Option<Box<LogWriter>>,
    version_set: Arc<Mutex<VersionSet>>,
    kernel: Arc<KernelNumberContext>,
    options: Arc<ImmutableDBOptions>,
    cf_options: HashMap<String, ColumnFamilyOptions>,
    manifest_file_number: u64,
}

struct RecoveredColumnFamily {
    name: String,
    comparator: String,
    log_number: u64,
    files: HashMap<u64, FileMetaData>,
}

impl Manifest {
    /// Rebuilds the version set from the manifest referenced by CURRENT,
    /// or starts fresh when no CURRENT file exists. Always ends by writing
    /// a new compacted manifest and pointing CURRENT at it.
    pub async fn recover(
        cfs: &[ColumnFamilyDescriptor],
        options: &Arc<ImmutableDBOptions>,
    ) -> Result<Self> {
        let kernel = Arc::new(KernelNumberContext::default());
        let fs = options.fs.clone();
        let mut cf_options: HashMap<String, ColumnFamilyOptions> = HashMap::default();
        for cf in cfs {
            cf_options.insert(cf.name.clone(), cf.options.clone());
        }
        let current = make_current_file(&options.db_path);
        let mut versions: HashMap<u32, Arc<Version>> = HashMap::default();
        if fs.file_exist(&current)? {
            let content = fs.read_file_content(current)?;
            let manifest_name = String::from_utf8(content)
                .map_err(|_| Error::Corruption("CURRENT is not valid utf8".to_string()))?;
            let manifest_name = manifest_name.trim_end().to_string();
            match parse_file_name(&manifest_name)? {
                DBFile::Descriptor(n) => kernel.mark_file_number_used(n),
                _ => {
                    return Err(Error::Corruption(format!(
                        "CURRENT points to {} which is not a manifest",
                        manifest_name
                    )))
                }
            }
            let manifest_path = PathBuf::from(format!("{}/{}", options.db_path, manifest_name));
            let reader = fs.open_sequential_file(manifest_path)?;
            let mut log_reader = LogReader::new(reader);
            let mut record = vec![];
            let mut states: HashMap<u32, RecoveredColumnFamily> = HashMap::default();
            while log_reader.read_record(&mut record).await? {
                let mut edit = VersionEdit::default();
                edit.decode_from(&record)?;
                let cf_id = edit.column_family;
                if edit.is_column_family_drop {
                    states.remove(&cf_id);
                } else {
                    if edit.is_column_family_add {
                        states.insert(
                            cf_id,
                            RecoveredColumnFamily {
                                name: edit.column_family_name.clone(),
                                comparator: String::new(),
                                log_number: 0,
                                files: HashMap::default(),
                            },
                        );
                    }
                    let touches_cf = edit.has_comparator
                        || edit.has_log_number
                        || !edit.add_files.is_empty()
                        || !edit.deleted_files.is_empty();
                    if touches_cf {
                        let state = states.get_mut(&cf_id).ok_or_else(|| {
                            Error::Corruption(format!(
                                "manifest edit references unknown column family {}",
                                cf_id
                            ))
                        })?;
                        if edit.has_comparator {
                            state.comparator = edit.comparator_name.clone();
                        }
                        if edit.has_log_number {
                            state.log_number = edit.log_number;
                        }
                        for f in &edit.deleted_files {
                            if state.files.remove(&f.id()).is_none() {
                                return Err(Error::Corruption(format!(
                                    "manifest deletes file {} which was never added",
                                    f.id()
                                )));
                            }
                        }
                        for f in edit.add_files {
                            kernel.mark_file_number_used(f.id());
                            state.files.insert(f.id(), f);
                        }
                    }
                }
                if edit.has_next_file_number {
                    kernel.mark_file_number_used(edit.next_file_number);
                }
                if edit.has_last_sequence {
                    kernel.set_last_sequence(edit.last_sequence);
                }
                if edit.has_max_column_family {
                    kernel.set_max_column_family(edit.max_column_family);
                }
            }
            for (cf_id, state) in states {
                let opts = cf_options.get(&state.name).cloned().unwrap_or_default();
                let mut tables = vec![];
                for (_, meta) in state.files {
                    let path = make_table_file_name(&options.db_path, meta.id());
                    let file = fs.open_random_access_file(path.clone())?;
                    let read_opts = TableReaderOptions {
                        file_size: meta.fd.file_size as usize,
                        level: meta.level,
                        internal_comparator: opts.comparator.clone(),
                    };
                    let reader = opts.factory.open_reader(&read_opts, file).await?;
                    tables.push(Arc::new(TableFile::new(meta, reader, fs.clone(), path)));
                }
                versions.insert(
                    cf_id,
                    Arc::new(Version::new(
                        cf_id,
                        state.name,
                        state.comparator,
                        tables,
                        state.log_number,
                        opts.max_level,
                    )),
                );
            }
        } else {
            for (i, desc) in cfs.iter().enumerate() {
                versions.insert(
                    i as u32,
                    Arc::new(Version::new(
                        i as u32,
                        desc.name.clone(),
                        desc.options.comparator.name().to_string(),
                        vec![],
                        0,
                        desc.options.max_level,
                    )),
                );
            }
            kernel.set_max_column_family(cfs.len().saturating_sub(1) as u32);
        }
        let version_set = Arc::new(Mutex::new(VersionSet::new(
            cfs,
            kernel.clone(),
            options.clone(),
            versions,
        )));
        let mut manifest = Manifest {
            log: None,
            version_set,
            kernel,
            options: options.clone(),
            cf_options,
            manifest_file_number: 0,
        };
        manifest.roll_manifest().await?;
        Ok(manifest)
    }

    pub fn get_version_set(&self) -> Arc<Mutex<VersionSet>> {
        self.version_set.clone()
    }

    pub fn get_kernel(&self) -> Arc<KernelNumberContext> {
        self.kernel.clone()
    }

    /// Appends the edits to the manifest log, syncs, and only then applies
    /// them to the in-memory version set. Edits are checked against the
    /// current version first; a rejected edit never reaches the log, so the
    /// manifest on disk always describes a reachable state.
    pub async fn process_manifest_writes(&mut self, mut edits: Vec<VersionEdit>) -> Result<()> {
        {
            let vs = self.version_set.lock().unwrap();
            vs.background_error()?;
        }
        self.verify_edits(&edits)?;
        if self.log.is_none()
            || self.log.as_ref().unwrap().get_file_size() > self.options.max_manifest_file_size
        {
            self.roll_manifest().await?;
        }
        if let Some(first) = edits.first_mut() {
            first.set_next_file(self.kernel.current_next_file_number());
            first.set_last_sequence(self.kernel.last_sequence());
        }
        let log = self.log.as_mut().unwrap();
        for e in &edits {
            let mut record = vec![];
            if !e.encode_to(&mut record) {
                return Err(Error::Other("failed to encode version edit".to_string()));
            }
            log.add_record(&record).await?;
        }
        self.sync_log().await?;
        self.apply_edits(edits).await
    }

    /// Every deleted file must be live in the current version of its column
    /// family, or added by an earlier edit of the same batch.
    fn verify_edits(&self, edits: &[VersionEdit]) -> Result<()> {
        let vs = self.version_set.lock().unwrap();
        let mut batch_added: HashSet<(u32, u32, u64)> = HashSet::default();
        let mut batch_deleted: HashSet<(u32, u32, u64)> = HashSet::default();
        for edit in edits {
            if edit.is_column_family_add || edit.is_column_family_drop {
                continue;
            }
            let cf_id = edit.column_family;
            let version = match vs.get_column_family(cf_id) {
                Some(cf) => cf.get_version(),
                None => {
                    return Err(Error::Cancel(format!(
                        "column family {} has been dropped",
                        cf_id
                    )))
                }
            };
            let info = version.get_storage_info();
            for f in &edit.deleted_files {
                if !batch_deleted.insert((cf_id, f.level, f.id())) {
                    return Err(Error::Corruption(format!(
                        "version edit deletes file {} at level {} twice",
                        f.id(),
                        f.level
                    )));
                }
                if batch_added.remove(&(cf_id, f.level, f.id())) {
                    continue;
                }
                let live = (f.level as usize) < info.size()
                    && info
                        .level_tables(f.level as usize)
                        .iter()
                        .any(|t| t.id() == f.id());
                if !live {
                    return Err(Error::Corruption(format!(
                        "version edit deletes file {} which is not live at level {}",
                        f.id(),
                        f.level
                    )));
                }
            }
            for f in &edit.add_files {
                batch_added.insert((cf_id, f.level, f.id()));
            }
        }
        Ok(())
    }

    async fn sync_log(&mut self) -> Result<()> {
        fail_point!("manifest::commit", |_| Err(Error::Other(
            "injected manifest sync error".to_string()
        )));
        self.log.as_mut().unwrap().fsync().await
    }

    async fn apply_edits(&mut self, edits: Vec<VersionEdit>) -> Result<()> {
        let mut groups: HashMap<u32, Vec<VersionEdit>> = HashMap::default();
        for edit in edits {
            if edit.is_column_family_add {
                let opts = self
                    .cf_options
                    .get(&edit.column_family_name)
                    .cloned()
                    .unwrap_or_default();
                let mut vs = self.version_set.lock().unwrap();
                vs.create_column_family(&edit, opts)?;
            } else if edit.is_column_family_drop {
                let mut vs = self.version_set.lock().unwrap();
                vs.drop_column_family(edit.column_family)?;
            } else {
                groups.entry(edit.column_family).or_default().push(edit);
            }
        }
        for (cf_id, group) in groups {
            let cache = {
                let vs = self.version_set.lock().unwrap();
                match vs.get_column_family(cf_id) {
                    Some(cf) => cf.get_table_cache(),
                    // Dropped while the edit was in flight.
                    None => {
                        return Err(Error::Cancel(format!(
                            "column family {} has been dropped",
                            cf_id
                        )))
                    }
                }
            };
            let mut tables = vec![];
            let mut mems_deleted = vec![];
            let mut to_delete = vec![];
            let mut log_number = 0;
            for edit in &group {
                log_number = std::cmp::max(log_number, edit.log_number);
                mems_deleted.extend_from_slice(&edit.mems_deleted);
                for f in &edit.deleted_files {
                    to_delete.push((f.level, f.id()));
                }
                for m in &edit.add_files {
                    let reader = cache.get_table_reader(m).await?;
                    let path = make_table_file_name(&self.options.db_path, m.id());
                    tables.push(Arc::new(TableFile::new(
                        m.clone(),
                        reader,
                        self.options.fs.clone(),
                        path,
                    )));
                }
            }
            let mut vs = self.version_set.lock().unwrap();
            match vs.install_version(cf_id, &mems_deleted, tables, &to_delete, log_number) {
                Ok(_) => {
                    for (_, file_number) in &to_delete {
                        cache.evict(*file_number);
                    }
                }
                Err(e) => {
                    if e.is_corruption() || e.is_io() {
                        vs.record_background_error(e.clone());
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Starts a new manifest file containing a full snapshot of the current
    /// state and points CURRENT at it.
    async fn roll_manifest(&mut self) -> Result<()> {
        let file_number = self.kernel.new_file_number();
        let path = make_descriptor_file_name(&self.options.db_path, file_number);
        let writer = self.options.fs.open_writable_file_writer(path)?;
        let mut log = Box::new(LogWriter::new(writer, file_number));
        self.write_snapshot(&mut log).await?;
        log.fsync().await?;
        set_current_file(&self.options.fs, &self.options.db_path, file_number).await?;
        if self.log.take().is_some() {
            let old = make_descriptor_file_name(&self.options.db_path, self.manifest_file_number);
            let _ = self.options.fs.remove(old);
        }
        self.log = Some(log);
        self.manifest_file_number = file_number;
        Ok(())
    }

    async fn write_snapshot(&self, log: &mut LogWriter) -> Result<()> {
        let versions = {
            let vs = self.version_set.lock().unwrap();
            vs.get_column_family_versions()
        };
        for version in versions {
            let mut edit = VersionEdit::default();
            edit.column_family = version.get_cf_id();
            edit.add_column_family(version.get_cf_name().to_string());
            edit.set_comparator_name(version.get_comparator_name());
            edit.set_log_number(version.get_log_number());
            for level in 0..version.get_level_num() {
                version.scan(|t| edit.add_file_meta(t.meta.clone()), level);
            }
            let mut record = vec![];
            edit.encode_to(&mut record);
            log.add_record(&record).await?;
        }
        let mut edit = VersionEdit::default();
        edit.set_next_file(self.kernel.current_next_file_number());
        edit.set_last_sequence(self.kernel.last_sequence());
        edit.set_max_column_family(self.kernel.get_max_column_family());
        let mut record = vec![];
        edit.encode_to(&mut record);
        log.add_record(&record).await?;
        Ok(())
    }
}

async fn set_current_file(
    fs: &Arc<dyn FileSystem>,
    db_path: &str,
    manifest_file_number: u64,
) -> Result<()> {
    let tmp = PathBuf::from(format!("{}/CURRENT.{}.tmp", db_path, manifest_file_number));
    let mut writer = fs.open_writable_file_writer(tmp.clone())?;
    writer
        .append(format!("MANIFEST-{:06}\n", manifest_file_number).as_bytes())
        .await?;
    writer.sync().await?;
    fs.rename(tmp, make_current_file(db_path))
}

pub struct ManifestTask {
    pub edits: Vec<VersionEdit>,
    pub cb: OnceSender<Result<()>>,
}

/// Cheap handle that forwards edits to the manifest writer task and waits
/// for the commit result.
#[derive(Clone)]
pub struct ManifestScheduler {
    sender: UnboundedSender<ManifestTask>,
}

#[async_trait]
impl CompactionEngine for ManifestScheduler {
    async fn apply(&mut self, edits: Vec<VersionEdit>) -> Result<()> {
        let (cb, rx) = once_chan();
        let task = ManifestTask { edits, cb };
        self.sender
            .unbounded_send(task)
            .map_err(|e| Error::Cancel(format!("manifest writer may be closed, {:?}", e)))?;
        rx.await
            .map_err(|e| Error::Cancel(format!("manifest writer dropped the task, {:?}", e)))?
    }
}

async fn run_manifest_job(mut rx: UnboundedReceiver<ManifestTask>, mut manifest: Box<Manifest>) {
    while let Some(task) = rx.next().await {
        let mut edits = task.edits;
        let mut cbs = vec![task.cb];
        // Batch whatever else is already queued into one commit.
        while cbs.len() < MAX_BATCH_SIZE {
            match rx.try_next() {
                Ok(Some(task)) => {
                    edits.extend(task.edits);
                    cbs.push(task.cb);
                }
                _ => break,
            }
        }
        let r = manifest.process_manifest_writes(edits).await;
        for cb in cbs {
            let _ = cb.send(r.clone());
        }
    }
}

pub fn start_manifest_job(
    pool: &ThreadPool<TaskCell>,
    manifest: Box<Manifest>,
) -> Result<ManifestScheduler> {
    let (tx, rx) = unbounded();
    pool.spawn(run_manifest_job(rx, manifest));
    Ok(ManifestScheduler { sender: tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::format::{pack_sequence_and_type, ValueType};
    use crate::common::{FileSystem, InMemFileSystem, InternalKeyComparator};
    use crate::options::ColumnFamilyDescriptor;
    use crate::table::{TableBuilderOptions, TableFactory};
    use tokio::runtime::Runtime;

    fn test_options(fs: Arc<InMemFileSystem>) -> Arc<ImmutableDBOptions> {
        Arc::new(ImmutableDBOptions {
            db_path: "db".to_string(),
            fs,
            ..Default::default()
        })
    }

    fn build_table(fs: &InMemFileSystem, file_number: u64, keys: &[(&[u8], u64)]) -> FileMetaData {
        let r = Runtime::new().unwrap();
        let comparator = InternalKeyComparator::default();
        let factory = crate::table::SortedRunTableFactory::default();
        let path = make_table_file_name("db", file_number);
        let file = fs.open_writable_file_writer(path).unwrap();
        let opts = TableBuilderOptions {
            internal_comparator: comparator,
            ..Default::default()
        };
        let mut builder = factory.new_builder(&opts, file).unwrap();
        let mut meta = FileMetaData::new(file_number, 0, vec![], vec![]);
        for (user_key, seq) in keys {
            let mut key = user_key.to_vec();
            key.extend_from_slice(
                &pack_sequence_and_type(*seq, ValueType::TypeValue).to_le_bytes(),
            );
            builder.add(&key, b"value").unwrap();
            meta.update_boundary(&key, *seq);
        }
        r.block_on(builder.finish()).unwrap();
        meta.fd.file_size = builder.file_size();
        meta.num_entries = builder.num_entries();
        meta
    }

    #[test]
    fn test_manifest_recover_round_trip() {
        let fs = Arc::new(InMemFileSystem::default());
        let options = test_options(fs.clone());
        let cfs = vec![ColumnFamilyDescriptor::default()];
        let r = Runtime::new().unwrap();

        let mut manifest = r.block_on(Manifest::recover(&cfs, &options)).unwrap();
        let kernel = manifest.get_kernel();
        let file_number = kernel.new_file_number();
        let meta = build_table(&fs, file_number, &[(b"aaa", 1), (b"bbb", 2)]);

        let mut edit = VersionEdit::default();
        edit.column_family = 0;
        edit.set_log_number(3);
        edit.add_file_meta(meta);
        kernel.set_last_sequence(2);
        r.block_on(manifest.process_manifest_writes(vec![edit]))
            .unwrap();
        {
            let vs = manifest.get_version_set();
            let vs = vs.lock().unwrap();
            let version = vs.get_column_family(0).unwrap().get_version();
            assert_eq!(version.get_storage_info().get_level0_file_num(), 1);
        }
        drop(manifest);

        // A second recovery must see the installed file and the counters.
        let manifest = r.block_on(Manifest::recover(&cfs, &options)).unwrap();
        let kernel = manifest.get_kernel();
        assert_eq!(kernel.last_sequence(), 2);
        assert!(kernel.current_next_file_number() > file_number);
        let vs = manifest.get_version_set();
        let vs = vs.lock().unwrap();
        let version = vs.get_column_family(0).unwrap().get_version();
        assert_eq!(version.get_storage_info().get_level0_file_num(), 1);
        assert_eq!(
            version.get_storage_info().level_tables(0)[0].id(),
            file_number
        );
    }

    #[test]
    fn test_rejected_edit_never_reaches_the_log() {
        let fs = Arc::new(InMemFileSystem::default());
        let options = test_options(fs.clone());
        let cfs = vec![ColumnFamilyDescriptor::default()];
        let r = Runtime::new().unwrap();
        let mut manifest = r.block_on(Manifest::recover(&cfs, &options)).unwrap();

        // Deleting a file nothing ever added must fail before the record is
        // appended, so the manifest stays recoverable.
        let mut edit = VersionEdit::default();
        edit.column_family = 0;
        edit.delete_file(1, 42);
        let e = r
            .block_on(manifest.process_manifest_writes(vec![edit]))
            .unwrap_err();
        assert!(e.is_corruption());
        {
            let vs = manifest.get_version_set();
            let vs = vs.lock().unwrap();
            assert!(vs.background_error().is_ok());
        }

        // The writer keeps accepting valid edits.
        let kernel = manifest.get_kernel();
        let file_number = kernel.new_file_number();
        let meta = build_table(&fs, file_number, &[(b"aaa", 1)]);
        let mut edit = VersionEdit::default();
        edit.column_family = 0;
        edit.add_file_meta(meta);
        r.block_on(manifest.process_manifest_writes(vec![edit]))
            .unwrap();
        drop(manifest);

        let manifest = r.block_on(Manifest::recover(&cfs, &options)).unwrap();
        let vs = manifest.get_version_set();
        let vs = vs.lock().unwrap();
        let version = vs.get_column_family(0).unwrap().get_version();
        assert_eq!(version.get_storage_info().get_level0_file_num(), 1);
    }
}
