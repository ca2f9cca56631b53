use crate::common::{Error, KeyComparator, Result, MAX_SEQUENCE_NUMBER};
use crate::memtable::{Memtable, MemtableList};
use crate::options::{ColumnFamilyDescriptor, ColumnFamilyOptions, ImmutableDBOptions};
use crate::table::TableCache;
use crate::version::{Snapshot, SnapshotList, TableFile, Version, VersionEdit};
use std::collections::HashMap;
use std::sync::atomic::{self, AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide counters shared by writers, flush jobs and compactions.
#[derive(Default)]
pub struct KernelNumberContext {
    next_file_number: atomic::AtomicU64,
    next_mem_number: atomic::AtomicU64,
    last_sequence: atomic::AtomicU64,
    max_column_family: atomic::AtomicU32,
}

impl KernelNumberContext {
    pub fn current_next_file_number(&self) -> u64 {
        self.next_file_number.load(Ordering::Acquire)
    }

    pub fn new_file_number(&self) -> u64 {
        self.next_file_number.fetch_add(1, Ordering::SeqCst)
    }

    pub fn new_memtable_number(&self) -> u64 {
        self.next_mem_number.fetch_add(1, Ordering::SeqCst)
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Acquire)
    }

    pub fn new_sequence(&self) -> u64 {
        self.last_sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn fetch_add_file_number(&self, n: u64) -> u64 {
        self.next_file_number.fetch_add(n, Ordering::SeqCst)
    }

    pub fn set_last_sequence(&self, v: u64) {
        self.last_sequence.store(v, Ordering::Release);
    }

    pub fn set_max_column_family(&self, v: u32) {
        self.max_column_family.store(v, Ordering::Release);
    }

    pub fn get_max_column_family(&self) -> u32 {
        self.max_column_family.load(Ordering::Acquire)
    }

    pub fn next_column_family_id(&self) -> u32 {
        self.max_column_family.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Bumps the file number allocator past a number observed in the
    /// manifest during recovery.
    pub fn mark_file_number_used(&self, v: u64) {
        let mut old = self.next_file_number.load(Ordering::Acquire);
        while old <= v {
            match self.next_file_number.compare_exchange(
                old,
                v + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(x) => old = x,
            }
        }
    }
}

/// Mutable state of one column family: the active memtable, the flush
/// queue and the current file version.
pub struct ColumnFamilyData {
    id: u32,
    name: String,
    options: Arc<ColumnFamilyOptions>,
    mem: Arc<Memtable>,
    imms: MemtableList,
    version: Arc<Version>,
    log_number: u64,
    dropped: Arc<AtomicBool>,
    table_cache: Arc<TableCache>,
}

impl ColumnFamilyData {
    fn new(
        id: u32,
        name: String,
        mem: Arc<Memtable>,
        version: Arc<Version>,
        options: ColumnFamilyOptions,
        db_options: &Arc<ImmutableDBOptions>,
    ) -> Self {
        let table_cache = Arc::new(TableCache::new(
            db_options.clone(),
            options.factory.clone(),
            options.comparator.clone(),
            options.table_cache_capacity,
        ));
        Self {
            id,
            name,
            options: Arc::new(options),
            mem,
            imms: MemtableList::default(),
            version,
            log_number: 0,
            dropped: Arc::new(AtomicBool::new(false)),
            table_cache,
        }
    }

    pub fn get_id(&self) -> u32 {
        self.id
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_options(&self) -> Arc<ColumnFamilyOptions> {
        self.options.clone()
    }

    pub fn get_version(&self) -> Arc<Version> {
        self.version.clone()
    }

    pub fn get_memtable(&self) -> Arc<Memtable> {
        self.mem.clone()
    }

    pub fn get_table_cache(&self) -> Arc<TableCache> {
        self.table_cache.clone()
    }

    pub fn get_log_number(&self) -> u64 {
        self.log_number
    }

    pub fn set_log_number(&mut self, log_number: u64) {
        self.log_number = log_number;
    }

    pub fn dropped_flag(&self) -> Arc<AtomicBool> {
        self.dropped.clone()
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    pub fn should_flush(&self) -> bool {
        !self.is_dropped() && self.mem.should_flush()
    }

    pub fn immutable_memtables(&mut self) -> &mut MemtableList {
        &mut self.imms
    }

    fn install_version(
        &mut self,
        mems_deleted: &[u64],
        to_add: Vec<Arc<TableFile>>,
        to_delete: &[(u32, u64)],
        log_number: u64,
    ) -> Result<Arc<Version>> {
        let version = Arc::new(self.version.apply(to_add, to_delete, log_number)?);
        self.version = version.clone();
        if !mems_deleted.is_empty() {
            self.imms.remove_flushed(mems_deleted);
        }
        Ok(version)
    }
}

pub struct VersionSet {
    kernel: Arc<KernelNumberContext>,
    options: Arc<ImmutableDBOptions>,
    column_family_set: HashMap<u32, ColumnFamilyData>,
    column_family_names: HashMap<String, u32>,
    snapshots: SnapshotList,
    background_error: Option<Error>,
}

impl VersionSet {
    pub fn new(
        cf_descriptor: &[ColumnFamilyDescriptor],
        kernel: Arc<KernelNumberContext>,
        options: Arc<ImmutableDBOptions>,
        versions: HashMap<u32, Arc<Version>>,
    ) -> Self {
        let mut cf_options: HashMap<String, ColumnFamilyOptions> = HashMap::default();
        for cf in cf_descriptor.iter() {
            cf_options.insert(cf.name.clone(), cf.options.clone());
        }
        let mut column_family_set = HashMap::default();
        let mut column_family_names = HashMap::default();
        for (cf_id, version) in versions {
            let cf_opt = cf_options
                .remove(version.get_cf_name())
                .unwrap_or_default();
            let log_number = version.get_log_number();
            column_family_names.insert(version.get_cf_name().to_string(), cf_id);
            let mem = Arc::new(Memtable::new(
                kernel.new_memtable_number(),
                cf_opt.write_buffer_size,
                cf_opt.comparator.clone(),
                MAX_SEQUENCE_NUMBER,
            ));
            let mut cf = ColumnFamilyData::new(
                cf_id,
                version.get_cf_name().to_string(),
                mem,
                version,
                cf_opt,
                &options,
            );
            cf.set_log_number(log_number);
            column_family_set.insert(cf_id, cf);
        }
        VersionSet {
            kernel,
            options,
            column_family_set,
            column_family_names,
            snapshots: SnapshotList::default(),
            background_error: None,
        }
    }

    /// Pins the current last sequence. Compactions keep every record a live
    /// snapshot can see.
    pub fn new_snapshot(&mut self) -> Arc<Snapshot> {
        self.snapshots.new_snapshot(self.kernel.last_sequence())
    }

    pub fn release_snapshot(&mut self, s: Arc<Snapshot>) {
        self.snapshots.release_snapshot(s);
    }

    /// Pinned sequences in ascending order, for the visibility stripes of a
    /// flush or compaction started now.
    pub fn snapshot_sequences(&self) -> Vec<u64> {
        let mut seqs = vec![];
        self.snapshots.collect_snapshots(&mut seqs);
        seqs
    }

    pub fn get_kernel(&self) -> Arc<KernelNumberContext> {
        self.kernel.clone()
    }

    pub fn get_options(&self) -> Arc<ImmutableDBOptions> {
        self.options.clone()
    }

    pub fn new_file_number(&self) -> u64 {
        self.kernel.new_file_number()
    }

    pub fn get_column_family(&self, cf_id: u32) -> Option<&ColumnFamilyData> {
        self.column_family_set.get(&cf_id)
    }

    pub fn mut_column_family(&mut self, cf_id: u32) -> Option<&mut ColumnFamilyData> {
        self.column_family_set.get_mut(&cf_id)
    }

    pub fn get_column_family_by_name(&self, name: &str) -> Option<&ColumnFamilyData> {
        self.column_family_names
            .get(name)
            .and_then(|id| self.column_family_set.get(id))
    }

    pub fn column_family_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.column_family_set.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn should_flush(&self) -> bool {
        self.column_family_set.values().any(|cf| cf.should_flush())
    }

    pub fn get_column_family_versions(&self) -> Vec<Arc<Version>> {
        self.column_family_set
            .values()
            .map(|cf| cf.get_version())
            .collect()
    }

    /// Freezes the active memtable of a column family and installs a fresh
    /// one. The frozen memtable joins the flush queue.
    pub fn switch_memtable(&mut self, cf_id: u32, earliest_seq: u64) -> Option<Arc<Memtable>> {
        let kernel = self.kernel.clone();
        let cf = self.column_family_set.get_mut(&cf_id)?;
        let new_mem = Arc::new(Memtable::new(
            kernel.new_memtable_number(),
            cf.options.write_buffer_size,
            cf.options.comparator.clone(),
            earliest_seq,
        ));
        let old = std::mem::replace(&mut cf.mem, new_mem);
        cf.imms.add(old.clone());
        Some(old)
    }

    pub fn create_column_family(
        &mut self,
        edit: &VersionEdit,
        options: ColumnFamilyOptions,
    ) -> Result<Arc<Version>> {
        let id = edit.column_family;
        let name = edit.column_family_name.clone();
        if self.column_family_names.contains_key(&name) {
            return Err(Error::Config(format!(
                "column family {} already exists",
                name
            )));
        }
        let mem = Arc::new(Memtable::new(
            self.kernel.new_memtable_number(),
            options.write_buffer_size,
            options.comparator.clone(),
            self.kernel.last_sequence(),
        ));
        let version = Arc::new(Version::new(
            id,
            name.clone(),
            options.comparator.name().to_string(),
            vec![],
            edit.log_number,
            options.max_level,
        ));
        let mut cf = ColumnFamilyData::new(id, name.clone(), mem, version.clone(), options, &self.options);
        cf.set_log_number(edit.log_number);
        self.column_family_set.insert(id, cf);
        self.column_family_names.insert(name, id);
        if id > self.kernel.get_max_column_family() {
            self.kernel.set_max_column_family(id);
        }
        Ok(version)
    }

    pub fn drop_column_family(&mut self, cf_id: u32) -> Result<()> {
        match self.column_family_set.remove(&cf_id) {
            Some(cf) => {
                cf.dropped.store(true, Ordering::Release);
                self.column_family_names.remove(&cf.name);
                Ok(())
            }
            None => Err(Error::Config(format!(
                "column family {} does not exist",
                cf_id
            ))),
        }
    }

    /// Applies one durable edit to the in-memory tree. Runs under the
    /// version set lock after the manifest record is already on disk.
    pub fn install_version(
        &mut self,
        cf_id: u32,
        mems_deleted: &[u64],
        to_add: Vec<Arc<TableFile>>,
        to_delete: &[(u32, u64)],
        log_number: u64,
    ) -> Result<Arc<Version>> {
        match self.column_family_set.get_mut(&cf_id) {
            Some(cf) => {
                let version = cf.install_version(mems_deleted, to_add, to_delete, log_number)?;
                if log_number > 0 {
                    cf.log_number = log_number;
                }
                Ok(version)
            }
            None => Err(Error::Cancel(format!(
                "column family {} has been dropped",
                cf_id
            ))),
        }
    }

    pub fn start_flush_commit(&mut self, cf_id: u32) -> Option<(Vec<Arc<Memtable>>, Vec<VersionEdit>)> {
        self.column_family_set
            .get_mut(&cf_id)
            .and_then(|cf| cf.imms.start_commit())
    }

    pub fn finish_flush_commit(&mut self, cf_id: u32, success: bool, mems: &[Arc<Memtable>]) {
        if let Some(cf) = self.column_family_set.get_mut(&cf_id) {
            cf.imms.finish_commit(success, mems);
        }
    }

    pub fn record_background_error(&mut self, e: Error) {
        if self.background_error.is_none() {
            self.background_error = Some(e);
        }
    }

    pub fn background_error(&self) -> Result<()> {
        match &self.background_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}
