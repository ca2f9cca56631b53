use super::FileMetaData;
use crate::common::{Error, Result};
use crate::util::{
    get_length_prefixed_slice, get_var_uint32, get_var_uint64, put_length_prefixed_slice,
    put_var_uint32, put_var_uint64, put_varint32varint32, put_varint32varint32varint64,
    put_varint32varint64, put_varint64varint64,
};

// Tag numbers are written to the manifest and must never change.
#[repr(u32)]
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum Tag {
    Comparator = 1,
    LogNumber = 2,
    NextFileNumber = 3,
    LastSequence = 4,
    DeletedFile = 6,
    NewFile = 7,
    ColumnFamily = 200,
    ColumnFamilyAdd = 201,
    ColumnFamilyDrop = 202,
    MaxColumnFamily = 203,
    Unknown = 65535,
}

impl From<u32> for Tag {
    fn from(x: u32) -> Self {
        match x {
            1 => Tag::Comparator,
            2 => Tag::LogNumber,
            3 => Tag::NextFileNumber,
            4 => Tag::LastSequence,
            6 => Tag::DeletedFile,
            7 => Tag::NewFile,
            200 => Tag::ColumnFamily,
            201 => Tag::ColumnFamilyAdd,
            202 => Tag::ColumnFamilyDrop,
            203 => Tag::MaxColumnFamily,
            _ => Tag::Unknown,
        }
    }
}

/// One atomic change to the LSM tree shape of a column family: files added
/// and removed, plus bookkeeping numbers that must survive restart.
#[derive(Clone, Default, Debug, Eq, PartialEq)]
pub struct VersionEdit {
    pub add_files: Vec<FileMetaData>,
    pub deleted_files: Vec<FileMetaData>,
    // Flushed memtable ids. Only meaningful in process, never serialized.
    pub mems_deleted: Vec<u64>,

    pub max_level: u32,
    pub comparator_name: String,
    pub log_number: u64,
    pub next_file_number: u64,
    pub max_column_family: u32,
    pub last_sequence: u64,

    pub has_comparator: bool,
    pub has_log_number: bool,
    pub has_next_file_number: bool,
    pub has_last_sequence: bool,
    pub has_max_column_family: bool,

    pub is_column_family_drop: bool,
    pub is_column_family_add: bool,
    pub column_family: u32,
    pub column_family_name: String,
}

impl VersionEdit {
    pub fn encode_to(&self, buf: &mut Vec<u8>) -> bool {
        if self.has_comparator {
            put_var_uint32(buf, Tag::Comparator as u32);
            put_length_prefixed_slice(buf, self.comparator_name.as_bytes());
        }
        if self.has_log_number {
            put_varint32varint64(buf, Tag::LogNumber as u32, self.log_number);
        }
        if self.has_next_file_number {
            put_varint32varint64(buf, Tag::NextFileNumber as u32, self.next_file_number);
        }
        if self.has_last_sequence {
            put_varint32varint64(buf, Tag::LastSequence as u32, self.last_sequence);
        }
        if self.has_max_column_family {
            put_varint32varint32(buf, Tag::MaxColumnFamily as u32, self.max_column_family);
        }
        for f in &self.deleted_files {
            put_varint32varint32varint64(buf, Tag::DeletedFile as u32, f.level, f.id());
        }
        for f in &self.add_files {
            put_var_uint32(buf, Tag::NewFile as u32);
            put_varint32varint64(buf, f.level, f.fd.get_number());
            put_var_uint64(buf, f.fd.file_size);
            put_length_prefixed_slice(buf, f.smallest.as_ref());
            put_length_prefixed_slice(buf, f.largest.as_ref());
            put_varint64varint64(buf, f.fd.smallest_seqno, f.fd.largest_seqno);
            put_varint64varint64(buf, f.num_entries, f.num_deletions);
            put_var_uint32(buf, f.marked_for_compaction as u32);
        }
        if self.column_family != 0 {
            put_varint32varint32(buf, Tag::ColumnFamily as u32, self.column_family);
        }
        if self.is_column_family_add {
            put_var_uint32(buf, Tag::ColumnFamilyAdd as u32);
            put_length_prefixed_slice(buf, self.column_family_name.as_bytes());
        }
        if self.is_column_family_drop {
            put_var_uint32(buf, Tag::ColumnFamilyDrop as u32);
        }
        true
    }

    pub fn decode_from(&mut self, src: &[u8]) -> Result<()> {
        let mut offset = 0;
        let mut err_msg: &'static str = "";
        while let Some(tag_val) = get_var_uint32(&src[offset..], &mut offset) {
            let tag = tag_val.into();
            match tag {
                Tag::Comparator => match get_length_prefixed_slice(&src[offset..], &mut offset) {
                    Some(data) => {
                        self.comparator_name = String::from_utf8(data.to_vec())
                            .map_err(|_| Error::VarDecode("decode comparator error"))?;
                        self.has_comparator = true;
                    }
                    None => {
                        err_msg = "comparator name";
                        break;
                    }
                },
                Tag::LogNumber => {
                    self.log_number = get_var_uint64(&src[offset..], &mut offset)
                        .ok_or(Error::VarDecode("log number"))?;
                    self.has_log_number = true;
                }
                Tag::NextFileNumber => {
                    self.next_file_number = get_var_uint64(&src[offset..], &mut offset)
                        .ok_or(Error::VarDecode("next file number"))?;
                    self.has_next_file_number = true;
                }
                Tag::LastSequence => {
                    self.last_sequence = get_var_uint64(&src[offset..], &mut offset)
                        .ok_or(Error::VarDecode("last sequence"))?;
                    self.has_last_sequence = true;
                }
                Tag::DeletedFile => {
                    let level = get_var_uint32(&src[offset..], &mut offset)
                        .ok_or(Error::VarDecode("deleted file"))?;
                    if level > self.max_level {
                        self.max_level = level;
                    }
                    let val = get_var_uint64(&src[offset..], &mut offset)
                        .ok_or(Error::VarDecode("deleted file"))?;
                    self.deleted_files
                        .push(FileMetaData::new(val, level, vec![], vec![]));
                }
                Tag::NewFile => {
                    let level = get_var_uint32(&src[offset..], &mut offset)
                        .ok_or(Error::VarDecode("new file"))?;
                    if level > self.max_level {
                        self.max_level = level;
                    }
                    let file_number = get_var_uint64(&src[offset..], &mut offset)
                        .ok_or(Error::VarDecode("new file"))?;
                    let file_size = get_var_uint64(&src[offset..], &mut offset)
                        .ok_or(Error::VarDecode("new file"))?;
                    let smallest = get_length_prefixed_slice(&src[offset..], &mut offset)
                        .ok_or(Error::VarDecode("new file"))?;
                    let largest = get_length_prefixed_slice(&src[offset..], &mut offset)
                        .ok_or(Error::VarDecode("new file"))?;
                    let mut f =
                        FileMetaData::new(file_number, level, smallest.to_vec(), largest.to_vec());
                    f.fd.file_size = file_size;
                    f.fd.smallest_seqno = get_var_uint64(&src[offset..], &mut offset)
                        .ok_or(Error::VarDecode("new file"))?;
                    f.fd.largest_seqno = get_var_uint64(&src[offset..], &mut offset)
                        .ok_or(Error::VarDecode("new file"))?;
                    f.num_entries = get_var_uint64(&src[offset..], &mut offset)
                        .ok_or(Error::VarDecode("new file"))?;
                    f.num_deletions = get_var_uint64(&src[offset..], &mut offset)
                        .ok_or(Error::VarDecode("new file"))?;
                    f.marked_for_compaction = get_var_uint32(&src[offset..], &mut offset)
                        .ok_or(Error::VarDecode("new file"))?
                        != 0;
                    self.add_files.push(f);
                }
                Tag::ColumnFamily => {
                    self.column_family = get_var_uint32(&src[offset..], &mut offset)
                        .ok_or(Error::VarDecode("column family"))?;
                }
                Tag::ColumnFamilyAdd => {
                    let cf = get_length_prefixed_slice(&src[offset..], &mut offset)
                        .ok_or(Error::VarDecode("column family add"))?;
                    self.column_family_name = String::from_utf8(cf.to_vec())
                        .map_err(|_| Error::VarDecode("column family add"))?;
                    self.is_column_family_add = true;
                }
                Tag::ColumnFamilyDrop => {
                    self.is_column_family_drop = true;
                }
                Tag::MaxColumnFamily => {
                    self.max_column_family = get_var_uint32(&src[offset..], &mut offset)
                        .ok_or(Error::VarDecode("column family"))?;
                    self.has_max_column_family = true;
                }
                Tag::Unknown => {
                    err_msg = "unknown tag, manifest may be corrupted";
                    break;
                }
            }
        }
        if !err_msg.is_empty() {
            return Err(Error::VarDecode(err_msg));
        }
        Ok(())
    }

    pub fn set_log_number(&mut self, log_number: u64) {
        self.log_number = log_number;
        self.has_log_number = true;
    }

    pub fn get_log_number(&self) -> u64 {
        self.log_number
    }

    pub fn add_column_family(&mut self, name: String) {
        self.is_column_family_add = true;
        self.column_family_name = name;
    }

    pub fn set_comparator_name(&mut self, name: &str) {
        self.has_comparator = true;
        self.comparator_name = name.to_string();
    }

    pub fn set_next_file(&mut self, file_number: u64) {
        self.next_file_number = file_number;
        self.has_next_file_number = true;
    }

    pub fn set_last_sequence(&mut self, seq: u64) {
        self.last_sequence = seq;
        self.has_last_sequence = true;
    }

    pub fn set_max_column_family(&mut self, c: u32) {
        self.has_max_column_family = true;
        self.max_column_family = c;
    }

    pub fn add_file_meta(&mut self, meta: FileMetaData) {
        self.add_files.push(meta);
    }

    pub fn delete_file(&mut self, level: u32, file_number: u64) {
        let f = FileMetaData::new(file_number, level, vec![], vec![]);
        self.deleted_files.push(f);
    }
}
