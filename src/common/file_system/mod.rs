mod posix_file;
mod reader;
mod writer;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::common::{Error, Result};
use async_trait::async_trait;
pub use posix_file::{
    PosixReadableFile, PosixSequentialFile, PosixWritableFile, SyncPosixFileSystem,
};
pub use reader::{RandomAccessFileReader, SequentialFileReader};
pub use writer::WritableFileWriter;

#[async_trait]
pub trait RandomAccessFile: 'static + Send + Sync {
    async fn read(&self, offset: usize, data: &mut [u8]) -> Result<usize> {
        self.read_exact(offset, data.len(), data).await
    }
    async fn read_exact(&self, offset: usize, n: usize, data: &mut [u8]) -> Result<usize>;
    fn file_size(&self) -> usize;
    fn use_direct_io(&self) -> bool {
        false
    }
}

#[async_trait]
pub trait SequentialFile: 'static + Send + Sync {
    async fn read_sequential(&mut self, data: &mut [u8]) -> Result<usize>;
    fn get_file_size(&self) -> usize;
}

#[async_trait]
pub trait WritableFile: Send + Sync {
    async fn append(&mut self, data: &[u8]) -> Result<()>;
    fn truncate(&mut self, offset: u64) -> Result<()>;
    fn allocate(&mut self, offset: u64, len: u64) -> Result<()>;
    async fn sync(&mut self) -> Result<()>;
    async fn fsync(&mut self) -> Result<()>;
    fn use_direct_io(&mut self) -> bool {
        false
    }
    fn get_file_size(&self) -> usize {
        0
    }
}

pub trait FileSystem: Send + Sync {
    fn open_writable_file_writer(&self, path: PathBuf) -> Result<Box<WritableFileWriter>>;

    fn open_random_access_file(&self, path: PathBuf) -> Result<Box<RandomAccessFileReader>>;

    fn open_sequential_file(&self, path: PathBuf) -> Result<Box<SequentialFileReader>>;

    fn read_file_content(&self, path: PathBuf) -> Result<Vec<u8>>;

    fn remove(&self, path: PathBuf) -> Result<()>;

    fn rename(&self, origin: PathBuf, target: PathBuf) -> Result<()>;

    fn list_files(&self, path: PathBuf) -> Result<Vec<PathBuf>>;

    fn file_exist(&self, path: &Path) -> Result<bool>;
}

#[derive(Default)]
struct InMemFileSystemRep {
    files: HashMap<String, Vec<u8>>,
}

/// A file system entirely backed by memory. Buffered writes become visible
/// to readers only on sync, which keeps crash-consistency tests honest.
#[derive(Default, Clone)]
pub struct InMemFileSystem {
    inner: Arc<Mutex<InMemFileSystemRep>>,
}

pub struct InMemFile {
    buf: Vec<u8>,
    fs: Arc<Mutex<InMemFileSystemRep>>,
    filename: String,
    offset: usize,
}

#[async_trait]
impl WritableFile for InMemFile {
    async fn append(&mut self, data: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn truncate(&mut self, offset: u64) -> Result<()> {
        self.buf.resize(offset as usize, 0);
        Ok(())
    }

    fn allocate(&mut self, _offset: u64, _len: u64) -> Result<()> {
        Ok(())
    }

    async fn sync(&mut self) -> Result<()> {
        self.fsync().await
    }

    async fn fsync(&mut self) -> Result<()> {
        let mut fs = self.fs.lock().unwrap();
        fs.files.insert(self.filename.clone(), self.buf.clone());
        Ok(())
    }

    fn get_file_size(&self) -> usize {
        self.buf.len()
    }
}

#[async_trait]
impl RandomAccessFile for InMemFile {
    async fn read_exact(&self, offset: usize, n: usize, data: &mut [u8]) -> Result<usize> {
        if offset >= self.buf.len() {
            Ok(0)
        } else {
            let rest = std::cmp::min(n, self.buf.len() - offset);
            data[..rest].copy_from_slice(&self.buf[offset..(offset + rest)]);
            Ok(rest)
        }
    }

    fn file_size(&self) -> usize {
        self.buf.len()
    }
}

#[async_trait]
impl SequentialFile for InMemFile {
    async fn read_sequential(&mut self, data: &mut [u8]) -> Result<usize> {
        if self.offset >= self.buf.len() {
            return Ok(0);
        }
        let rest = std::cmp::min(data.len(), self.buf.len() - self.offset);
        data[..rest].copy_from_slice(&self.buf[self.offset..(self.offset + rest)]);
        self.offset += rest;
        Ok(rest)
    }

    fn get_file_size(&self) -> usize {
        self.buf.len()
    }
}

impl InMemFileSystem {
    fn get(&self, path: &Path) -> Result<InMemFile> {
        let filename = path.to_str().unwrap().to_string();
        let fs = self.inner.lock().unwrap();
        match fs.files.get(&filename) {
            None => Err(Error::InvalidFile(format!("file: {} not exists", filename))),
            Some(buf) => Ok(InMemFile {
                fs: self.inner.clone(),
                buf: buf.clone(),
                filename,
                offset: 0,
            }),
        }
    }
}

impl FileSystem for InMemFileSystem {
    fn open_writable_file_writer(&self, path: PathBuf) -> Result<Box<WritableFileWriter>> {
        let filename = path.to_str().unwrap().to_string();
        let f = InMemFile {
            fs: self.inner.clone(),
            buf: vec![],
            filename: filename.clone(),
            offset: 0,
        };
        Ok(Box::new(WritableFileWriter::new(Box::new(f), filename, 128)))
    }

    fn open_random_access_file(&self, path: PathBuf) -> Result<Box<RandomAccessFileReader>> {
        let f = self.get(&path)?;
        let filename = f.filename.clone();
        Ok(Box::new(RandomAccessFileReader::new(Box::new(f), filename)))
    }

    fn open_sequential_file(&self, path: PathBuf) -> Result<Box<SequentialFileReader>> {
        let f = self.get(&path)?;
        let filename = f.filename.clone();
        Ok(Box::new(SequentialFileReader::new(Box::new(f), filename)))
    }

    fn read_file_content(&self, path: PathBuf) -> Result<Vec<u8>> {
        let f = self.get(&path)?;
        Ok(f.buf)
    }

    fn remove(&self, path: PathBuf) -> Result<()> {
        let filename = path.to_str().unwrap().to_string();
        let mut fs = self.inner.lock().unwrap();
        fs.files.remove(&filename);
        Ok(())
    }

    fn rename(&self, origin: PathBuf, target: PathBuf) -> Result<()> {
        let from = origin.to_str().unwrap().to_string();
        let to = target.to_str().unwrap().to_string();
        let mut fs = self.inner.lock().unwrap();
        match fs.files.remove(&from) {
            Some(buf) => {
                fs.files.insert(to, buf);
                Ok(())
            }
            None => Err(Error::InvalidFile(format!("file: {} not exists", from))),
        }
    }

    fn list_files(&self, path: PathBuf) -> Result<Vec<PathBuf>> {
        let dir = path.to_str().unwrap();
        let fs = self.inner.lock().unwrap();
        Ok(fs
            .files
            .keys()
            .filter(|f| f.starts_with(dir))
            .map(PathBuf::from)
            .collect())
    }

    fn file_exist(&self, path: &Path) -> Result<bool> {
        let filename = path.to_str().unwrap();
        let fs = self.inner.lock().unwrap();
        Ok(fs.files.contains_key(filename))
    }
}
