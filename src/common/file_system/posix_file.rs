use std::io::{Result as IoResult, Write};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fail::fail_point;
use nix::errno::Errno;
use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::sys::uio::{pread, pwrite};
use nix::unistd::{close, ftruncate, lseek, Whence};
use nix::NixPath;

use crate::common::file_system::reader::SequentialFileReader;
use crate::common::file_system::SequentialFile;
use crate::common::{
    Error, FileSystem, RandomAccessFile, RandomAccessFileReader, Result, WritableFile,
    WritableFileWriter,
};

const FILE_ALLOCATE_SIZE: usize = 2 * 1024 * 1024;
const MIN_ALLOCATE_SIZE: usize = 4 * 1024;

/// A thin RAII wrapper around a raw unix file descriptor.
pub struct RawFile(RawFd);

pub fn from_nix_error(e: nix::Error, custom: &'static str) -> std::io::Error {
    let kind = std::io::Error::from(e).kind();
    std::io::Error::new(kind, custom)
}

impl RawFile {
    pub fn open<P: ?Sized + NixPath>(path: &P) -> IoResult<Self> {
        let flags = OFlag::O_RDWR;
        // Permission 644
        let mode = Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IROTH;
        Ok(RawFile(
            fcntl::open(path, flags, mode).map_err(|e| from_nix_error(e, "open"))?,
        ))
    }

    pub fn open_for_read<P: ?Sized + NixPath>(path: &P) -> IoResult<Self> {
        let flags = OFlag::O_RDONLY;
        let mode = Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IROTH;
        Ok(RawFile(
            fcntl::open(path, flags, mode).map_err(|e| from_nix_error(e, "open"))?,
        ))
    }

    pub fn create<P: ?Sized + NixPath>(path: &P) -> IoResult<Self> {
        fail_point!("raw_file::create::err", |_| {
            Err(from_nix_error(nix::Error::EINVAL, "fp"))
        });
        let flags = OFlag::O_RDWR | OFlag::O_CREAT | OFlag::O_TRUNC;
        let mode = Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP | Mode::S_IROTH;
        let fd = fcntl::open(path, flags, mode).map_err(|e| from_nix_error(e, "open"))?;
        Ok(RawFile(fd))
    }

    pub fn close(&self) -> IoResult<()> {
        close(self.0).map_err(|e| from_nix_error(e, "close"))
    }

    pub fn sync(&self) -> IoResult<()> {
        fail_point!("raw_file::sync::err", |_| {
            Err(from_nix_error(nix::Error::EINVAL, "fp"))
        });
        #[cfg(target_os = "linux")]
        {
            nix::unistd::fdatasync(self.0).map_err(|e| from_nix_error(e, "fdatasync"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            nix::unistd::fsync(self.0).map_err(|e| from_nix_error(e, "fsync"))
        }
    }

    pub fn read(&self, mut offset: usize, buf: &mut [u8]) -> IoResult<usize> {
        let mut readed = 0;
        while readed < buf.len() {
            let bytes = match pread(self.0, &mut buf[readed..], offset as i64) {
                Ok(bytes) => bytes,
                Err(e) if e == Errno::EAGAIN => continue,
                Err(e) => return Err(from_nix_error(e, "pread")),
            };
            // EOF
            if bytes == 0 {
                break;
            }
            readed += bytes;
            offset += bytes;
        }
        Ok(readed)
    }

    pub fn write(&self, mut offset: usize, content: &[u8]) -> IoResult<usize> {
        fail_point!("raw_file::write::err", |_| {
            Err(from_nix_error(nix::Error::EINVAL, "fp"))
        });
        let mut written = 0;
        while written < content.len() {
            let bytes = match pwrite(self.0, &content[written..], offset as i64) {
                Ok(bytes) => bytes,
                Err(e) if e == Errno::EAGAIN => continue,
                Err(e) => return Err(from_nix_error(e, "pwrite")),
            };
            if bytes == 0 {
                break;
            }
            written += bytes;
            offset += bytes;
        }
        Ok(written)
    }

    pub fn file_size(&self) -> IoResult<usize> {
        lseek(self.0, 0, Whence::SeekEnd)
            .map(|n| n as usize)
            .map_err(|e| from_nix_error(e, "lseek"))
    }

    pub fn truncate(&self, offset: usize) -> IoResult<()> {
        ftruncate(self.0, offset as i64).map_err(|e| from_nix_error(e, "ftruncate"))
    }

    #[allow(unused_variables)]
    pub fn allocate(&self, offset: usize, size: usize) -> IoResult<()> {
        #[cfg(target_os = "linux")]
        {
            fcntl::fallocate(
                self.0,
                fcntl::FallocateFlags::empty(),
                offset as i64,
                size as i64,
            )
            .map_err(|e| from_nix_error(e, "fallocate"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            Ok(())
        }
    }
}

impl Drop for RawFile {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

pub struct PosixWritableFile {
    inner: Arc<RawFile>,
    offset: usize,
    capacity: usize,
}

impl PosixWritableFile {
    pub fn open<P: ?Sized + NixPath>(path: &P) -> IoResult<Self> {
        let fd = RawFile::open(path)?;
        let file_size = fd.file_size()?;
        Ok(Self::new(Arc::new(fd), file_size))
    }

    pub fn create<P: ?Sized + NixPath>(path: &P) -> IoResult<Self> {
        let fd = RawFile::create(path)?;
        let file_size = fd.file_size()?;
        Ok(Self::new(Arc::new(fd), file_size))
    }

    pub fn new(fd: Arc<RawFile>, capacity: usize) -> Self {
        Self {
            inner: fd,
            offset: 0,
            capacity,
        }
    }
}

#[async_trait]
impl WritableFile for PosixWritableFile {
    async fn append(&mut self, data: &[u8]) -> Result<()> {
        self.write_all(data).map_err(|e| Error::Io(Box::new(e)))
    }

    fn truncate(&mut self, offset: u64) -> Result<()> {
        self.inner
            .truncate(offset as usize)
            .map_err(|e| Error::Io(Box::new(e)))
    }

    fn allocate(&mut self, offset: u64, len: u64) -> Result<()> {
        let new_written = offset + len;
        if new_written > self.capacity as u64 {
            let mut real_alloc = MIN_ALLOCATE_SIZE;
            let alloc = new_written as usize - self.capacity;
            while real_alloc < alloc {
                real_alloc *= 2;
            }
            self.inner.allocate(self.capacity, real_alloc)?;
        }
        Ok(())
    }

    async fn sync(&mut self) -> Result<()> {
        // The fallocate slack past the written offset must not become part
        // of the durable file, or a sequential reader would see it as data.
        if self.capacity > self.offset {
            self.inner
                .truncate(self.offset)
                .map_err(|e| Error::Io(Box::new(e)))?;
            self.capacity = self.offset;
        }
        self.inner.sync().map_err(|e| Error::Io(Box::new(e)))
    }

    async fn fsync(&mut self) -> Result<()> {
        self.sync().await
    }

    fn get_file_size(&self) -> usize {
        self.offset
    }
}

impl Write for PosixWritableFile {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        let new_written = self.offset + buf.len();
        if new_written > self.capacity {
            let alloc = std::cmp::max(new_written - self.capacity, FILE_ALLOCATE_SIZE);
            let mut real_alloc = FILE_ALLOCATE_SIZE;
            while real_alloc < alloc {
                real_alloc *= 2;
            }
            self.inner.allocate(self.capacity, real_alloc)?;
            self.capacity += real_alloc;
        }
        let len = self.inner.write(self.offset, buf)?;
        self.offset += len;
        Ok(len)
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

pub struct PosixReadableFile {
    inner: Arc<RawFile>,
    file_size: usize,
}

impl PosixReadableFile {
    pub fn open<P: ?Sized + NixPath>(path: &P) -> IoResult<Self> {
        let fd = RawFile::open_for_read(path)?;
        let file_size = fd.file_size()?;
        Ok(Self {
            inner: Arc::new(fd),
            file_size,
        })
    }
}

#[async_trait]
impl RandomAccessFile for PosixReadableFile {
    async fn read_exact(&self, offset: usize, n: usize, data: &mut [u8]) -> Result<usize> {
        self.inner
            .read(offset, &mut data[..n])
            .map_err(|e| Error::Io(Box::new(e)))
    }

    fn file_size(&self) -> usize {
        self.file_size
    }
}

pub struct PosixSequentialFile {
    inner: Arc<RawFile>,
    file_size: usize,
    offset: usize,
}

impl PosixSequentialFile {
    pub fn open<P: ?Sized + NixPath>(path: &P) -> IoResult<Self> {
        let fd = RawFile::open_for_read(path)?;
        let file_size = fd.file_size()?;
        Ok(Self {
            inner: Arc::new(fd),
            file_size,
            offset: 0,
        })
    }
}

#[async_trait]
impl SequentialFile for PosixSequentialFile {
    async fn read_sequential(&mut self, data: &mut [u8]) -> Result<usize> {
        if self.offset >= self.file_size {
            return Ok(0);
        }
        let rest = std::cmp::min(data.len(), self.file_size - self.offset);
        let x = self
            .inner
            .read(self.offset, &mut data[..rest])
            .map_err(|e| Error::Io(Box::new(e)))?;
        self.offset += x;
        Ok(x)
    }

    fn get_file_size(&self) -> usize {
        self.file_size
    }
}

pub struct SyncPosixFileSystem {}

impl FileSystem for SyncPosixFileSystem {
    fn open_writable_file_writer(&self, path: PathBuf) -> Result<Box<WritableFileWriter>> {
        let file_name = path.file_name().unwrap().to_str().unwrap().to_string();
        let f = PosixWritableFile::create(&path).map_err(|e| Error::Io(Box::new(e)))?;
        let writer = WritableFileWriter::new(Box::new(f), file_name, 65536);
        Ok(Box::new(writer))
    }

    fn open_random_access_file(&self, path: PathBuf) -> Result<Box<RandomAccessFileReader>> {
        let file_name = path.file_name().unwrap().to_str().unwrap().to_string();
        let f = PosixReadableFile::open(&path).map_err(|e| Error::Io(Box::new(e)))?;
        let reader = RandomAccessFileReader::new(Box::new(f), file_name);
        Ok(Box::new(reader))
    }

    fn open_sequential_file(&self, path: PathBuf) -> Result<Box<SequentialFileReader>> {
        let file_name = path.file_name().unwrap().to_str().unwrap().to_string();
        let f = PosixSequentialFile::open(&path).map_err(|e| Error::Io(Box::new(e)))?;
        let reader = SequentialFileReader::new(Box::new(f), file_name);
        Ok(Box::new(reader))
    }

    fn read_file_content(&self, path: PathBuf) -> Result<Vec<u8>> {
        let f = PosixReadableFile::open(&path).map_err(|e| Error::Io(Box::new(e)))?;
        let mut buf = vec![0u8; f.file_size];
        let read = f
            .inner
            .read(0, &mut buf)
            .map_err(|e| Error::Io(Box::new(e)))?;
        buf.truncate(read);
        Ok(buf)
    }

    fn remove(&self, path: PathBuf) -> Result<()> {
        std::fs::remove_file(path).map_err(|e| Error::Io(Box::new(e)))
    }

    fn rename(&self, origin: PathBuf, target: PathBuf) -> Result<()> {
        std::fs::rename(origin, target).map_err(|e| Error::Io(Box::new(e)))
    }

    fn list_files(&self, path: PathBuf) -> Result<Vec<PathBuf>> {
        let mut files = vec![];
        for entry in std::fs::read_dir(path).map_err(|e| Error::Io(Box::new(e)))? {
            let entry = entry.map_err(|e| Error::Io(Box::new(e)))?;
            files.push(entry.path());
        }
        Ok(files)
    }

    fn file_exist(&self, path: &Path) -> Result<bool> {
        Ok(path.exists())
    }
}
