use crate::common::Result;
use crate::common::WritableFile;

/// Buffers small appends before they reach the underlying file. Sync always
/// flushes the buffer first, so a synced prefix is durable on its own.
pub struct WritableFileWriter {
    file_name: String,
    writable_file: Box<dyn WritableFile>,
    buf: Vec<u8>,
    file_size: usize,
    max_buffer_size: usize,
}

impl WritableFileWriter {
    pub fn new(
        writable_file: Box<dyn WritableFile>,
        file_name: String,
        max_buffer_size: usize,
    ) -> Self {
        let file_size = writable_file.get_file_size();
        WritableFileWriter {
            file_name,
            writable_file,
            buf: Vec::with_capacity(std::cmp::min(65536, max_buffer_size)),
            file_size,
            max_buffer_size,
        }
    }

    pub async fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file_size += data.len();
        if self.max_buffer_size == 0 || (self.buf.is_empty() && data.len() >= self.max_buffer_size)
        {
            self.writable_file.append(data).await?;
        } else {
            self.buf.extend_from_slice(data);
            if self.buf.len() >= self.max_buffer_size {
                self.writable_file.append(&self.buf).await?;
                self.buf.clear();
            }
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.writable_file.append(&self.buf).await?;
            self.buf.clear();
        }
        Ok(())
    }

    pub async fn sync(&mut self) -> Result<()> {
        self.flush().await?;
        self.writable_file.sync().await?;
        Ok(())
    }

    pub fn file_size(&self) -> usize {
        self.file_size
    }

    pub fn name(&self) -> &str {
        self.file_name.as_str()
    }
}
