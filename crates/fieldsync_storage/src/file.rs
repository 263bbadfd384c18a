//! File-backed journal storage.

use crate::backend::JournalBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A file-based journal backend.
///
/// Data survives process restarts. `flush` pushes buffered writes to
/// the OS; `sync` calls `File::sync_all` so data and metadata are on
/// disk before the journal considers a frame committed.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    size: Mutex<u64>,
}

impl FileBackend {
    /// Opens or creates the journal file at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size: Mutex::new(size),
        })
    }

    /// Opens the journal file, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Fails if directories cannot be created or the file cannot be
    /// opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JournalBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.lock();
        if offset > size || offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut size = self.size.lock();
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(*size))?;
        file.write_all(data)?;
        let offset = *size;
        *size += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.lock().flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        let mut file = self.file.lock();
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.lock())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut size = self.size.lock();
        if new_size > *size {
            return Err(StorageError::TruncatePastEnd {
                target: new_size,
                size: *size,
            });
        }
        let file = self.file.lock();
        file.set_len(new_size)?;
        *size = new_size;
        Ok(())
    }
}
