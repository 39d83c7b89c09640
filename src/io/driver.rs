//! File-backed driver

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{CacheError, Result};

use super::FileDriver;

/// Driver over a regular file
#[derive(Debug)]
pub struct FsDriver {
    path: PathBuf,
    file: File,
    read_only: bool,
}

impl FsDriver {
    /// Create (or truncate) a file for writing
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        debug!(path = ?path, "created container file");
        Ok(Self {
            path,
            file,
            read_only: false,
        })
    }

    /// Open an existing file
    pub fn open(path: impl AsRef<Path>, read_only: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .open(&path)?;

        debug!(path = ?path, read_only, "opened container file");
        Ok(Self {
            path,
            file,
            read_only,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileDriver for FsDriver {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(CacheError::ReadOnly);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn sync(&mut self) -> Result<()> {
        if !self.read_only {
            self.file.sync_all()?;
        }
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}
