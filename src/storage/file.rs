//! # Page File
//!
//! A `PageFile` is an opaque container of fixed-size pages backed by a
//! regular file. Pages are addressed by `u32` page numbers starting at 1;
//! page number 0 (`PAGE_NONE`) is reserved to mean "no page", so the byte
//! offset of page `p` is `(p - 1) * PAGE_SIZE`.
//!
//! The interface is deliberately copy-based: `read_page` fills a caller
//! buffer and `write_page` consumes one. All caching, pinning, and dirty
//! tracking live a layer above, in the buffer pool, which owns every open
//! `PageFile` and is the only component that touches one directly.
//!
//! A page can be allocated without ever being written; reading it back
//! before the first write yields zeroes, because allocation only extends
//! the logical page count and the file itself grows on write.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::{PAGE_NONE, PAGE_SIZE};
use crate::error::{Error, Result};

pub struct PageFile {
    file: File,
    path: PathBuf,
    page_count: u32,
}

impl PageFile {
    /// Creates a new, empty page file. Fails with
    /// `io::ErrorKind::AlreadyExists` if the path is already taken.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        Ok(Self {
            file,
            path,
            page_count: 0,
        })
    }

    /// Opens an existing page file. The page count is recovered from the
    /// file length; a trailing partial page means the file is damaged.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let len = file.metadata()?.len();
        if len % PAGE_SIZE as u64 != 0 {
            return Err(Error::Corrupted(format!(
                "page file {} has length {} not a multiple of page size {}",
                path.display(),
                len,
                PAGE_SIZE
            )));
        }

        Ok(Self {
            file,
            path,
            page_count: (len / PAGE_SIZE as u64) as u32,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Extends the file by one page and returns its number. The new page
    /// reads as zeroes until written.
    pub fn allocate(&mut self) -> u32 {
        self.page_count += 1;
        self.page_count
    }

    fn offset_of(&self, page_no: u32) -> Result<u64> {
        if page_no == PAGE_NONE || page_no > self.page_count {
            return Err(Error::Corrupted(format!(
                "page {} out of bounds for {} (page_count={})",
                page_no,
                self.path.display(),
                self.page_count
            )));
        }
        Ok((page_no as u64 - 1) * PAGE_SIZE as u64)
    }

    pub fn read_page(&mut self, page_no: u32, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let offset = self.offset_of(page_no)?;

        // Allocated but never written: the file has not grown this far yet.
        let len = self.file.metadata()?.len();
        if offset + PAGE_SIZE as u64 > len {
            buf.fill(0);
            return Ok(());
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_page(&mut self, page_no: u32, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let offset = self.offset_of(page_no)?;

        let len = self.file.metadata()?.len();
        if offset > len {
            // Writing past a hole left by unwritten allocations: extend
            // with zero pages first so the on-disk length stays page-aligned.
            self.file.set_len(offset)?;
        }

        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}
