//! Page store: fixed-size pages in one file. Page N lives at offset
//! N * page_size. Page ids are allocated monotonically and never reused.

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::node::PageId;

#[derive(Debug)]
pub struct PageStore {
    path: PathBuf,
    file: File,
    page_size: usize,
    next_page_id: PageId,
}

impl PageStore {
    /// Create a new page file. Overwrites if it exists.
    pub fn create<P: AsRef<Path>>(path: P, page_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            path,
            file,
            page_size,
            next_page_id: 0,
        })
    }

    /// Open an existing page file and rebind the allocator cursor from a
    /// prior session. The file length must be a whole number of pages; a
    /// cursor behind the file length is reconciled forward.
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize, next_page_id: PageId) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let len = file.metadata()?.len();
        if len % (page_size as u64) != 0 {
            return Err(Error::Decode(format!(
                "page file {} length {} is not a multiple of page size {}",
                path.display(),
                len,
                page_size
            )));
        }
        let on_disk = len / (page_size as u64);
        if on_disk != next_page_id {
            tracing::warn!(on_disk, next_page_id, "page allocator cursor disagrees with file");
        }
        Ok(Self {
            path,
            file,
            page_size,
            next_page_id: next_page_id.max(on_disk),
        })
    }

    /// Hand out the next page id. The page is not written until `write`.
    pub fn allocate(&mut self) -> PageId {
        let id = self.next_page_id;
        self.next_page_id += 1;
        id
    }

    /// Read a page by id. Returns exactly `page_size` bytes.
    pub fn read(&mut self, page_id: PageId) -> Result<Vec<u8>> {
        if page_id >= self.next_page_id {
            return Err(Error::Invariant(format!(
                "page id {} out of range (next is {})",
                page_id, self.next_page_id
            )));
        }
        self.file
            .seek(SeekFrom::Start(page_id * self.page_size as u64))?;
        let mut buf = vec![0u8; self.page_size];
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Write a whole page. `bytes` must be exactly `page_size` long.
    pub fn write(&mut self, page_id: PageId, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.page_size {
            return Err(Error::Invariant(format!(
                "page write of {} bytes, expected {}",
                bytes.len(),
                self.page_size
            )));
        }
        if page_id >= self.next_page_id {
            return Err(Error::Invariant(format!(
                "write to unallocated page id {}",
                page_id
            )));
        }
        self.file
            .seek(SeekFrom::Start(page_id * self.page_size as u64))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Next id the allocator will hand out; equals the page count.
    pub fn next_page_id(&self) -> PageId {
        self.next_page_id
    }

    /// Path to the page file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
