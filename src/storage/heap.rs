//! Record heap: an append-only text file of payloads, one per line. A
//! record is addressed by its zero-based line index. No update, no delete.

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub type RecordId = u64;

/// Line-addressed payload file. An offset index built on open makes
/// `fetch` a seek plus one line read.
pub struct RecordHeap {
    path: PathBuf,
    file: File,
    offsets: Vec<u64>,
    end: u64,
}

impl RecordHeap {
    /// Create a new heap file. Overwrites if it exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let file = OpenOptions::new().read(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file,
            offsets: Vec::new(),
            end: 0,
        })
    }

    /// Open an existing heap file, scanning it once to index line starts.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).append(true).open(&path)?;
        let mut offsets = Vec::new();
        let mut end = 0u64;
        let mut reader = BufReader::new(&file);
        reader.seek(SeekFrom::Start(0))?;
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line)?;
            if n == 0 {
                break;
            }
            offsets.push(end);
            end += n as u64;
        }
        Ok(Self {
            path,
            file,
            offsets,
            end,
        })
    }

    /// Append a payload. Returns the pre-append line count as its id.
    /// Payloads with embedded whitespace would break line framing.
    pub fn append(&mut self, payload: &str) -> Result<RecordId> {
        if payload.contains(char::is_whitespace) {
            return Err(Error::Invariant(format!(
                "payload {:?} contains whitespace",
                payload
            )));
        }
        let id = self.offsets.len() as RecordId;
        self.file.write_all(payload.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.offsets.push(self.end);
        self.end += payload.len() as u64 + 1;
        Ok(id)
    }

    /// Read the payload at `record_id`.
    pub fn fetch(&mut self, record_id: RecordId) -> Result<String> {
        let offset = *self
            .offsets
            .get(record_id as usize)
            .ok_or_else(|| Error::Decode(format!("record id {} beyond heap end", record_id)))?;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut line = String::new();
        BufReader::new(&self.file).read_line(&mut line)?;
        if line.ends_with('\n') {
            line.pop();
        }
        Ok(line)
    }

    /// Number of records in the heap; also the next record id.
    pub fn len(&self) -> u64 {
        self.offsets.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Path to the heap file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn append_fetch() {
        let tmp = NamedTempFile::new().unwrap();
        let mut heap = RecordHeap::create(tmp.path()).unwrap();
        assert_eq!(heap.append("alpha").unwrap(), 0);
        assert_eq!(heap.append("beta").unwrap(), 1);
        assert_eq!(heap.append("gamma").unwrap(), 2);
        assert_eq!(heap.fetch(1).unwrap(), "beta");
        assert_eq!(heap.fetch(0).unwrap(), "alpha");
        assert_eq!(heap.fetch(2).unwrap(), "gamma");
        assert_eq!(heap.len(), 3);
    }

    #[test]
    fn duplicate_payloads_get_distinct_ids() {
        let tmp = NamedTempFile::new().unwrap();
        let mut heap = RecordHeap::create(tmp.path()).unwrap();
        let a = heap.append("same").unwrap();
        let b = heap.append("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(heap.fetch(a).unwrap(), "same");
        assert_eq!(heap.fetch(b).unwrap(), "same");
    }

    #[test]
    fn whitespace_payload_rejected() {
        let tmp = NamedTempFile::new().unwrap();
        let mut heap = RecordHeap::create(tmp.path()).unwrap();
        assert!(heap.append("two words").is_err());
        assert!(heap.append("line\nbreak").is_err());
    }

    #[test]
    fn out_of_range_fetch_rejected() {
        let tmp = NamedTempFile::new().unwrap();
        let mut heap = RecordHeap::create(tmp.path()).unwrap();
        heap.append("only").unwrap();
        let err = heap.fetch(1).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn open_rebuilds_offsets() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let mut heap = RecordHeap::create(tmp.path()).unwrap();
            heap.append("one").unwrap();
            heap.append("two").unwrap();
        }
        let mut heap = RecordHeap::open(tmp.path()).unwrap();
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.fetch(0).unwrap(), "one");
        assert_eq!(heap.fetch(1).unwrap(), "two");
        assert_eq!(heap.append("three").unwrap(), 2);
        assert_eq!(heap.fetch(2).unwrap(), "three");
    }
}
