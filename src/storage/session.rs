//! Session checkpoint: one page-sized file remembering the root page and
//! the allocator cursors between process runs.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

use super::heap::RecordId;
use super::node::PageId;

const SESSION_BODY_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub root_id: PageId,
    pub next_page_id: PageId,
    pub next_record_id: RecordId,
}

impl Session {
    /// Load a prior session, or `None` when no checkpoint exists yet.
    pub fn load(path: &Path, page_size: usize) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        if bytes.len() != page_size || page_size < SESSION_BODY_LEN {
            return Err(Error::Decode(format!(
                "session file {} has {} bytes, expected a {} byte page",
                path.display(),
                bytes.len(),
                page_size
            )));
        }
        let mut at = 0usize;
        let root_id = read_id(&bytes, &mut at, path)?;
        let next_page_id = read_id(&bytes, &mut at, path)?;
        let next_record_id = read_id(&bytes, &mut at, path)?;
        if root_id >= next_page_id {
            return Err(Error::Decode(format!(
                "session file {}: root page {} was never allocated",
                path.display(),
                root_id
            )));
        }
        Ok(Some(Self {
            root_id,
            next_page_id,
            next_record_id,
        }))
    }

    /// Write the checkpoint page.
    pub fn store(&self, path: &Path, page_size: usize) -> Result<()> {
        let mut buf = vec![0u8; page_size];
        buf[0..8].copy_from_slice(&(self.root_id as i64).to_ne_bytes());
        buf[8..16].copy_from_slice(&(self.next_page_id as i64).to_ne_bytes());
        buf[16..24].copy_from_slice(&(self.next_record_id as i64).to_ne_bytes());
        fs::write(path, buf)?;
        Ok(())
    }
}

fn read_id(bytes: &[u8], at: &mut usize, path: &Path) -> Result<u64> {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[*at..*at + 8]);
    *at += 8;
    let v = i64::from_ne_bytes(raw);
    if v < 0 {
        return Err(Error::Decode(format!(
            "session file {} holds negative counter {}",
            path.display(),
            v
        )));
    }
    Ok(v as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.session");
        let session = Session {
            root_id: 3,
            next_page_id: 9,
            next_record_id: 120,
        };
        session.store(&path, 256).unwrap();
        assert_eq!(Session::load(&path, 256).unwrap(), Some(session));
    }

    #[test]
    fn absent_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.session");
        assert_eq!(Session::load(&path, 256).unwrap(), None);
    }

    #[test]
    fn wrong_length_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.session");
        std::fs::write(&path, [0u8; 100]).unwrap();
        assert!(matches!(
            Session::load(&path, 256),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn unallocated_root_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tree.session");
        let session = Session {
            root_id: 5,
            next_page_id: 5,
            next_record_id: 0,
        };
        session.store(&path, 256).unwrap();
        assert!(matches!(
            Session::load(&path, 256),
            Err(Error::Decode(_))
        ));
    }
}
