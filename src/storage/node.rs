//! Node representation and wire codec.
//!
//! A page starts with a fixed header, then the keys, then the tail: child
//! ids for an internal node (always `num_keys + 1` of them), record ids
//! for a leaf (`num_keys`). Numeric fields are host-native 8-byte values;
//! the format is not portable across architectures. Absent references
//! encode as -1.

use crate::error::{Error, Result};

use super::heap::RecordId;

pub type PageId = u64;

/// page_id (8) + kind (1) + parent (8) + prev (8) + next (8) + num_keys (8)
pub const NODE_HEADER_LEN: usize = 41;

const KIND_INTERNAL: u8 = 0;
const KIND_LEAF: u8 = 1;
const NO_PAGE: i64 = -1;

/// Fan-out bounds. A node may hold at most `upper` keys; a split triggers
/// when it holds more. Every non-root node holds at least `lower`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub lower: usize,
    pub upper: usize,
}

impl Bounds {
    /// Derive bounds from the page size. An overfull node is committed
    /// before it is split, so the page must hold the transient state of
    /// `upper + 1` keys plus `upper + 2` child ids.
    pub fn from_page_size(page_size: usize) -> Result<Self> {
        let max_upper = page_size.saturating_sub(NODE_HEADER_LEN + 24) / 16;
        let lower = max_upper / 2;
        if lower < 2 {
            return Err(Error::Config(format!(
                "page size {} too small: lower fan-out bound must be at least 2",
                page_size
            )));
        }
        Ok(Self {
            lower,
            upper: 2 * lower,
        })
    }
}

/// Tail payload: what a node's keys point at.
#[derive(Debug, Clone, PartialEq)]
pub enum Tail {
    /// Parallel to `keys`: `records[i]` is the record for `keys[i]`.
    Leaf(Vec<RecordId>),
    /// One more child than keys; child `i` covers keys up to `keys[i]`.
    Internal(Vec<PageId>),
}

/// In-memory view of one page. Mutations must be committed back to the
/// page store before the value is dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub page_id: PageId,
    pub parent: Option<PageId>,
    pub prev_leaf: Option<PageId>,
    pub next_leaf: Option<PageId>,
    pub keys: Vec<f64>,
    pub tail: Tail,
}

impl Node {
    /// A fresh, empty leaf.
    pub fn new_leaf(page_id: PageId) -> Self {
        Self {
            page_id,
            parent: None,
            prev_leaf: None,
            next_leaf: None,
            keys: Vec::new(),
            tail: Tail::Leaf(Vec::new()),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.tail, Tail::Leaf(_))
    }

    pub fn records(&self) -> Result<&[RecordId]> {
        match &self.tail {
            Tail::Leaf(records) => Ok(records),
            Tail::Internal(_) => Err(Error::Invariant(format!(
                "page {} is not a leaf",
                self.page_id
            ))),
        }
    }

    pub fn children(&self) -> Result<&[PageId]> {
        match &self.tail {
            Tail::Internal(children) => Ok(children),
            Tail::Leaf(_) => Err(Error::Invariant(format!(
                "page {} is not an internal node",
                self.page_id
            ))),
        }
    }

    /// Smallest `i` with `key <= keys[i]`, or `keys.len()` if the key is
    /// greater than every entry. Used as the insertion position in a leaf,
    /// the child index to descend into, and the separator position in an
    /// internal node; a key equal to a separator routes left.
    pub fn key_position(&self, key: f64) -> usize {
        self.keys.partition_point(|&k| k < key)
    }

    /// Insert a record into a leaf at its key position. The caller commits
    /// the page and checks for overflow.
    pub fn insert_record(&mut self, key: f64, record_id: RecordId) -> Result<()> {
        let position = self.key_position(key);
        let page_id = self.page_id;
        match &mut self.tail {
            Tail::Leaf(records) => {
                self.keys.insert(position, key);
                records.insert(position, record_id);
                Ok(())
            }
            Tail::Internal(_) => Err(Error::Invariant(format!(
                "record insert into internal page {}",
                page_id
            ))),
        }
    }

    /// Insert a promoted separator and its right child into an internal
    /// node. The left child must already sit at the insertion position.
    pub fn insert_separator(&mut self, key: f64, left: PageId, right: PageId) -> Result<()> {
        let position = self.key_position(key);
        let page_id = self.page_id;
        match &mut self.tail {
            Tail::Internal(children) => {
                if children.get(position) != Some(&left) {
                    return Err(Error::Invariant(format!(
                        "separator {} in page {}: left child {} not at position {}",
                        key, page_id, left, position
                    )));
                }
                self.keys.insert(position, key);
                children.insert(position + 1, right);
                Ok(())
            }
            Tail::Leaf(_) => Err(Error::Invariant(format!(
                "separator insert into leaf page {}",
                page_id
            ))),
        }
    }

    /// Serialize into a page buffer of exactly `page_size` bytes.
    pub fn encode(&self, page_size: usize) -> Result<Vec<u8>> {
        let tail_len = match &self.tail {
            Tail::Leaf(records) => {
                if records.len() != self.keys.len() {
                    return Err(Error::Invariant(format!(
                        "leaf page {}: {} keys but {} records",
                        self.page_id,
                        self.keys.len(),
                        records.len()
                    )));
                }
                records.len()
            }
            Tail::Internal(children) => {
                if children.len() != self.keys.len() + 1 {
                    return Err(Error::Invariant(format!(
                        "internal page {}: {} keys but {} children",
                        self.page_id,
                        self.keys.len(),
                        children.len()
                    )));
                }
                children.len()
            }
        };
        let needed = NODE_HEADER_LEN + 8 * self.keys.len() + 8 * tail_len;
        if needed > page_size {
            return Err(Error::Invariant(format!(
                "page {} needs {} bytes, page size is {}",
                self.page_id, needed, page_size
            )));
        }

        let mut buf = vec![0u8; page_size];
        let mut at = 0usize;
        put_i64(&mut buf, &mut at, self.page_id as i64);
        buf[at] = if self.is_leaf() { KIND_LEAF } else { KIND_INTERNAL };
        at += 1;
        put_i64(&mut buf, &mut at, opt_to_wire(self.parent));
        put_i64(&mut buf, &mut at, opt_to_wire(self.prev_leaf));
        put_i64(&mut buf, &mut at, opt_to_wire(self.next_leaf));
        put_i64(&mut buf, &mut at, self.keys.len() as i64);
        for &key in &self.keys {
            buf[at..at + 8].copy_from_slice(&key.to_ne_bytes());
            at += 8;
        }
        match &self.tail {
            Tail::Leaf(records) => {
                for &record_id in records {
                    put_i64(&mut buf, &mut at, record_id as i64);
                }
            }
            Tail::Internal(children) => {
                for &child_id in children {
                    put_i64(&mut buf, &mut at, child_id as i64);
                }
            }
        }
        Ok(buf)
    }

    /// Deserialize a page read from `page_id`. Header fields inconsistent
    /// with the buffer length, or with the id the page was read from, mean
    /// corruption.
    pub fn decode(bytes: &[u8], page_id: PageId) -> Result<Self> {
        if bytes.len() < NODE_HEADER_LEN {
            return Err(Error::Decode(format!(
                "page {} shorter than the node header",
                page_id
            )));
        }
        let mut at = 0usize;
        let stored_id = get_i64(bytes, &mut at);
        if stored_id != page_id as i64 {
            return Err(Error::Decode(format!(
                "page {} carries id {}",
                page_id, stored_id
            )));
        }
        let kind = bytes[at];
        at += 1;
        if kind != KIND_LEAF && kind != KIND_INTERNAL {
            return Err(Error::Decode(format!(
                "page {} has unknown kind flag {}",
                page_id, kind
            )));
        }
        let parent = wire_to_opt(get_i64(bytes, &mut at), page_id)?;
        let prev_leaf = wire_to_opt(get_i64(bytes, &mut at), page_id)?;
        let next_leaf = wire_to_opt(get_i64(bytes, &mut at), page_id)?;
        let num_keys = get_i64(bytes, &mut at);
        if num_keys < 0 {
            return Err(Error::Decode(format!(
                "page {} declares {} keys",
                page_id, num_keys
            )));
        }
        let num_keys = num_keys as usize;
        let tail_len = if kind == KIND_LEAF { num_keys } else { num_keys + 1 };
        if NODE_HEADER_LEN + 8 * num_keys + 8 * tail_len > bytes.len() {
            return Err(Error::Decode(format!(
                "page {} declares {} keys, more than fit in the page",
                page_id, num_keys
            )));
        }

        let mut keys = Vec::with_capacity(num_keys);
        for _ in 0..num_keys {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[at..at + 8]);
            at += 8;
            keys.push(f64::from_ne_bytes(raw));
        }
        let tail = if kind == KIND_LEAF {
            let mut records = Vec::with_capacity(tail_len);
            for _ in 0..tail_len {
                records.push(get_id(bytes, &mut at, page_id)?);
            }
            Tail::Leaf(records)
        } else {
            let mut children = Vec::with_capacity(tail_len);
            for _ in 0..tail_len {
                children.push(get_id(bytes, &mut at, page_id)?);
            }
            Tail::Internal(children)
        };

        Ok(Self {
            page_id,
            parent,
            prev_leaf,
            next_leaf,
            keys,
            tail,
        })
    }
}

fn put_i64(buf: &mut [u8], at: &mut usize, v: i64) {
    buf[*at..*at + 8].copy_from_slice(&v.to_ne_bytes());
    *at += 8;
}

fn get_i64(buf: &[u8], at: &mut usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[*at..*at + 8]);
    *at += 8;
    i64::from_ne_bytes(raw)
}

fn opt_to_wire(id: Option<PageId>) -> i64 {
    match id {
        Some(id) => id as i64,
        None => NO_PAGE,
    }
}

fn wire_to_opt(raw: i64, page_id: PageId) -> Result<Option<PageId>> {
    if raw == NO_PAGE {
        Ok(None)
    } else if raw >= 0 {
        Ok(Some(raw as PageId))
    } else {
        Err(Error::Decode(format!(
            "page {} has negative reference {}",
            page_id, raw
        )))
    }
}

fn get_id(buf: &[u8], at: &mut usize, page_id: PageId) -> Result<u64> {
    let raw = get_i64(buf, at);
    if raw < 0 {
        return Err(Error::Decode(format!(
            "page {} has negative id {} in its tail",
            page_id, raw
        )));
    }
    Ok(raw as u64)
}
