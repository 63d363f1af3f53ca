//! The B+ tree: insert with split cascade, the four query algorithms,
//! session checkpointing, and structure verification.
//!
//! Nodes reference each other by page id only, in memory and on disk;
//! every reference is resolved by loading the page on demand and every
//! mutated node is committed before the operation returns.

use crate::error::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::heap::{RecordHeap, RecordId};
use super::node::{Bounds, Node, PageId, Tail};
use super::pager::PageStore;
use super::session::Session;

pub const PAGE_FILE: &str = "tree.pages";
pub const HEAP_FILE: &str = "tree.records";
pub const SESSION_FILE: &str = "tree.session";

/// One query answer: the key it was indexed under, its heap address, and
/// the payload fetched from the heap.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: f64,
    pub record_id: RecordId,
    pub payload: String,
}

/// A disk-backed B+ tree catalogue rooted in one data directory. The
/// directory holds the page file, the record heap, and the session page;
/// the three are one unit.
pub struct Tree {
    dir: PathBuf,
    store: PageStore,
    heap: RecordHeap,
    bounds: Bounds,
    root_id: PageId,
    resumed: bool,
}

impl Tree {
    /// Open the tree in `dir`, resuming a prior session if its checkpoint
    /// exists, otherwise creating a fresh tree with an empty leaf root.
    pub fn open<P: AsRef<Path>>(dir: P, page_size: usize) -> Result<Self> {
        let bounds = Bounds::from_page_size(page_size)?;
        Self::with_bounds(dir.as_ref(), page_size, bounds)
    }

    /// Override the derived fan-out bounds.
    #[cfg(test)]
    pub(crate) fn open_with_bounds(dir: &Path, page_size: usize, bounds: Bounds) -> Result<Self> {
        Self::with_bounds(dir, page_size, bounds)
    }

    fn with_bounds(dir: &Path, page_size: usize, bounds: Bounds) -> Result<Self> {
        let session_path = dir.join(SESSION_FILE);
        match Session::load(&session_path, page_size)? {
            Some(session) => {
                let store = PageStore::open(dir.join(PAGE_FILE), page_size, session.next_page_id)?;
                let heap = RecordHeap::open(dir.join(HEAP_FILE))?;
                if heap.len() != session.next_record_id {
                    tracing::warn!(
                        heap = heap.len(),
                        session = session.next_record_id,
                        "record allocator cursor disagrees with heap"
                    );
                }
                tracing::info!(
                    root = session.root_id,
                    pages = store.next_page_id(),
                    records = heap.len(),
                    "session resumed"
                );
                Ok(Self {
                    dir: dir.to_path_buf(),
                    store,
                    heap,
                    bounds,
                    root_id: session.root_id,
                    resumed: true,
                })
            }
            None => {
                let mut store = PageStore::create(dir.join(PAGE_FILE), page_size)?;
                let heap = RecordHeap::create(dir.join(HEAP_FILE))?;
                let root = Node::new_leaf(store.allocate());
                let root_id = root.page_id;
                let mut tree = Self {
                    dir: dir.to_path_buf(),
                    store,
                    heap,
                    bounds,
                    root_id,
                    resumed: false,
                };
                tree.commit(&root)?;
                tracing::info!(
                    page_size,
                    lower = bounds.lower,
                    upper = bounds.upper,
                    "new tree created"
                );
                Ok(tree)
            }
        }
    }

    /// Whether `open` resumed a prior session.
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// Pages allocated so far.
    pub fn node_count(&self) -> u64 {
        self.store.next_page_id()
    }

    /// Records appended so far.
    pub fn record_count(&self) -> u64 {
        self.heap.len()
    }

    /// Write the session page so a later run can reopen this tree.
    pub fn checkpoint(&mut self) -> Result<()> {
        let session = Session {
            root_id: self.root_id,
            next_page_id: self.store.next_page_id(),
            next_record_id: self.heap.len(),
        };
        session.store(&self.dir.join(SESSION_FILE), self.store.page_size())?;
        tracing::debug!(root = self.root_id, "session stored");
        Ok(())
    }

    fn load(&mut self, page_id: PageId) -> Result<Node> {
        let bytes = self.store.read(page_id)?;
        Node::decode(&bytes, page_id)
    }

    fn commit(&mut self, node: &Node) -> Result<()> {
        let bytes = node.encode(self.store.page_size())?;
        self.store.write(node.page_id, &bytes)
    }

    fn fetch(&mut self, key: f64, record_id: RecordId) -> Result<Record> {
        let payload = self.heap.fetch(record_id)?;
        Ok(Record {
            key,
            record_id,
            payload,
        })
    }

    /// Descend from the root to the leaf where `key` belongs.
    fn locate_leaf(&mut self, key: f64) -> Result<Node> {
        let mut node = self.load(self.root_id)?;
        while !node.is_leaf() {
            let position = node.key_position(key);
            let child = node.children()?[position];
            node = self.load(child)?;
        }
        Ok(node)
    }

    /// Append the payload to the heap and index it under `key`.
    /// Duplicate keys are permitted and yield distinct records.
    pub fn insert(&mut self, key: f64, payload: &str) -> Result<RecordId> {
        let record_id = self.heap.append(payload)?;
        let mut leaf = self.locate_leaf(key)?;
        leaf.insert_record(key, record_id)?;
        self.commit(&leaf)?;
        if leaf.keys.len() > self.bounds.upper {
            self.split_leaf(leaf)?;
        }
        Ok(record_id)
    }

    /// A single split suffices: it halves the node.
    fn split_leaf(&mut self, mut leaf: Node) -> Result<()> {
        let sibling_id = self.store.allocate();
        let moved_keys = leaf.keys.split_off(self.bounds.lower);
        let moved_records = match &mut leaf.tail {
            Tail::Leaf(records) => records.split_off(self.bounds.lower),
            Tail::Internal(_) => {
                return Err(Error::Invariant(format!(
                    "leaf split on internal page {}",
                    leaf.page_id
                )))
            }
        };
        let sibling = Node {
            page_id: sibling_id,
            parent: leaf.parent,
            prev_leaf: Some(leaf.page_id),
            next_leaf: leaf.next_leaf,
            keys: moved_keys,
            tail: Tail::Leaf(moved_records),
        };

        // splice the sibling into the chain before the former successor
        if let Some(successor_id) = leaf.next_leaf {
            let mut successor = self.load(successor_id)?;
            successor.prev_leaf = Some(sibling_id);
            self.commit(&successor)?;
        }
        leaf.next_leaf = Some(sibling_id);

        let separator = sibling.keys[0];
        tracing::debug!(page = leaf.page_id, sibling = sibling_id, separator, "leaf split");
        self.promote(leaf, sibling, separator)
    }

    fn split_internal(&mut self, mut node: Node) -> Result<()> {
        let sibling_id = self.store.allocate();
        let moved_keys = node.keys.split_off(self.bounds.lower + 1);
        let separator = match node.keys.pop() {
            Some(key) => key,
            None => {
                return Err(Error::Invariant(format!(
                    "internal split on empty page {}",
                    node.page_id
                )))
            }
        };
        let moved_children = match &mut node.tail {
            Tail::Internal(children) => children.split_off(self.bounds.lower + 1),
            Tail::Leaf(_) => {
                return Err(Error::Invariant(format!(
                    "internal split on leaf page {}",
                    node.page_id
                )))
            }
        };
        let sibling = Node {
            page_id: sibling_id,
            parent: node.parent,
            prev_leaf: None,
            next_leaf: None,
            keys: moved_keys,
            tail: Tail::Internal(moved_children),
        };

        // the moved children now answer to the sibling
        for child_id in sibling.children()?.to_vec() {
            let mut child = self.load(child_id)?;
            child.parent = Some(sibling_id);
            self.commit(&child)?;
        }

        tracing::debug!(page = node.page_id, sibling = sibling_id, separator, "internal split");
        self.promote(node, sibling, separator)
    }

    /// Push a promoted separator into the parent, or grow a new root when
    /// the split node was the root.
    fn promote(&mut self, mut left: Node, mut right: Node, separator: f64) -> Result<()> {
        match left.parent {
            Some(parent_id) => {
                self.commit(&left)?;
                self.commit(&right)?;
                let mut parent = self.load(parent_id)?;
                parent.insert_separator(separator, left.page_id, right.page_id)?;
                self.commit(&parent)?;
                if parent.keys.len() > self.bounds.upper {
                    self.split_internal(parent)?;
                }
                Ok(())
            }
            None => {
                let root_id = self.store.allocate();
                left.parent = Some(root_id);
                right.parent = Some(root_id);
                let root = Node {
                    page_id: root_id,
                    parent: None,
                    prev_leaf: None,
                    next_leaf: None,
                    keys: vec![separator],
                    tail: Tail::Internal(vec![left.page_id, right.page_id]),
                };
                self.commit(&left)?;
                self.commit(&right)?;
                self.commit(&root)?;
                self.root_id = root_id;
                tracing::debug!(root = root_id, "tree grew a new root");
                Ok(())
            }
        }
    }

    /// Every record whose key equals `key`. Duplicates may straddle a
    /// leaf boundary, so successor leaves beginning with the same key are
    /// chased.
    pub fn point_query(&mut self, key: f64) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        let mut leaf = self.locate_leaf(key)?;
        loop {
            let records = leaf.records()?;
            for (i, &k) in leaf.keys.iter().enumerate() {
                if k == key {
                    let record_id = records[i];
                    out.push(self.fetch(k, record_id)?);
                }
            }
            let successor = match leaf.next_leaf {
                Some(id) => self.load(id)?,
                None => break,
            };
            if successor.keys.first() != Some(&key) {
                break;
            }
            leaf = successor;
        }
        Ok(out)
    }

    /// Every record whose key lies in `[lower, upper]`, in ascending key
    /// order.
    pub fn window_query(&mut self, lower: f64, upper: f64) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        let mut leaf = self.locate_leaf(lower)?;
        loop {
            let records = leaf.records()?;
            for (i, &k) in leaf.keys.iter().enumerate() {
                if k >= lower && k <= upper {
                    let record_id = records[i];
                    out.push(self.fetch(k, record_id)?);
                }
            }
            let successor = match leaf.next_leaf {
                Some(id) => self.load(id)?,
                None => break,
            };
            match successor.keys.first() {
                Some(&first) if first >= lower && first <= upper => leaf = successor,
                _ => break,
            }
        }
        Ok(out)
    }

    /// Window over `[center - radius, center + radius]`, with the lower
    /// edge clamped at zero: keys are non-negative in this domain.
    pub fn range_query(&mut self, center: f64, radius: f64) -> Result<Vec<Record>> {
        let lower = if center - radius >= 0.0 {
            center - radius
        } else {
            0.0
        };
        self.window_query(lower, center + radius)
    }

    /// The `k` records nearest to `center`. Candidates come from walking
    /// the leaf chain outward from the landing position, up to `k` per
    /// direction; the chain visits them in increasing one-sided distance,
    /// so `2k` candidates contain the true `k` nearest. Ties in distance
    /// keep the gathered order, forward side first.
    pub fn knn_query(&mut self, center: f64, k: usize) -> Result<Vec<Record>> {
        let leaf = self.locate_leaf(center)?;
        let position = leaf.key_position(center);
        let mut candidates: Vec<(f64, RecordId)> = Vec::new();

        let records = leaf.records()?;
        let mut count = 0usize;
        for i in position..leaf.keys.len() {
            candidates.push((leaf.keys[i], records[i]));
            count += 1;
        }
        let mut next_id = leaf.next_leaf;
        while count < k {
            let id = match next_id {
                Some(id) => id,
                None => break,
            };
            let node = self.load(id)?;
            let records = node.records()?;
            for i in 0..node.keys.len() {
                candidates.push((node.keys[i], records[i]));
                count += 1;
            }
            next_id = node.next_leaf;
        }

        let records = leaf.records()?;
        let mut count = 0usize;
        for i in 0..position {
            candidates.push((leaf.keys[i], records[i]));
            count += 1;
        }
        let mut prev_id = leaf.prev_leaf;
        while count < k {
            let id = match prev_id {
                Some(id) => id,
                None => break,
            };
            let node = self.load(id)?;
            let records = node.records()?;
            for i in 0..node.keys.len() {
                candidates.push((node.keys[i], records[i]));
                count += 1;
            }
            prev_id = node.prev_leaf;
        }

        // sort_by is stable: equal distances keep gathered order
        candidates.sort_by(|a, b| (a.0 - center).abs().total_cmp(&(b.0 - center).abs()));
        candidates.truncate(k);
        candidates
            .into_iter()
            .map(|(key, record_id)| self.fetch(key, record_id))
            .collect()
    }

    /// Walk the whole tree and check its structural invariants: arity,
    /// key ordering, fan-out bounds on non-root nodes, parent
    /// back-pointers, separator bounds on subtrees, and a leaf chain that
    /// threads every leaf in tree order with globally non-decreasing keys.
    pub fn verify(&mut self) -> Result<()> {
        let root = self.load(self.root_id)?;
        let mut leaves = Vec::new();
        self.verify_node(&root, None, None, None, &mut leaves)?;

        let mut chained = Vec::new();
        let mut previous: Option<PageId> = None;
        let mut cursor = Some(leaves[0]);
        let mut last_key: Option<f64> = None;
        let mut total = 0u64;
        while let Some(id) = cursor {
            let leaf = self.load(id)?;
            if leaf.prev_leaf != previous {
                return Err(Error::Invariant(format!(
                    "leaf {} has prev {:?}, expected {:?}",
                    id, leaf.prev_leaf, previous
                )));
            }
            for &key in &leaf.keys {
                if last_key.map_or(false, |last| key < last) {
                    return Err(Error::Invariant(format!(
                        "leaf chain out of order at leaf {}",
                        id
                    )));
                }
                last_key = Some(key);
            }
            total += leaf.keys.len() as u64;
            chained.push(id);
            previous = Some(id);
            cursor = leaf.next_leaf;
        }
        if chained != leaves {
            return Err(Error::Invariant(
                "leaf chain disagrees with tree order".into(),
            ));
        }
        if total != self.heap.len() {
            return Err(Error::Invariant(format!(
                "{} keys indexed but {} records in the heap",
                total,
                self.heap.len()
            )));
        }
        Ok(())
    }

    fn verify_node(
        &mut self,
        node: &Node,
        expected_parent: Option<PageId>,
        min: Option<f64>,
        max: Option<f64>,
        leaves: &mut Vec<PageId>,
    ) -> Result<()> {
        if node.parent != expected_parent {
            return Err(Error::Invariant(format!(
                "page {} has parent {:?}, expected {:?}",
                node.page_id, node.parent, expected_parent
            )));
        }
        let is_root = expected_parent.is_none();
        if !is_root
            && (node.keys.len() < self.bounds.lower || node.keys.len() > self.bounds.upper)
        {
            return Err(Error::Invariant(format!(
                "page {} holds {} keys, outside [{}, {}]",
                node.page_id,
                node.keys.len(),
                self.bounds.lower,
                self.bounds.upper
            )));
        }
        for pair in node.keys.windows(2) {
            let ordered = if node.is_leaf() {
                pair[0] <= pair[1]
            } else {
                pair[0] < pair[1]
            };
            if !ordered {
                return Err(Error::Invariant(format!(
                    "page {} keys out of order",
                    node.page_id
                )));
            }
        }
        for &key in &node.keys {
            if min.map_or(false, |m| key < m) || max.map_or(false, |m| key > m) {
                return Err(Error::Invariant(format!(
                    "page {} key {} escapes separator bounds",
                    node.page_id, key
                )));
            }
        }
        match &node.tail {
            Tail::Leaf(records) => {
                if records.len() != node.keys.len() {
                    return Err(Error::Invariant(format!(
                        "leaf {} arity mismatch",
                        node.page_id
                    )));
                }
                leaves.push(node.page_id);
            }
            Tail::Internal(children) => {
                if children.len() != node.keys.len() + 1 {
                    return Err(Error::Invariant(format!(
                        "internal {} has {} children for {} keys",
                        node.page_id,
                        children.len(),
                        node.keys.len()
                    )));
                }
                for (i, &child_id) in children.iter().enumerate() {
                    let child = self.load(child_id)?;
                    let child_min = if i == 0 { min } else { Some(node.keys[i - 1]) };
                    let child_max = if i == children.len() - 1 {
                        max
                    } else {
                        Some(node.keys[i])
                    };
                    self.verify_node(&child, Some(node.page_id), child_min, child_max, leaves)?;
                }
            }
        }
        Ok(())
    }

    /// Level-order dump of the tree's keys, one line per level, sibling
    /// groups separated by `||`. An inspection tool.
    pub fn dump<W: Write>(&mut self, out: &mut W) -> Result<()> {
        let mut level = vec![self.root_id];
        while !level.is_empty() {
            let mut next_level = Vec::new();
            let mut groups = Vec::new();
            for &id in &level {
                let node = self.load(id)?;
                let keys: Vec<String> = node.keys.iter().map(|k| k.to_string()).collect();
                groups.push(keys.join(" "));
                if let Tail::Internal(children) = &node.tail {
                    next_level.extend_from_slice(children);
                }
            }
            writeln!(out, "{}", groups.join(" || "))?;
            level = next_level;
        }
        Ok(())
    }
}
