//! Storage engine: page store, record heap, node codec, B+ tree.

mod heap;
mod node;
mod pager;
mod session;
mod tree;

pub use heap::{RecordHeap, RecordId};
pub use node::{Bounds, Node, PageId, Tail, NODE_HEADER_LEN};
pub use pager::PageStore;
pub use session::Session;
pub use tree::{Record, Tree};
