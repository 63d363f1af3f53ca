//! Error kinds for the engine. Everything except `QueryInput` is fatal to
//! the caller; the engine does not attempt self-repair.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed configuration. Fatal at startup.
    #[error("configuration: {0}")]
    Config(String),

    /// Failure reading or writing a page or record. No retry policy.
    #[error("store i/o: {0}")]
    Store(#[from] std::io::Error),

    /// On-disk bytes inconsistent with their declared layout.
    #[error("corrupt data: {0}")]
    Decode(String),

    /// A node operation would violate a structural invariant. Logic bug.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Malformed entry in the query stream. The query is skipped.
    #[error("bad query input: {0}")]
    QueryInput(String),
}

pub type Result<T> = std::result::Result<T, Error>;
