//! Harness collaborators: bulk dataset loading and the query stream.
//!
//! Both inputs are whitespace-separated token streams. The dataset is one
//! `(key, payload)` pair per line; the query stream is a sequence of
//! tagged queries:
//!
//! | tag | arguments     | meaning                            |
//! |-----|---------------|------------------------------------|
//! | 0   | key payload   | insert record                      |
//! | 1   | key           | point query                        |
//! | 2   | key range     | range query, radius = range * 0.1  |
//! | 3   | key k         | k-nearest-neighbour                |
//! | 4   | lo hi         | window query                       |
//!
//! Unknown tags are logged and skipped. End of input ends the phase.

use crate::error::{Error, Result};
use crate::storage::{Record, Tree};
use std::io::Write;
use std::path::Path;

/// Radius scaling applied by the range-query dispatcher. A domain
/// convention carried over from the original query format.
const RANGE_SCALE: f64 = 0.1;

/// Bulk-load a dataset file into the tree. Returns the number of records
/// inserted.
pub fn load_dataset(tree: &mut Tree, path: &Path) -> Result<u64> {
    let text = std::fs::read_to_string(path)?;
    let mut tokens = text.split_whitespace();
    let mut count = 0u64;
    loop {
        let key = match tokens.next() {
            Some(token) => parse_key(token)?,
            None => break,
        };
        let payload = match tokens.next() {
            Some(token) => token,
            None => break,
        };
        tree.insert(key, payload)?;
        count += 1;
        if count % 5000 == 0 {
            tracing::info!(count, "bulk load progress");
        }
    }
    tracing::info!(count, "bulk load finished");
    Ok(count)
}

/// Run a query stream against the tree, writing each query's echo line
/// followed by one payload per result line.
pub fn run_queries<W: Write>(tree: &mut Tree, text: &str, out: &mut W) -> Result<u64> {
    let mut tokens = text.split_whitespace();
    let mut count = 0u64;
    while let Some(tag) = tokens.next() {
        match dispatch(tree, tag, &mut tokens, out) {
            Ok(true) => count += 1,
            Ok(false) => break,
            Err(Error::QueryInput(reason)) => {
                tracing::warn!(%reason, "query skipped");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(count)
}

/// Returns Ok(false) when the stream ended mid-query, which ends the
/// phase normally.
fn dispatch<'a, W: Write>(
    tree: &mut Tree,
    tag: &str,
    tokens: &mut impl Iterator<Item = &'a str>,
    out: &mut W,
) -> Result<bool> {
    match tag {
        "0" => {
            let (key_token, payload) = match (tokens.next(), tokens.next()) {
                (Some(k), Some(p)) => (k, p),
                _ => return Ok(false),
            };
            let key = parse_key(key_token)?;
            writeln!(out, "0 {} {}", key_token, payload)?;
            tree.insert(key, payload)?;
        }
        "1" => {
            let key_token = match tokens.next() {
                Some(k) => k,
                None => return Ok(false),
            };
            let key = parse_key(key_token)?;
            writeln!(out, "1 {}", key_token)?;
            emit(tree.point_query(key)?, out)?;
        }
        "2" => {
            let (key_token, range_token) = match (tokens.next(), tokens.next()) {
                (Some(k), Some(r)) => (k, r),
                _ => return Ok(false),
            };
            let key = parse_key(key_token)?;
            let range = parse_key(range_token)?;
            writeln!(out, "2 {} {}", key_token, range_token)?;
            emit(tree.range_query(key, range * RANGE_SCALE)?, out)?;
        }
        "3" => {
            let (key_token, k_token) = match (tokens.next(), tokens.next()) {
                (Some(k), Some(n)) => (k, n),
                _ => return Ok(false),
            };
            let key = parse_key(key_token)?;
            let k: usize = k_token
                .parse()
                .map_err(|_| Error::QueryInput(format!("bad neighbour count {:?}", k_token)))?;
            writeln!(out, "3 {} {}", key_token, k_token)?;
            emit(tree.knn_query(key, k)?, out)?;
        }
        "4" => {
            let (lo_token, hi_token) = match (tokens.next(), tokens.next()) {
                (Some(lo), Some(hi)) => (lo, hi),
                _ => return Ok(false),
            };
            let lo = parse_key(lo_token)?;
            let hi = parse_key(hi_token)?;
            writeln!(out, "4 {} {}", lo_token, hi_token)?;
            emit(tree.window_query(lo, hi)?, out)?;
        }
        other => {
            return Err(Error::QueryInput(format!("unknown tag {:?}", other)));
        }
    }
    Ok(true)
}

fn emit<W: Write>(records: Vec<Record>, out: &mut W) -> Result<()> {
    for record in records {
        writeln!(out, "{}", record.payload)?;
    }
    Ok(())
}

fn parse_key(token: &str) -> Result<f64> {
    token
        .parse()
        .map_err(|_| Error::QueryInput(format!("bad key {:?}", token)))
}
