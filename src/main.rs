//! Pagedex harness binary.
//! Usage: pagedex [DATA_DIR]
//!
//! Reads DATA_DIR/btree.config, opens (or creates) the tree in DATA_DIR,
//! bulk-loads DATA_DIR/data.txt on a fresh tree, runs DATA_DIR/queries.txt
//! against it, then checkpoints the session.

use anyhow::Result;
use pagedex::{workload, Config, Tree};
use std::env;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = "btree.config";
const DATA_FILE: &str = "data.txt";
const QUERY_FILE: &str = "queries.txt";

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let dir = PathBuf::from(env::args().nth(1).unwrap_or_else(|| ".".to_string()));
    let config = Config::from_path(&dir.join(CONFIG_FILE))?;
    tracing::info!(dir = %dir.display(), page_size = config.page_size, "pagedex starting");

    let mut tree = Tree::open(&dir, config.page_size)?;
    if !tree.resumed() {
        let data_path = dir.join(DATA_FILE);
        if data_path.exists() {
            workload::load_dataset(&mut tree, &data_path)?;
        } else {
            tracing::warn!(path = %data_path.display(), "no dataset to bulk-load");
        }
    }

    let query_path = dir.join(QUERY_FILE);
    if query_path.exists() {
        let text = std::fs::read_to_string(&query_path)?;
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let count = workload::run_queries(&mut tree, &text, &mut out)?;
        out.flush()?;
        tracing::info!(count, "queries processed");
    } else {
        tracing::warn!(path = %query_path.display(), "no query stream");
    }

    tree.checkpoint()?;
    tracing::info!(
        nodes = tree.node_count(),
        records = tree.record_count(),
        "pagedex exiting"
    );
    Ok(())
}
