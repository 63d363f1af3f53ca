//! Configuration loading and defaults.

use crate::error::{Error, Result};
use crate::storage::Bounds;
use std::path::Path;

/// Runtime configuration for pagedex.
#[derive(Debug, Clone)]
pub struct Config {
    /// Page size in bytes. Default 4096 (4 KB).
    pub page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self { page_size: 4096 }
    }
}

impl Config {
    /// Load config from a text file whose first whitespace-separated token
    /// is the page size in bytes. A missing file or a non-integer first
    /// token is a configuration error.
    pub fn from_path(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let token = s
            .split_whitespace()
            .next()
            .ok_or_else(|| Error::Config(format!("{}: empty config file", path.display())))?;
        let page_size: usize = token
            .parse()
            .map_err(|_| Error::Config(format!("{}: page size is not an integer", path.display())))?;
        let c = Config { page_size };
        c.validate()?;
        Ok(c)
    }

    /// Use default config. Convenience for tests and minimal setups.
    pub fn default_config() -> Self {
        Self::default()
    }

    /// The page size must be large enough to give a lower fan-out bound
    /// of at least 2.
    pub fn validate(&self) -> Result<()> {
        Bounds::from_page_size(self.page_size)?;
        Ok(())
    }
}
