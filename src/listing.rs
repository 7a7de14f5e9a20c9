//! Bytecode listings: the input format of the `emit` command.
//!
//! ```toml
//! [[function]]
//! name = "main"
//! code = [0x00000002, 0x00000116]
//! ```

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Listing {
    #[serde(rename = "function", default)]
    pub functions: Vec<ListedFunction>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListedFunction {
    pub name: String,
    pub code: Vec<u32>,
}

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{}: listing has no functions", path.display())]
    Empty { path: PathBuf },
}

impl Listing {
    pub fn load(path: &Path) -> Result<Self, ListingError> {
        let content = fs::read_to_string(path).map_err(|source| ListingError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let listing: Listing = toml::from_str(&content).map_err(|source| ListingError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if listing.functions.is_empty() {
            return Err(ListingError::Empty {
                path: path.to_path_buf(),
            });
        }
        Ok(listing)
    }

    /// Instruction streams in listing order.
    pub fn code(&self) -> Vec<&[u32]> {
        self.functions.iter().map(|f| f.code.as_slice()).collect()
    }
}
