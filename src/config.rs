//! Code generation configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Knobs that change the shape of emitted code, not its meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmitConfig {
    /// SETLIST with at most this many static values is emitted as
    /// straight-line copies instead of a loop.
    pub setlist_unroll_limit: u32,
    /// Expand `assert` and the simple math builtins inline in fast calls.
    pub inline_builtins: bool,
    /// Emit interrupt checks on calls, returns and loop back-edges.
    pub interrupts: bool,
}

impl Default for EmitConfig {
    fn default() -> Self {
        Self {
            setlist_unroll_limit: 4,
            inline_builtins: true,
            interrupts: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
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
}

impl EmitConfig {
    /// Load a configuration file; missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = EmitConfig::default();
        assert_eq!(config.setlist_unroll_limit, 4);
        assert!(config.inline_builtins);
        assert!(config.interrupts);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "setlist_unroll_limit = 8").unwrap();

        let config = EmitConfig::load(file.path()).unwrap();
        assert_eq!(config.setlist_unroll_limit, 8);
        assert!(config.inline_builtins);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "unroll = 8").unwrap();

        assert!(matches!(
            EmitConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            EmitConfig::load(&dir.path().join("absent.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = EmitConfig {
            setlist_unroll_limit: 0,
            inline_builtins: false,
            interrupts: false,
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(toml::from_str::<EmitConfig>(&text).unwrap(), config);
    }
}
