//! TOML configuration for the cairn command-line tool.
//!
//! Every section is optional; a missing file or section falls back to the
//! library defaults.

use std::path::{Path, PathBuf};

use anyhow::Context;
use cairn_types::{ChunkingOptions, ExtractConfig, IngestConfig};
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Blob storage location.
    pub store: StoreSection,
    /// Leaf and interior chunking parameters.
    pub chunking: ChunkingOptions,
    /// Extraction pipeline sizing.
    pub extract: ExtractConfig,
    /// Bulk ingestion sizing.
    pub ingest: IngestConfig,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[store]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Directory holding the blob files and the current root pointer.
    pub data_dir: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".cairn"))
            .unwrap_or_else(|| PathBuf::from(".cairn"));
        Self { data_dir }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse config from a TOML string.
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Reject option combinations the libraries would refuse later anyway.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.chunking
            .validate()
            .map_err(|e| anyhow::anyhow!("[chunking] {e}"))?;
        self.extract
            .validate()
            .map_err(|e| anyhow::anyhow!("[extract] {e}"))?;
        if self.ingest.lanes == 0 {
            anyhow::bail!("[ingest] lanes must be at least 1");
        }
        Ok(())
    }

    /// Directory the blob files live in.
    pub fn blob_dir(&self) -> PathBuf {
        self.store.data_dir.join("blobs")
    }

    /// File holding the hex id of the current root directory.
    pub fn head_path(&self) -> PathBuf {
        self.store.data_dir.join("ROOT")
    }
}
