//! Run Configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file is valid.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::value::Mapping;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// How many times one node may be rewritten before giving up.
    #[serde(default = "default_max_resolution_chain")]
    pub max_resolution_chain: usize,
    /// How deeply expressions may nest inside each other's parameters.
    #[serde(default = "default_max_resolution_depth")]
    pub max_resolution_depth: usize,
    /// Log every expression and step, not just those with `do_log` set.
    #[serde(default)]
    pub do_log_all: bool,
    /// Where `save` steps write when they name no path.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Free-form values exposed to definitions through `config` expressions.
    #[serde(default)]
    pub values: Mapping,
}

fn default_max_resolution_chain() -> usize {
    64
}

fn default_max_resolution_depth() -> usize {
    128
}

fn default_output_dir() -> String {
    "Cards".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_resolution_chain: default_max_resolution_chain(),
            max_resolution_depth: default_max_resolution_depth(),
            do_log_all: false,
            output_dir: default_output_dir(),
            values: Mapping::new(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}
