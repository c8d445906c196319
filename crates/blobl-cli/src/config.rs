//! Run configuration loaded from YAML

use clap::ValueEnum;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What to do with a message whose mapping fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Abort the run
    #[default]
    Fail,

    /// Drop the message and continue
    Skip,

    /// Emit the message unchanged and continue
    Passthrough,
}

/// Settings for `blobl run`. Command line flags take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Mapping file
    pub mapping: Option<PathBuf>,

    /// Deadline for each message in milliseconds
    pub timeout_ms: Option<u64>,

    /// Failure handling
    pub on_error: ErrorPolicy,

    /// Emit metadata next to content
    pub with_metadata: bool,
}

/// Errors raised while loading a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RunConfig {
    /// Parse a configuration from YAML text
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }
}
