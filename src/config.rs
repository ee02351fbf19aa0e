//! Nulls Configuration Module
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`NULLS_TEMPLATES`, `NULLS_UPLOADS`, ...)
//! 2. Config file (`nulls.yaml` by default)
//! 3. Defaults

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NullsError, Result};

/// Default config file name, looked up in the working directory
pub const CONFIG_FILE: &str = "nulls.yaml";

/// Address of the outermost container
pub const ROOT_ADDRESS: &str = "root";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NullsConfig {
    /// Directory walked for `.html` templates
    pub templates: PathBuf,

    /// Variant rendered into the root container
    pub root_type: String,

    /// Where multipart uploads are spooled while an action runs
    pub uploads: PathBuf,

    /// Global upload byte limit; actions may override it
    pub upload_limit: Option<u64>,

    /// Maximum nesting of recursive renders
    pub max_depth: usize,

    /// Entries kept per client cache kind before FIFO eviction
    pub client_cache_capacity: usize,
}

impl Default for NullsConfig {
    fn default() -> Self {
        Self {
            templates: PathBuf::from("./null"),
            root_type: "index".to_string(),
            uploads: PathBuf::from("./uploads"),
            upload_limit: None,
            max_depth: 32,
            client_cache_capacity: 512,
        }
    }
}

impl NullsConfig {
    /// Template path of the root file, relative to `templates`
    pub fn root_template(&self) -> String {
        format!("{}/{}", ROOT_ADDRESS, self.root_type)
    }

    /// Load configuration from a YAML file
    ///
    /// Returns default config if the file doesn't exist.
    /// Returns error if file exists but is malformed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| NullsError::Config {
            reason: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge with environment variables
    ///
    /// Environment variables take precedence over config file values.
    pub fn with_env(mut self) -> Result<Self> {
        if let Ok(dir) = std::env::var("NULLS_TEMPLATES") {
            self.templates = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("NULLS_UPLOADS") {
            self.uploads = PathBuf::from(dir);
        }
        if let Ok(root) = std::env::var("NULLS_ROOT_TYPE") {
            self.root_type = root;
        }
        if let Ok(limit) = std::env::var("NULLS_UPLOAD_LIMIT") {
            let limit = limit.trim().parse::<u64>().map_err(|e| NullsError::Config {
                reason: format!("NULLS_UPLOAD_LIMIT is not a byte count: {}", e),
            })?;
            self.upload_limit = Some(limit);
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.root_type.is_empty() || self.root_type.contains('/') {
            return Err(NullsError::Config {
                reason: format!("root_type '{}' must be a single path segment", self.root_type),
            });
        }
        if self.max_depth == 0 {
            return Err(NullsError::Config {
                reason: "max_depth must be at least 1".to_string(),
            });
        }
        if self.client_cache_capacity == 0 {
            return Err(NullsError::Config {
                reason: "client_cache_capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
