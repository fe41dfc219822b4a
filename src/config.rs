//! Run configuration.
//!
//! The values are threaded explicitly into every entry point; nothing in the
//! crate reads ambient state. Missing keys in a config file fall back to the
//! defaults below, section by section.

use crate::error::{FixerError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FixerConfig {
    pub catalog: CatalogSettings,
    pub matching: MatchSettings,
    pub safety: SafetySettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// JSON export of the host's plugin database.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchSettings {
    pub use_unique_id: bool,
    pub fuzzy_name_threshold: f64,
    pub prefer_newer_version: bool,
}

impl Default for MatchSettings {
    fn default() -> Self {
        MatchSettings {
            use_unique_id: true,
            fuzzy_name_threshold: 0.9,
            prefer_newer_version: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetySettings {
    pub dry_run: bool,
    pub create_backup: bool,
    pub backup_suffix: String,
}

impl Default for SafetySettings {
    fn default() -> Self {
        SafetySettings {
            dry_run: true,
            create_backup: true,
            backup_suffix: String::from("bkp"),
        }
    }
}

impl SafetySettings {
    /// Sibling path the snapshot of `original` is written to.
    pub fn backup_path_for(&self, original: &Path) -> PathBuf {
        let suffix = self.backup_suffix.trim_start_matches('.');
        let mut name = original.as_os_str().to_os_string();
        name.push(".");
        name.push(suffix);
        PathBuf::from(name)
    }
}

impl FixerConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| FixerError::Config(format!("cannot read {:?}: {}", path, e)))?;
        let config: FixerConfig = serde_json::from_str(&content)
            .map_err(|e| FixerError::Config(format!("cannot parse {:?}: {}", path, e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.matching.fuzzy_name_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(FixerError::Config(format!(
                "fuzzy_name_threshold must be within [0, 1], got {}",
                threshold
            )));
        }

        let suffix = self.safety.backup_suffix.trim_start_matches('.');
        if suffix.is_empty() || suffix.contains(['/', '\\']) {
            return Err(FixerError::Config(format!(
                "backup_suffix must be a plain file suffix, got {:?}",
                self.safety.backup_suffix
            )));
        }

        Ok(())
    }
}
