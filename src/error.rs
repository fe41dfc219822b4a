//! Error taxonomy for a fixer run.
//!
//! Per-reference outcomes (no match, ambiguous match, orphaned parameters) are
//! not errors; they end up in the report. Everything here aborts either the
//! whole run (`CatalogLoad`, `Config`) or a single document.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FixerError>;

#[derive(Debug, Error)]
pub enum FixerError {
    #[error("failed to load plugin catalog {path:?}: {reason}")]
    CatalogLoad { path: PathBuf, reason: String },

    #[error("unsupported or unreadable project {path:?}: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("project tree is inconsistent: {0}")]
    Serialize(String),

    #[error("failed to snapshot {path:?} to {backup:?}: {reason}")]
    Backup {
        path: PathBuf,
        backup: PathBuf,
        reason: String,
    },

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("backup coordinator cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
}

impl FixerError {
    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        FixerError::Format {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn catalog(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        FixerError::CatalogLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
