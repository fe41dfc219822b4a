//! PluginFix Core Library
//!
//! Repairs Ableton Live sets whose VST2 plugins are no longer installed by
//! swapping in a VST3 equivalent, keeping parameter values, automation, MIDI
//! and macro mappings, and the plugin's saved state.
//!
//! # Core Features
//!
//! ## Plugin Catalog (`registry` module)
//! - `PluginCatalog::load()` - Read the host scanner's JSON export
//! - `lookup_by_id()` / `search_by_name()` - Format-scoped queries
//! - `is_installed()` - Whether a project's reference is still available
//!
//! ## Project Documents (`document` and `xml` modules)
//! - `ProjectDocument::open()` - gzip or plain XML, Live 10 and later
//! - `find_plugin_references()` - Every plugin device in traversal order
//! - `serialize()` - Byte-identical output for untouched regions
//!
//! ## Resolution and Rewrite (`resolver` and `rewrite` modules)
//! - `resolve()` - Exact id first, then normalized-name similarity
//! - `build_plan()` / `apply()` - Parameter alignment and in-place edits
//!
//! ## Safety (`backup` module)
//! - `BackupCoordinator` - Verified snapshot, atomic commit, rollback
//!
//! ## Operations (`operations` module)
//! - `fix_project()` - The full pipeline for one set
//! - `fix_projects()` - Many sets in parallel with one `RunReport`

pub mod backup;
pub mod config;
pub mod document;
pub mod error;
pub mod operations;
pub mod plugin;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod rewrite;
pub mod xml;

pub use backup::{AtomicWriter, BackupCoordinator, BackupState, TempFileWriter};
pub use config::{FixerConfig, MatchSettings, SafetySettings};
pub use document::{PluginReference, ProjectDocument};
pub use error::{FixerError, Result};
pub use operations::{fix_project, fix_project_with, fix_projects, write_report};
pub use plugin::{PluginFormat, PluginRecord, Version};
pub use registry::PluginCatalog;
pub use report::{DocumentOutcome, DocumentReport, RunReport, Stage};
pub use resolver::{resolve, MatchCandidate, MatchKind};
pub use rewrite::{build_plan, ChangeEntry, RewritePlan};
