//! Installed-plugin catalog.
//!
//! The catalog is produced by the host application's own scanner and exported
//! as JSON; this module only reads it. Once loaded it is immutable and is
//! shared by reference across every document of a run (including documents
//! processed on other threads).
//!
//! # Source format
//!
//! ```json
//! { "plugins": [
//!     { "unique_id": "5653545856...", "display_name": "Serum",
//!       "format": "vst3", "version": "1.3.5", "vendor": "Xfer Records",
//!       "parameters": ["Cutoff", "Resonance"] }
//! ] }
//! ```
//!
//! A bare array of records is accepted as well. `format` takes `legacy`,
//! `vst2`, `vst`, `modern` or `vst3`.

use crate::document::PluginReference;
use crate::error::{FixerError, Result};
use crate::plugin::{PluginFormat, PluginRecord};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// Trailing name tokens that describe packaging rather than the plugin.
const PACKAGING_SUFFIXES: &[&str] = &["vst", "vst2", "vst3", "au", "x64", "x86", "64bit", "32bit"];

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogSource {
    Wrapped { plugins: Vec<PluginRecord> },
    Bare(Vec<PluginRecord>),
}

#[derive(Debug, Clone, Default)]
pub struct PluginCatalog {
    records: Vec<PluginRecord>,
    /// (format, unique_id) -> record indices, newest version first
    by_id: BTreeMap<(PluginFormat, String), Vec<usize>>,
    /// (format, normalized name) -> record indices
    by_name: BTreeMap<(PluginFormat, String), Vec<usize>>,
}

impl PluginCatalog {
    /// Load the catalog from a JSON export.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| FixerError::catalog(path, e))?;
        let source: CatalogSource =
            serde_json::from_str(&content).map_err(|e| FixerError::catalog(path, e))?;
        let records = match source {
            CatalogSource::Wrapped { plugins } => plugins,
            CatalogSource::Bare(plugins) => plugins,
        };

        let catalog =
            Self::from_records(records).map_err(|reason| FixerError::catalog(path, reason))?;
        tracing::debug!(path = %path.display(), plugins = catalog.len(), "Loaded plugin catalog");
        Ok(catalog)
    }

    /// Build a catalog from records already in memory.
    ///
    /// Fails on records without an id or name, and on two records sharing
    /// format, unique id and version.
    pub fn from_records(records: Vec<PluginRecord>) -> std::result::Result<Self, String> {
        let mut seen = HashSet::new();
        for record in &records {
            if record.unique_id.trim().is_empty() {
                return Err(format!("plugin {:?} has an empty unique_id", record.display_name));
            }
            if record.display_name.trim().is_empty() {
                return Err(format!("plugin {:?} has an empty display_name", record.unique_id));
            }
            let key = (
                record.format,
                id_key(&record.unique_id),
                record.version.canonical_parts().to_vec(),
            );
            if !seen.insert(key) {
                return Err(format!(
                    "duplicate {} plugin id {:?} at version {}",
                    record.format, record.unique_id, record.version
                ));
            }
        }

        let mut by_id: BTreeMap<(PluginFormat, String), Vec<usize>> = BTreeMap::new();
        let mut by_name: BTreeMap<(PluginFormat, String), Vec<usize>> = BTreeMap::new();
        for (index, record) in records.iter().enumerate() {
            by_id
                .entry((record.format, id_key(&record.unique_id)))
                .or_default()
                .push(index);
            by_name
                .entry((record.format, normalize_plugin_name(&record.display_name)))
                .or_default()
                .push(index);
        }
        for indices in by_id.values_mut() {
            indices.sort_by(|&a, &b| records[b].version.cmp(&records[a].version));
        }

        Ok(PluginCatalog {
            records,
            by_id,
            by_name,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Exact id lookup within one format. The newest version wins when the
    /// id is shared by several versions.
    pub fn lookup_by_id(&self, id: &str, format: PluginFormat) -> Option<&PluginRecord> {
        self.by_id
            .get(&(format, id_key(id)))
            .and_then(|indices| indices.first())
            .map(|&index| &self.records[index])
    }

    /// Records of `format` whose normalized display name equals the
    /// normalized `name`. Ranking is the resolver's job.
    pub fn search_by_name(&self, name: &str, format: PluginFormat) -> Vec<&PluginRecord> {
        self.by_name
            .get(&(format, normalize_plugin_name(name)))
            .map(|indices| indices.iter().map(|&i| &self.records[i]).collect())
            .unwrap_or_default()
    }

    pub fn plugins_of(&self, format: PluginFormat) -> impl Iterator<Item = &PluginRecord> + '_ {
        self.records.iter().filter(move |r| r.format == format)
    }

    /// Whether the plugin a project refers to is still installed in the
    /// format the project expects.
    pub fn is_installed(&self, reference: &PluginReference) -> bool {
        let format = reference.format();
        let device = reference.device();
        if let Some(id) = &device.declared_id {
            if self.lookup_by_id(id, format).is_some() {
                return true;
            }
        }
        !self.search_by_name(&device.declared_name, format).is_empty()
    }
}

/// Ids compare as written, except 128-bit class ids, which match regardless
/// of case and dashes.
fn id_key(id: &str) -> String {
    let id = id.trim();
    let hex: String = id.chars().filter(|&c| c != '-').collect();
    if hex.len() == 32 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        hex.to_ascii_lowercase()
    } else {
        id.to_string()
    }
}

/// Normalize a plugin name for comparison across formats.
///
/// Lowercases, splits on anything that is not alphanumeric, drops a leading
/// "the" and trailing packaging markers (`VST3`, `x64`, ...) while at least
/// one token remains, then joins the tokens without separators.
pub fn normalize_plugin_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect();

    if tokens.len() > 1 && tokens[0] == "the" {
        tokens.remove(0);
    }
    while tokens.len() > 1
        && tokens
            .last()
            .is_some_and(|token| PACKAGING_SUFFIXES.contains(token))
    {
        tokens.pop();
    }

    tokens.concat()
}
