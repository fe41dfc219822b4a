//! Per-document and per-run reports.

use crate::document::PluginReference;
use crate::plugin::PluginFormat;
use crate::rewrite::ChangeEntry;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Pipeline step a document was in when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Open,
    Resolve,
    Snapshot,
    Apply,
    Serialize,
    Commit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Open => "open",
            Stage::Resolve => "resolve",
            Stage::Snapshot => "snapshot",
            Stage::Apply => "apply",
            Stage::Serialize => "serialize",
            Stage::Commit => "commit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Committed,
    /// Changes were computed but the original was left alone.
    DryRun,
    /// Nothing to resolve; not snapshotted.
    Unchanged,
    /// Stopped before the original could have been touched.
    Failed { stage: Stage, reason: String },
    /// Stopped after the snapshot; the original was restored.
    RolledBack { stage: Stage, reason: String },
}

impl DocumentOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DocumentOutcome::Failed { .. } | DocumentOutcome::RolledBack { .. }
        )
    }
}

/// A missing plugin nothing in the catalog could replace.
#[derive(Debug, Clone, Serialize)]
pub struct UnresolvedEntry {
    pub device: String,
    pub format: PluginFormat,
    pub name: String,
    pub declared_id: Option<String>,
    pub automation_links: usize,
    pub mapping_links: usize,
}

impl From<&PluginReference> for UnresolvedEntry {
    fn from(reference: &PluginReference) -> Self {
        let device = reference.device();
        UnresolvedEntry {
            device: device.location.path.clone(),
            format: reference.format(),
            name: device.declared_name.clone(),
            declared_id: device.declared_id.clone(),
            automation_links: device.automation_links.len(),
            mapping_links: device.mapping_links.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentReport {
    pub path: PathBuf,
    pub live_version: Option<String>,
    pub outcome: DocumentOutcome,
    pub backup_path: Option<PathBuf>,
    /// Plugin references that are still installed and were left alone.
    pub installed: usize,
    pub changes: Vec<ChangeEntry>,
    pub unresolved: Vec<UnresolvedEntry>,
    pub processed_at: DateTime<Local>,
}

impl DocumentReport {
    pub fn new(path: PathBuf) -> Self {
        DocumentReport {
            path,
            live_version: None,
            outcome: DocumentOutcome::Unchanged,
            backup_path: None,
            installed: 0,
            changes: Vec::new(),
            unresolved: Vec::new(),
            processed_at: Local::now(),
        }
    }

    pub(crate) fn fail(mut self, stage: Stage, reason: impl fmt::Display) -> Self {
        self.outcome = DocumentOutcome::Failed {
            stage,
            reason: reason.to_string(),
        };
        self
    }

    pub(crate) fn roll_back(mut self, stage: Stage, reason: impl fmt::Display) -> Self {
        self.outcome = DocumentOutcome::RolledBack {
            stage,
            reason: reason.to_string(),
        };
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub documents: Vec<DocumentReport>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.documents.iter().any(|doc| doc.outcome.is_failure())
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for doc in &self.documents {
            summary.documents += 1;
            summary.changes += doc.changes.len();
            summary.unresolved += doc.unresolved.len();
            match doc.outcome {
                DocumentOutcome::Committed => summary.committed += 1,
                DocumentOutcome::DryRun => summary.dry_run += 1,
                DocumentOutcome::Unchanged => summary.unchanged += 1,
                DocumentOutcome::Failed { .. } => summary.failed += 1,
                DocumentOutcome::RolledBack { .. } => summary.rolled_back += 1,
            }
        }
        summary
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub documents: usize,
    pub committed: usize,
    pub dry_run: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub rolled_back: usize,
    pub changes: usize,
    pub unresolved: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} document(s): {} committed, {} dry-run, {} unchanged, {} failed, {} rolled back; \
             {} plugin(s) replaced, {} unresolved",
            self.documents,
            self.committed,
            self.dry_run,
            self.unchanged,
            self.failed,
            self.rolled_back,
            self.changes,
            self.unresolved
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_with_stage() {
        let outcome = DocumentOutcome::RolledBack {
            stage: Stage::Commit,
            reason: "disk full".into(),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "rolled_back");
        assert_eq!(value["stage"], "Commit");
        assert!(outcome.is_failure());
        assert!(!DocumentOutcome::DryRun.is_failure());
    }

    #[test]
    fn summary_counts_outcomes() {
        let now = Local::now();
        let report = RunReport {
            dry_run: false,
            started_at: now,
            finished_at: now,
            documents: vec![
                DocumentReport::new("a.als".into()),
                DocumentReport::new("b.als".into()).fail(Stage::Open, "not a set"),
            ],
        };
        let summary = report.summary();
        assert_eq!(summary.documents, 2);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.failed, 1);
        assert!(report.has_failures());
        assert!(report.to_json().unwrap().contains("\"not a set\""));
    }
}
