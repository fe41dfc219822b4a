//! Project repair operations.
//!
//! - `fix_project()` - Repair one set: resolve, snapshot, rewrite, commit
//! - `fix_projects()` - Repair many sets in parallel, report in input order
//! - `write_report()` - Persist a run report as JSON
//!
//! A document is only snapshotted once at least one replacement is known,
//! and nothing after the snapshot can leave the original half-written: any
//! failure past that point restores it.

use crate::backup::{AtomicWriter, BackupCoordinator, BackupState, TempFileWriter};
use crate::config::{FixerConfig, MatchSettings};
use crate::document::ProjectDocument;
use crate::error::FixerError;
use crate::registry::PluginCatalog;
use crate::report::{DocumentOutcome, DocumentReport, RunReport, Stage, UnresolvedEntry};
use crate::resolver;
use crate::rewrite::{self, RewritePlan};
use anyhow::Context;
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Repair one project file with the default atomic writer.
pub fn fix_project(path: &Path, catalog: &PluginCatalog, config: &FixerConfig) -> DocumentReport {
    fix_project_with(path, catalog, config, &TempFileWriter)
}

/// Repair one project file, committing through `writer`.
pub fn fix_project_with(
    path: &Path,
    catalog: &PluginCatalog,
    config: &FixerConfig,
    writer: &dyn AtomicWriter,
) -> DocumentReport {
    let mut report = DocumentReport::new(path.to_path_buf());

    let document = match ProjectDocument::open(path) {
        Ok(document) => document,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cannot open project");
            return report.fail(Stage::Open, e);
        }
    };
    report.live_version = Some(document.live_version().to_string());

    if let Err(e) = config.validate() {
        return report.fail(Stage::Resolve, e);
    }
    let plans = plan_document(&document, catalog, &config.matching, &mut report);
    if plans.is_empty() {
        tracing::info!(
            path = %path.display(),
            installed = report.installed,
            unresolved = report.unresolved.len(),
            "Nothing to replace"
        );
        return report;
    }

    let mut coordinator = BackupCoordinator::new(path, &config.safety, writer);
    if let Err(e) = coordinator.snapshot() {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "Snapshot failed; project left untouched"
        );
        return report.fail(Stage::Snapshot, e);
    }
    report.backup_path = coordinator.backup_path().map(Path::to_path_buf);

    write_back(document, &plans, &mut coordinator, config.safety.dry_run, report)
}

/// Repair every project in `paths` in parallel. Reports come back in input
/// order; one document failing never stops the others.
pub fn fix_projects(paths: &[PathBuf], catalog: &PluginCatalog, config: &FixerConfig) -> RunReport {
    let started_at = chrono::Local::now();

    // `A.als`, `./A.als` and symlinks to it are one document
    let mut seen = HashSet::new();
    let first_seen: Vec<bool> = paths
        .iter()
        .map(|path| seen.insert(fs::canonicalize(path).unwrap_or_else(|_| path.clone())))
        .collect();

    let documents = paths
        .par_iter()
        .zip(first_seen.par_iter())
        .map(|(path, &first)| {
            if first {
                fix_project(path, catalog, config)
            } else {
                DocumentReport::new(path.clone())
                    .fail(Stage::Open, "listed more than once in this run")
            }
        })
        .collect();

    RunReport {
        dry_run: config.safety.dry_run,
        started_at,
        finished_at: chrono::Local::now(),
        documents,
    }
}

/// Write the run report as pretty-printed JSON.
pub fn write_report(report: &RunReport, path: &Path) -> anyhow::Result<()> {
    let content = report.to_json().context("Failed to serialize run report")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .context(format!("Failed to create report directory: {:?}", parent))?;
    }
    fs::write(path, content).context(format!("Failed to write report: {:?}", path))?;
    Ok(())
}

/// Resolve every missing reference, in traversal order.
fn plan_document(
    document: &ProjectDocument,
    catalog: &PluginCatalog,
    settings: &MatchSettings,
    report: &mut DocumentReport,
) -> Vec<RewritePlan> {
    let mut plans = Vec::new();
    for reference in document.find_plugin_references() {
        let device = reference.device();
        if catalog.is_installed(&reference) {
            tracing::debug!(
                path = %document.path().display(),
                device = %device.declared_name,
                format = %reference.format(),
                "Plugin is installed"
            );
            report.installed += 1;
            continue;
        }

        match resolver::resolve(&reference, catalog, settings) {
            Some(candidate) => plans.push(rewrite::build_plan(&reference, &candidate)),
            None => {
                tracing::warn!(
                    path = %document.path().display(),
                    device = %device.location.path,
                    name = %device.declared_name,
                    "No replacement found"
                );
                report.unresolved.push(UnresolvedEntry::from(&reference));
            }
        }
    }
    plans
}

/// Apply, serialize, then commit or restore. Expects a snapshotted
/// coordinator.
fn write_back(
    mut document: ProjectDocument,
    plans: &[RewritePlan],
    coordinator: &mut BackupCoordinator<'_>,
    dry_run: bool,
    mut report: DocumentReport,
) -> DocumentReport {
    for plan in plans {
        match rewrite::apply(plan, &mut document) {
            Ok(entry) => report.changes.push(entry),
            Err(e) => return restore(coordinator, report, Stage::Apply, e),
        }
    }

    let bytes = match document.serialize() {
        Ok(bytes) => bytes,
        Err(e) => return restore(coordinator, report, Stage::Serialize, e),
    };

    if dry_run {
        tracing::info!(
            path = %report.path.display(),
            changes = report.changes.len(),
            "Dry run; project left untouched"
        );
        report.outcome = DocumentOutcome::DryRun;
        return report;
    }

    match coordinator.commit(&bytes) {
        Ok(()) => {
            tracing::info!(
                path = %report.path.display(),
                changes = report.changes.len(),
                "Project rewritten"
            );
            report.outcome = DocumentOutcome::Committed;
            report.backup_path = coordinator.backup_path().map(Path::to_path_buf);
            report
        }
        Err(e) if coordinator.state() == BackupState::RolledBack => {
            report.roll_back(Stage::Commit, e)
        }
        Err(e) => report.fail(Stage::Commit, e),
    }
}

fn restore(
    coordinator: &mut BackupCoordinator<'_>,
    report: DocumentReport,
    stage: Stage,
    error: FixerError,
) -> DocumentReport {
    tracing::warn!(path = %report.path.display(), %stage, error = %error, "Rewrite failed");
    match coordinator.roll_back() {
        Ok(()) => report.roll_back(stage, error),
        Err(restore) => report.fail(stage, format!("{}; restore failed: {}", error, restore)),
    }
}
