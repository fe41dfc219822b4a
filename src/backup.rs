//! Snapshot, commit and rollback for one project file.
//!
//! ```text
//! Idle --snapshot--> Snapshotted --commit--> Committed
//!                         |  \--commit fails--> RolledBack
//!                         \----roll_back-----> RolledBack
//! ```
//!
//! The original is never overwritten before a digest-verified copy of it
//! exists. Restores always go through [`TempFileWriter`], so a broken
//! commit writer cannot also break the rollback.

use crate::config::SafetySettings;
use crate::error::{FixerError, Result};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackupState {
    Idle,
    Snapshotted,
    Committed,
    RolledBack,
}

impl BackupState {
    fn as_str(&self) -> &'static str {
        match self {
            BackupState::Idle => "idle",
            BackupState::Snapshotted => "snapshotted",
            BackupState::Committed => "committed",
            BackupState::RolledBack => "rolled back",
        }
    }
}

/// Replaces a file's content in one step: readers see either the old bytes
/// or the new ones.
pub trait AtomicWriter: Send + Sync {
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
}

/// Writes into a temp file next to the target, syncs it, then renames it
/// over the target. An existing target keeps its permissions.
#[derive(Debug, Default, Clone, Copy)]
pub struct TempFileWriter;

impl TempFileWriter {
    /// Like [`AtomicWriter::write_atomic`], but the result gets `permissions`
    /// instead of the current target's.
    pub fn write_atomic_with(
        &self,
        path: &Path,
        bytes: &[u8],
        permissions: Option<fs::Permissions>,
    ) -> io::Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(bytes)?;
        if let Some(permissions) = permissions {
            temp.as_file().set_permissions(permissions)?;
        }
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl AtomicWriter for TempFileWriter {
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        let permissions = fs::metadata(path).ok().map(|meta| meta.permissions());
        self.write_atomic_with(path, bytes, permissions)
    }
}

struct Snapshot {
    bytes: Vec<u8>,
    digest: md5::Digest,
    on_disk: bool,
    permissions: Option<fs::Permissions>,
}

pub struct BackupCoordinator<'a> {
    original: PathBuf,
    backup: PathBuf,
    safety: &'a SafetySettings,
    writer: &'a dyn AtomicWriter,
    state: BackupState,
    snapshot: Option<Snapshot>,
}

impl<'a> BackupCoordinator<'a> {
    pub fn new(original: &Path, safety: &'a SafetySettings, writer: &'a dyn AtomicWriter) -> Self {
        BackupCoordinator {
            original: original.to_path_buf(),
            backup: safety.backup_path_for(original),
            safety,
            writer,
            state: BackupState::Idle,
            snapshot: None,
        }
    }

    pub fn state(&self) -> BackupState {
        self.state
    }

    /// Backup file that exists on disk right now, if any.
    pub fn backup_path(&self) -> Option<&Path> {
        match &self.snapshot {
            Some(snapshot) if snapshot.on_disk && self.backup.exists() => Some(&self.backup),
            _ => None,
        }
    }

    /// Capture the original bytes. On a real run, or whenever
    /// `create_backup` is set, the copy is written next to the original and
    /// verified by digest before this returns.
    pub fn snapshot(&mut self) -> Result<()> {
        self.expect_state(BackupState::Idle, "snapshot")?;

        let bytes = fs::read(&self.original)
            .map_err(|e| self.backup_error(format!("cannot read original: {}", e)))?;
        let digest = md5::compute(&bytes);
        let permissions = fs::metadata(&self.original)
            .ok()
            .map(|meta| meta.permissions());
        let on_disk = !self.safety.dry_run || self.safety.create_backup;

        if on_disk {
            TempFileWriter
                .write_atomic_with(&self.backup, &bytes, permissions.clone())
                .map_err(|e| self.backup_error(format!("cannot write backup: {}", e)))?;
            let copied = fs::read(&self.backup)
                .map_err(|e| self.backup_error(format!("cannot re-read backup: {}", e)))?;
            let copied_digest = md5::compute(&copied);
            if copied_digest != digest {
                return Err(self.backup_error(format!(
                    "backup digest {:x} does not match original {:x}",
                    copied_digest, digest
                )));
            }
        }

        tracing::debug!(
            path = %self.original.display(),
            backup = %self.backup.display(),
            on_disk,
            digest = %format!("{:x}", digest),
            "Snapshot taken"
        );
        self.snapshot = Some(Snapshot {
            bytes,
            digest,
            on_disk,
            permissions,
        });
        self.state = BackupState::Snapshotted;
        Ok(())
    }

    /// Atomically replace the original with `bytes`. A failed write rolls
    /// the original back before the error is returned.
    pub fn commit(&mut self, bytes: &[u8]) -> Result<()> {
        self.expect_state(BackupState::Snapshotted, "commit")?;
        if self.safety.dry_run {
            return Err(FixerError::InvalidTransition {
                action: "commit",
                state: "in dry-run mode",
            });
        }

        if let Err(source) = self.writer.write_atomic(&self.original, bytes) {
            tracing::warn!(
                path = %self.original.display(),
                error = %source,
                "Write failed; restoring original"
            );
            if let Err(restore) = self.roll_back() {
                tracing::error!(
                    path = %self.original.display(),
                    backup = %self.backup.display(),
                    error = %restore,
                    "Restore failed; the backup file holds the original"
                );
            }
            return Err(FixerError::Write {
                path: self.original.clone(),
                source,
            });
        }

        self.state = BackupState::Committed;
        if !self.safety.create_backup {
            if let Err(e) = fs::remove_file(&self.backup) {
                tracing::warn!(
                    backup = %self.backup.display(),
                    error = %e,
                    "Could not remove temporary backup"
                );
            }
        }
        Ok(())
    }

    /// Restore the snapshot over the original. The backup file is kept.
    pub fn roll_back(&mut self) -> Result<()> {
        self.expect_state(BackupState::Snapshotted, "roll back")?;
        let Some(snapshot) = &self.snapshot else {
            return Err(FixerError::InvalidTransition {
                action: "roll back",
                state: "without a snapshot",
            });
        };

        let bytes = if snapshot.on_disk {
            match fs::read(&self.backup) {
                Ok(copied) if md5::compute(&copied) == snapshot.digest => copied,
                Ok(_) | Err(_) => {
                    tracing::warn!(
                        backup = %self.backup.display(),
                        "Backup file changed or vanished; restoring from memory"
                    );
                    snapshot.bytes.clone()
                }
            }
        } else {
            snapshot.bytes.clone()
        };

        TempFileWriter
            .write_atomic_with(&self.original, &bytes, snapshot.permissions.clone())
            .map_err(|e| self.backup_error(format!("cannot restore original: {}", e)))?;
        self.state = BackupState::RolledBack;
        tracing::info!(path = %self.original.display(), "Original restored");
        Ok(())
    }

    fn expect_state(&self, wanted: BackupState, action: &'static str) -> Result<()> {
        if self.state == wanted {
            Ok(())
        } else {
            Err(FixerError::InvalidTransition {
                action,
                state: self.state.as_str(),
            })
        }
    }

    fn backup_error(&self, reason: String) -> FixerError {
        FixerError::Backup {
            path: self.original.clone(),
            backup: self.backup.clone(),
            reason,
        }
    }
}
