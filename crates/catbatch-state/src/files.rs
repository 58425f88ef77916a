//! Backup-before-write discipline for line-oriented state files.
//!
//! Every file a run is about to truncate, append to or replace is first
//! copied to a timestamped backup. Copies and truncations are retried with
//! the configured [`RetryPolicy`] since they mostly fail on transient
//! contention (shared or network file systems).

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use catbatch_types::RetryPolicy;
use chrono::Local;

use crate::error::{self, StateError};
use crate::run_log::RunLog;

/// `strftime` pattern of the timestamp embedded in backup names.
pub const BACKUP_TIMESTAMP_FMT: &str = "%Y%m%d_%H%M%S";

/// Where backups are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupMode {
    /// All backups go into one shared directory as `<name>_<ts>.bak`.
    Directory(PathBuf),
    /// Each backup sits next to its file as `<path>.<ts>.bak`.
    Sibling,
}

/// Whether a failed backup aborts the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    Optional,
}

/// A state file taking part in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateFile {
    pub path: PathBuf,
    pub requirement: Requirement,
}

impl StateFile {
    #[must_use]
    pub fn required(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            requirement: Requirement::Required,
        }
    }

    #[must_use]
    pub fn optional(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            requirement: Requirement::Optional,
        }
    }
}

/// What [`StateFileManager::backup_and_rotate`] did.
#[derive(Debug, Default)]
pub struct BackupReport {
    /// `(source, backup)` pairs that were written.
    pub backed_up: Vec<(PathBuf, PathBuf)>,
    /// Files that did not exist or were empty.
    pub skipped: Vec<PathBuf>,
    /// Optional files whose backup failed.
    pub failed_optional: Vec<PathBuf>,
    /// Old backups removed by retention.
    pub pruned: Vec<PathBuf>,
}

/// Applies backup, truncate and replace operations to state files.
#[derive(Debug, Clone)]
pub struct StateFileManager {
    mode: BackupMode,
    retry: RetryPolicy,
    keep_backups: Option<usize>,
}

impl StateFileManager {
    #[must_use]
    pub fn new(mode: BackupMode, retry: RetryPolicy) -> Self {
        Self {
            mode,
            retry,
            keep_backups: None,
        }
    }

    /// Keep at most `keep` backups per file; older ones are pruned.
    #[must_use]
    pub fn with_retention(mut self, keep: Option<usize>) -> Self {
        self.keep_backups = keep;
        self
    }

    #[must_use]
    pub fn mode(&self) -> &BackupMode {
        &self.mode
    }

    /// Back up every existing, non-empty file.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Backup`] for the first [`Requirement::Required`]
    /// file whose backup still fails after retries. Optional failures are
    /// logged and listed in the report.
    pub fn backup_and_rotate(
        &self,
        files: &[StateFile],
        log: &RunLog,
    ) -> error::Result<BackupReport> {
        let mut report = BackupReport::default();
        for file in files {
            let outcome = self
                .retry
                .run_blocking("backup", |_| self.backup_one(&file.path));
            match outcome {
                Ok(Some(backup)) => {
                    log.info(format!(
                        "Backed up file {} to {}",
                        file.path.display(),
                        backup.display()
                    ));
                    report.pruned.extend(self.prune(&file.path));
                    report.backed_up.push((file.path.clone(), backup));
                }
                Ok(None) => report.skipped.push(file.path.clone()),
                Err(e) => match file.requirement {
                    Requirement::Required => {
                        log.error(format!(
                            "Failed to backup file {}: {e}",
                            file.path.display()
                        ));
                        return Err(StateError::Backup {
                            path: file.path.clone(),
                            source: e,
                        });
                    }
                    Requirement::Optional => {
                        log.warn(format!(
                            "Failed to backup optional file {}: {e}",
                            file.path.display()
                        ));
                        report.failed_optional.push(file.path.clone());
                    }
                },
            }
        }
        Ok(report)
    }

    /// Copy one file to its backup location.
    ///
    /// Returns `Ok(None)` when the file does not exist or is empty.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the copy fails.
    pub fn backup_one(&self, path: &Path) -> std::io::Result<Option<PathBuf>> {
        let len = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if len == 0 {
            return Ok(None);
        }
        let target = self.backup_path(path)?;
        fs::copy(path, &target)?;
        Ok(Some(target))
    }

    /// Choose a backup path that does not exist yet.
    fn backup_path(&self, path: &Path) -> std::io::Result<PathBuf> {
        let stamp = Local::now().format(BACKUP_TIMESTAMP_FMT).to_string();
        let (dir, stem) = self.backup_location(path)?;
        fs::create_dir_all(&dir)?;
        let mut candidate = dir.join(format!("{stem}{stamp}.bak"));
        let mut n = 1u32;
        while candidate.exists() {
            candidate = dir.join(format!("{stem}{stamp}_{n}.bak"));
            n += 1;
        }
        Ok(candidate)
    }

    /// Directory and name prefix of backups for `path`.
    fn backup_location(&self, path: &Path) -> std::io::Result<(PathBuf, String)> {
        let name = path
            .file_name()
            .ok_or_else(|| {
                std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("{} has no file name", path.display()),
                )
            })?
            .to_string_lossy()
            .into_owned();
        Ok(match &self.mode {
            BackupMode::Directory(dir) => (dir.clone(), format!("{name}_")),
            BackupMode::Sibling => (
                path.parent()
                    .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
                format!("{name}."),
            ),
        })
    }

    /// Remove the oldest backups of `path` beyond the retention count.
    fn prune(&self, path: &Path) -> Vec<PathBuf> {
        let Some(keep) = self.keep_backups else {
            return Vec::new();
        };
        let Ok((dir, prefix)) = self.backup_location(path) else {
            return Vec::new();
        };
        let Ok(entries) = fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut backups: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy())
                    .is_some_and(|n| is_backup_name(&n, &prefix))
            })
            .collect();
        if backups.len() <= keep {
            return Vec::new();
        }
        // Timestamps sort lexicographically.
        backups.sort();
        let excess = backups.len() - keep;
        let mut pruned = Vec::new();
        for old in backups.into_iter().take(excess) {
            match fs::remove_file(&old) {
                Ok(()) => pruned.push(old),
                Err(e) => tracing::warn!(
                    backup = %old.display(),
                    error = %e,
                    "Failed to prune old backup"
                ),
            }
        }
        pruned
    }

    /// Truncate each path to empty, creating it (and its directory) if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] for the first path that still cannot be
    /// truncated after retries.
    pub fn initialize(&self, paths: &[PathBuf]) -> error::Result<()> {
        for path in paths {
            self.retry
                .run_blocking("initialize", |_| truncate(path))
                .map_err(|e| StateError::io(path, e))?;
        }
        Ok(())
    }

    /// Replace `dest` with the content of `src` after backing `dest` up.
    ///
    /// The new content is written to a temporary file in `dest`'s directory
    /// and renamed over `dest`, so readers never observe a partial file.
    /// Returns the backup path, if `dest` existed and was non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::MissingInput`] if `src` does not exist,
    /// [`StateError::Backup`] if `dest` cannot be backed up, and
    /// [`StateError::Io`] if the copy or rename fails.
    pub fn atomic_replace(
        &self,
        dest: &Path,
        src: &Path,
        log: &RunLog,
    ) -> error::Result<Option<PathBuf>> {
        if !src.exists() {
            log.error(format!("Source file {} not found!", src.display()));
            return Err(StateError::MissingInput {
                path: src.to_path_buf(),
            });
        }
        let report = self.backup_and_rotate(&[StateFile::required(dest)], log)?;
        let backup = report.backed_up.into_iter().next().map(|(_, b)| b);

        self.retry
            .run_blocking("replace", |_| copy_then_rename(src, dest))
            .map_err(|e| StateError::io(dest, e))?;
        log.info(format!(
            "Replaced {} with {}",
            dest.display(),
            src.display()
        ));
        Ok(backup)
    }
}

fn is_backup_name(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(".bak"))
        .is_some_and(|stamp| {
            stamp.len() >= BACKUP_TIMESTAMP_LEN
                && stamp
                    .chars()
                    .all(|c| c.is_ascii_digit() || c == '_')
        })
}

/// Length of a rendered [`BACKUP_TIMESTAMP_FMT`] (`20260101_120000`).
const BACKUP_TIMESTAMP_LEN: usize = 15;

fn truncate(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map(drop)
}

fn copy_then_rename(src: &Path, dest: &Path) -> std::io::Result<()> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    fs::create_dir_all(&dir)?;
    let content = fs::read(src)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(&content)?;
    tmp.as_file().sync_data()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}
