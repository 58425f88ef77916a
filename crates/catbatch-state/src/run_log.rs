//! Human-readable run log.
//!
//! Every message goes to `tracing` and, when a file is configured, is also
//! appended as a `<timestamp>: <message>` line. The file is a convenience for
//! operators; failing to write it never fails the run.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;

use crate::error::{self, StateError};

const LINE_TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Clone, Copy)]
enum Level {
    Info,
    Warn,
    Error,
}

/// Dual-sink run log; cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct RunLog {
    sink: Option<(PathBuf, Mutex<File>)>,
}

impl RunLog {
    /// Open the log file at `path`, truncating it when `truncate` is set.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the file or its directory cannot be created.
    pub fn create(path: &Path, truncate: bool) -> error::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StateError::io(parent, e))?;
        }
        let mut options = OpenOptions::new();
        options.create(true);
        if truncate {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options.open(path).map_err(|e| StateError::io(path, e))?;
        Ok(Self {
            sink: Some((path.to_path_buf(), Mutex::new(file))),
        })
    }

    /// A log that only emits `tracing` events.
    #[must_use]
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.sink.as_ref().map(|(path, _)| path.as_path())
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.write(Level::Info, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.write(Level::Warn, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.write(Level::Error, message.as_ref());
    }

    fn write(&self, level: Level, message: &str) {
        match level {
            Level::Info => tracing::info!("{message}"),
            Level::Warn => tracing::warn!("{message}"),
            Level::Error => tracing::error!("{message}"),
        }
        let Some((path, file)) = &self.sink else {
            return;
        };
        let line = format!("{}: {message}\n", Local::now().format(LINE_TIMESTAMP_FMT));
        let result = match file.lock() {
            Ok(mut guard) => guard.write_all(line.as_bytes()),
            Err(_) => {
                tracing::error!(path = %path.display(), "Run log lock poisoned");
                return;
            }
        };
        if let Err(e) = result {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "Failed to write run log"
            );
        }
    }

    /// Flush buffered log lines to disk.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the sync fails and
    /// [`StateError::LockPoisoned`] if a writer panicked.
    pub fn flush(&self) -> error::Result<()> {
        let Some((path, file)) = &self.sink else {
            return Ok(());
        };
        let guard = file.lock().map_err(|_| StateError::LockPoisoned)?;
        guard.sync_data().map_err(|e| StateError::io(path, e))
    }
}
