//! Single-writer recorder.
//!
//! Workers never touch the checkpoint log or output files. They send a
//! [`Command`] over a bounded channel and wait for the acknowledgement; one
//! blocking task owns every file handle and applies commands in arrival
//! order. A success counts only once it has been acknowledged.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use catbatch_state::{CheckpointStore, StateError};
use catbatch_types::EntityKey;

use crate::operation::{OutputKind, OutputLine};

/// Why a record could not be written.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("recorder stopped")]
    Closed,

    #[error("recorder task failed: {0}")]
    Task(String),
}

enum Command {
    Record {
        key: EntityKey,
        lines: Vec<OutputLine>,
        ack: oneshot::Sender<Result<bool, StateError>>,
    },
    Sync {
        ack: oneshot::Sender<Result<(), StateError>>,
    },
}

/// Append handle on one output file.
#[derive(Debug)]
pub struct OutputSink {
    path: PathBuf,
    file: File,
}

impl OutputSink {
    /// Open `path` for appending, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the file cannot be opened.
    pub fn append(path: &Path) -> Result<Self, StateError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StateError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StateError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    fn write_line(&mut self, line: &str) -> Result<(), StateError> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        self.file
            .write_all(buf.as_bytes())
            .map_err(|e| StateError::Io {
                path: self.path.clone(),
                source: e,
            })
    }
}

/// Everything the recorder owned, returned on close.
#[derive(Debug)]
pub struct RecorderSummary {
    pub checkpoint: Option<CheckpointStore>,
    /// Records acknowledged as written.
    pub recorded: u64,
    pub output_lines: u64,
    /// Failure of the final checkpoint sync, if any.
    pub sync_error: Option<StateError>,
}

struct RecorderState {
    checkpoint: Option<CheckpointStore>,
    outputs: HashMap<OutputKind, OutputSink>,
    recorded: u64,
    output_lines: u64,
}

impl RecorderState {
    fn record(&mut self, key: &EntityKey, lines: &[OutputLine]) -> Result<bool, StateError> {
        for line in lines {
            match self.outputs.get_mut(&line.kind) {
                Some(sink) => {
                    sink.write_line(&line.line)?;
                    self.output_lines += 1;
                }
                None => tracing::debug!(
                    output = line.kind.as_str(),
                    entity = %key,
                    "No file configured for output, dropping line"
                ),
            }
        }
        // Outputs first: a crash in between re-applies the entity on the next
        // run instead of losing its output.
        let newly = match self.checkpoint.as_mut() {
            Some(store) => store.mark_done(key)?,
            None => true,
        };
        self.recorded += 1;
        Ok(newly)
    }

    fn sync(&mut self) -> Result<(), StateError> {
        match self.checkpoint.as_mut() {
            Some(store) => store.sync(),
            None => Ok(()),
        }
    }
}

/// Cloneable sender side used by workers.
#[derive(Debug, Clone)]
pub struct RecorderHandle {
    tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Record { key, lines, .. } => f
                .debug_struct("Record")
                .field("key", key)
                .field("lines", &lines.len())
                .finish_non_exhaustive(),
            Self::Sync { .. } => f.write_str("Sync"),
        }
    }
}

impl RecorderHandle {
    /// Record a confirmed success and wait until it is written.
    ///
    /// Returns `false` if the key was already checkpointed.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::State`] if a write failed and
    /// [`RecordError::Closed`] if the recorder is gone.
    pub async fn record(&self, key: EntityKey, lines: Vec<OutputLine>) -> Result<bool, RecordError> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(Command::Record { key, lines, ack })
            .await
            .map_err(|_| RecordError::Closed)?;
        Ok(rx.await.map_err(|_| RecordError::Closed)??)
    }

    /// Force checkpoint lines written so far to stable storage.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::State`] if the sync failed and
    /// [`RecordError::Closed`] if the recorder is gone.
    pub async fn sync(&self) -> Result<(), RecordError> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(Command::Sync { ack })
            .await
            .map_err(|_| RecordError::Closed)?;
        Ok(rx.await.map_err(|_| RecordError::Closed)??)
    }
}

/// Owner of the recorder task.
#[derive(Debug)]
pub struct Recorder {
    handle: RecorderHandle,
    task: JoinHandle<RecorderSummary>,
}

impl Recorder {
    /// Start the recorder on a blocking thread.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn(
        checkpoint: Option<CheckpointStore>,
        outputs: HashMap<OutputKind, OutputSink>,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let state = RecorderState {
            checkpoint,
            outputs,
            recorded: 0,
            output_lines: 0,
        };
        let task = tokio::task::spawn_blocking(move || run(state, rx));
        Self {
            handle: RecorderHandle { tx },
            task,
        }
    }

    #[must_use]
    pub fn handle(&self) -> RecorderHandle {
        self.handle.clone()
    }

    /// Stop accepting records, drain the queue, sync and return the state.
    ///
    /// Waits for every outstanding [`RecorderHandle`] to be dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Task`] if the recorder task panicked.
    pub async fn close(self) -> Result<RecorderSummary, RecordError> {
        drop(self.handle);
        self.task
            .await
            .map_err(|e| RecordError::Task(e.to_string()))
    }
}

fn run(mut state: RecorderState, mut rx: mpsc::Receiver<Command>) -> RecorderSummary {
    while let Some(command) = rx.blocking_recv() {
        match command {
            Command::Record { key, lines, ack } => {
                let result = state.record(&key, &lines);
                if let Err(e) = &result {
                    tracing::error!(entity = %key, error = %e, "Failed to record success");
                }
                // A dropped receiver means the worker is gone; nothing to tell.
                let _ = ack.send(result);
            }
            Command::Sync { ack } => {
                let _ = ack.send(state.sync());
            }
        }
    }

    let sync_error = state.sync().err();
    if let Some(e) = &sync_error {
        tracing::error!(error = %e, "Final checkpoint sync failed");
    }
    tracing::debug!(
        recorded = state.recorded,
        output_lines = state.output_lines,
        "Recorder drained"
    );
    RecorderSummary {
        checkpoint: state.checkpoint,
        recorded: state.recorded,
        output_lines: state.output_lines,
        sync_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(t: &str) -> EntityKey {
        EntityKey::table("db", t).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_records_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint_path = dir.path().join("processed.txt");
        let results_path = dir.path().join("results.txt");
        let store = CheckpointStore::open(&checkpoint_path).unwrap();
        let mut outputs = HashMap::new();
        outputs.insert(
            OutputKind::Results,
            OutputSink::append(&results_path).unwrap(),
        );
        let recorder = Recorder::spawn(Some(store), outputs, 8);

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..200 {
            let handle = recorder.handle();
            tasks.spawn(async move {
                let k = key(&format!("t{i}"));
                let line = OutputLine::new(OutputKind::Results, k.to_string());
                handle.record(k, vec![line]).await
            });
        }
        while let Some(joined) = tasks.join_next().await {
            assert!(joined.unwrap().unwrap());
        }

        let summary = recorder.close().await.unwrap();
        assert_eq!(summary.recorded, 200);
        assert!(summary.sync_error.is_none());
        assert_eq!(summary.checkpoint.unwrap().len(), 200);

        let checkpoint = std::fs::read_to_string(&checkpoint_path).unwrap();
        assert_eq!(checkpoint.lines().count(), 200);
        assert!(checkpoint.lines().all(|l| l.starts_with("db,t")));
        let results = std::fs::read_to_string(&results_path).unwrap();
        assert_eq!(results.lines().count(), 200);
    }

    #[tokio::test]
    async fn recording_twice_reports_already_done() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::open(&dir.path().join("processed.txt")).unwrap();
        let recorder = Recorder::spawn(Some(store), HashMap::new(), 4);
        let handle = recorder.handle();

        assert!(handle.record(key("a"), vec![]).await.unwrap());
        assert!(!handle.record(key("a"), vec![]).await.unwrap());
        handle.sync().await.unwrap();
        drop(handle);

        let summary = recorder.close().await.unwrap();
        assert_eq!(summary.checkpoint.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lines_for_unconfigured_outputs_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("existing.txt");
        let mut outputs = HashMap::new();
        outputs.insert(OutputKind::Existing, OutputSink::append(&existing).unwrap());
        let recorder = Recorder::spawn(None, outputs, 4);
        let handle = recorder.handle();

        handle
            .record(
                key("a"),
                vec![
                    OutputLine::new(OutputKind::Existing, "db,a"),
                    OutputLine::new(OutputKind::Missing, "db,a"),
                ],
            )
            .await
            .unwrap();
        drop(handle);

        let summary = recorder.close().await.unwrap();
        assert!(summary.checkpoint.is_none());
        assert_eq!(summary.output_lines, 1);
        assert_eq!(std::fs::read_to_string(existing).unwrap(), "db,a\n");
    }
}
