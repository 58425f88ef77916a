//! Append-only checkpoint log of successfully processed entities.
//!
//! One serialized [`EntityKey`] per line. The log is only ever appended to;
//! the in-memory [`CheckpointSet`] mirrors it and is mutated only through
//! [`CheckpointStore::mark_done`], which takes `&mut self` so a single owner
//! serializes all writes.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use catbatch_types::EntityKey;

use crate::error::{self, StateError};

/// Keys durably confirmed successful, compared on their serialized form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointSet {
    keys: HashSet<String>,
}

impl CheckpointSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.keys.contains(&key.to_string())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Serialized keys, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    fn insert(&mut self, key: &EntityKey) -> bool {
        self.keys.insert(key.to_string())
    }
}

impl FromIterator<EntityKey> for CheckpointSet {
    fn from_iter<I: IntoIterator<Item = EntityKey>>(iter: I) -> Self {
        let mut set = Self::new();
        for key in iter {
            set.insert(&key);
        }
        set
    }
}

/// Result of reading a checkpoint log.
#[derive(Debug, Default)]
pub struct CheckpointLoad {
    pub set: CheckpointSet,
    /// Lines that were blank, unparsable or torn.
    pub ignored: u64,
    /// The file ended without a newline (interrupted append).
    pub torn_tail: bool,
}

/// Durable checkpoint log plus its in-memory set.
pub struct CheckpointStore {
    path: PathBuf,
    set: CheckpointSet,
    file: File,
    unsynced: bool,
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore")
            .field("path", &self.path)
            .field("entries", &self.set.len())
            .finish_non_exhaustive()
    }
}

impl CheckpointStore {
    /// Read a checkpoint log, ignoring malformed lines.
    ///
    /// A missing file yields an empty set.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the file exists but cannot be read.
    pub fn load(path: &Path) -> error::Result<CheckpointLoad> {
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CheckpointLoad::default()),
            Err(e) => return Err(StateError::io(path, e)),
        };

        let mut load = CheckpointLoad::default();
        let mut lines: Vec<&[u8]> = content.split(|&b| b == b'\n').collect();
        // `split` yields a trailing empty slice for newline-terminated content;
        // anything else in the last slot is an interrupted append.
        if let Some(last) = lines.pop() {
            if !last.is_empty() {
                load.torn_tail = true;
                load.ignored += 1;
                tracing::warn!(
                    path = %path.display(),
                    fragment = %String::from_utf8_lossy(last),
                    "Ignoring torn final checkpoint line"
                );
            }
        }

        for raw in lines {
            let Ok(line) = std::str::from_utf8(raw) else {
                load.ignored += 1;
                tracing::debug!(
                    path = %path.display(),
                    line = %String::from_utf8_lossy(raw),
                    "Ignoring checkpoint line that is not valid UTF-8"
                );
                continue;
            };
            match EntityKey::parse_any(line) {
                Ok(key) => {
                    load.set.insert(&key);
                }
                Err(e) => {
                    load.ignored += 1;
                    tracing::debug!(
                        path = %path.display(),
                        line,
                        error = %e,
                        "Ignoring malformed checkpoint line"
                    );
                }
            }
        }

        Ok(load)
    }

    /// Load the log at `path` and open it for appending.
    ///
    /// Creates the file (and parent directories) if needed. A torn final line
    /// belongs to an append that never completed; it is cut off so the file
    /// matches the loaded set and later appends start on a fresh line.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the file cannot be read, created or opened.
    pub fn open(path: &Path) -> error::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StateError::io(parent, e))?;
        }
        let load = Self::load(path)?;
        if load.torn_tail {
            truncate_torn_tail(path)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StateError::io(path, e))?;
        if load.ignored > 0 {
            tracing::warn!(
                path = %path.display(),
                ignored = load.ignored,
                "Checkpoint contained malformed lines"
            );
        }
        tracing::info!(
            path = %path.display(),
            entries = load.set.len(),
            "Checkpoint loaded"
        );
        Ok(Self {
            path: path.to_path_buf(),
            set: load.set,
            file,
            unsynced: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn set(&self) -> &CheckpointSet {
        &self.set
    }

    #[must_use]
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.set.contains(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.set.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Append `key` to the log and add it to the set.
    ///
    /// Returns `false` without writing when the key is already recorded.
    /// The line is written with a single `write_all` so records never
    /// interleave.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the append fails; the set is left unchanged.
    pub fn mark_done(&mut self, key: &EntityKey) -> error::Result<bool> {
        if self.set.contains(key) {
            return Ok(false);
        }
        let line = format!("{key}\n");
        self.file
            .write_all(line.as_bytes())
            .map_err(|e| StateError::io(&self.path, e))?;
        self.set.insert(key);
        self.unsynced = true;
        Ok(true)
    }

    /// Force appended lines to stable storage.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the sync fails.
    pub fn sync(&mut self) -> error::Result<()> {
        if self.unsynced {
            self.file
                .sync_data()
                .map_err(|e| StateError::io(&self.path, e))?;
            self.unsynced = false;
        }
        Ok(())
    }

    /// Give up the file handle and keep the set.
    #[must_use]
    pub fn into_set(self) -> CheckpointSet {
        self.set
    }
}

/// Cut the file back to just after its last newline.
fn truncate_torn_tail(path: &Path) -> error::Result<()> {
    let content = std::fs::read(path).map_err(|e| StateError::io(path, e))?;
    let keep = content
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |pos| pos + 1);
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| StateError::io(path, e))?;
    file.set_len(keep as u64)
        .map_err(|e| StateError::io(path, e))?;
    file.sync_data().map_err(|e| StateError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(db: &str, t: &str) -> EntityKey {
        EntityKey::table(db, t).unwrap()
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let load = CheckpointStore::load(&dir.path().join("none.txt")).unwrap();
        assert!(load.set.is_empty());
        assert_eq!(load.ignored, 0);
    }

    #[test]
    fn load_ignores_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.txt");
        std::fs::write(&path, "db1,t1\n\n,broken\ndb1,t2\na,b,c,d\n").unwrap();

        let load = CheckpointStore::load(&path).unwrap();
        assert_eq!(load.set.len(), 2);
        assert!(load.set.contains(&key("db1", "t1")));
        assert!(load.set.contains(&key("db1", "t2")));
        assert_eq!(load.ignored, 3);
        assert!(!load.torn_tail);
    }

    #[test]
    fn non_utf8_lines_are_ignored_and_store_still_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.txt");
        std::fs::write(&path, b"db,a\n\xff\xfe\ndb,b\n").unwrap();

        let load = CheckpointStore::load(&path).unwrap();
        assert_eq!(load.set.len(), 2);
        assert_eq!(load.ignored, 1);
        assert!(!load.torn_tail);

        let mut store = CheckpointStore::open(&path).unwrap();
        assert!(store.contains(&key("db", "a")));
        store.mark_done(&key("db", "c")).unwrap();
        drop(store);
        assert_eq!(CheckpointStore::load(&path).unwrap().set.len(), 3);
    }

    #[test]
    fn torn_non_utf8_tail_is_cut_off() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.txt");
        std::fs::write(&path, b"db,a\ndb,\xff").unwrap();

        let store = CheckpointStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        drop(store);
        assert_eq!(std::fs::read(&path).unwrap(), b"db,a\n");
    }

    #[test]
    fn mark_done_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("processed.txt");

        let mut store = CheckpointStore::open(&path).unwrap();
        assert!(store.mark_done(&key("db1", "t1")).unwrap());
        assert!(store.mark_done(&key("db1", "t2")).unwrap());
        store.sync().unwrap();
        drop(store);

        let reopened = CheckpointStore::open(&path).unwrap();
        assert!(reopened.contains(&key("db1", "t1")));
        assert!(reopened.contains(&key("db1", "t2")));
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn mark_done_twice_writes_one_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.txt");
        let mut store = CheckpointStore::open(&path).unwrap();

        assert!(store.mark_done(&key("db", "t")).unwrap());
        assert!(!store.mark_done(&key("db", "t")).unwrap());

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "db,t\n");
    }

    #[test]
    fn torn_tail_is_ignored_and_cut_off() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.txt");
        std::fs::write(&path, "db1,t1\ndb1,t").unwrap();

        let load = CheckpointStore::load(&path).unwrap();
        assert!(load.torn_tail);
        assert_eq!(load.set.len(), 1);

        let mut store = CheckpointStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        store.mark_done(&key("db1", "t2")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "db1,t1\ndb1,t2\n");
    }

    #[test]
    fn torn_only_line_leaves_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.txt");
        std::fs::write(&path, "db1,t").unwrap();

        let store = CheckpointStore::open(&path).unwrap();
        assert!(store.is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn existing_content_is_appended_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.txt");
        std::fs::write(&path, "db0,t0\n").unwrap();

        let mut store = CheckpointStore::open(&path).unwrap();
        store.mark_done(&key("db1", "t1")).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "db0,t0\ndb1,t1\n"
        );
    }

    #[test]
    fn column_and_table_keys_are_distinct() {
        let set: CheckpointSet = [
            EntityKey::column("db", "t", "c").unwrap(),
            EntityKey::table("db", "t").unwrap(),
        ]
        .into_iter()
        .collect();
        assert_eq!(set.len(), 2);
        assert!(!set.contains(&EntityKey::column("db", "t", "d").unwrap()));
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        fn table_key() -> impl Strategy<Value = EntityKey> {
            ("[a-z][a-z0-9_]{0,6}", "[a-z][a-z0-9_]{0,6}")
                .prop_map(|(db, t)| EntityKey::table(&db, &t).unwrap())
        }

        proptest! {
            #[test]
            fn reopen_sees_exactly_the_marked_keys(
                keys in proptest::collection::vec(table_key(), 0..40)
            ) {
                let dir = tempfile::tempdir().unwrap();
                let path = dir.path().join("processed.txt");
                let mut store = CheckpointStore::open(&path).unwrap();
                for key in &keys {
                    store.mark_done(key).unwrap();
                }
                store.sync().unwrap();
                let written = store.into_set();

                let expected: CheckpointSet = keys.iter().cloned().collect();
                let reloaded = CheckpointStore::load(&path).unwrap();
                prop_assert_eq!(&written, &expected);
                prop_assert_eq!(&reloaded.set, &expected);
                prop_assert_eq!(reloaded.ignored, 0);
                let lines = std::fs::read_to_string(&path).unwrap().lines().count();
                prop_assert_eq!(lines, expected.len());
            }
        }
    }
}
