//! Entity-list files: loading with projection and dedup, and writing listings.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;

use catbatch_state::{RunLog, StateError};
use catbatch_types::{EntityKey, Granularity};

/// Keys read from an entity list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputLoad {
    /// Unique keys at the target granularity, in order of first appearance.
    pub keys: Vec<EntityKey>,
    pub malformed: u64,
    pub duplicates: u64,
    pub header_skipped: bool,
}

/// Read an entity list whose lines carry `fields` components and project
/// every key to `target`.
///
/// Blank and unparsable lines are logged as skipped and counted; the
/// canonical header line is skipped silently.
///
/// # Errors
///
/// Returns [`StateError::MissingInput`] if the file does not exist and
/// [`StateError::Io`] if it cannot be read.
pub fn load_entities(
    path: &Path,
    fields: Granularity,
    target: Granularity,
    log: &RunLog,
) -> Result<InputLoad, StateError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log.error(format!("Error: File {} not found!", path.display()));
            return Err(StateError::MissingInput {
                path: path.to_path_buf(),
            });
        }
        Err(e) => {
            return Err(StateError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let mut load = InputLoad::default();
    let mut seen = HashSet::new();
    for (number, raw) in BufReader::new(file).split(b'\n').enumerate() {
        let raw = raw.map_err(|e| StateError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let Ok(line) = String::from_utf8(raw) else {
            log.warn(format!(
                "Skipping invalid line: line {} is not valid UTF-8",
                number + 1
            ));
            load.malformed += 1;
            continue;
        };
        let trimmed = line.trim();
        if is_header(trimmed) {
            load.header_skipped = true;
            continue;
        }
        let key = match EntityKey::parse(trimmed, fields) {
            Ok(key) => key,
            Err(e) => {
                log.warn(format!("Skipping invalid line: {trimmed} - {e}"));
                load.malformed += 1;
                continue;
            }
        };
        let Some(key) = key.project(target) else {
            log.warn(format!(
                "Skipping invalid line: {trimmed} - {fields} key cannot address a {target}"
            ));
            load.malformed += 1;
            continue;
        };
        if seen.insert(key.to_string()) {
            load.keys.push(key);
        } else {
            load.duplicates += 1;
        }
    }

    tracing::info!(
        path = %path.display(),
        keys = load.keys.len(),
        malformed = load.malformed,
        duplicates = load.duplicates,
        "Entity list loaded"
    );
    Ok(load)
}

fn is_header(line: &str) -> bool {
    [Granularity::Table, Granularity::Column]
        .iter()
        .any(|g| line.eq_ignore_ascii_case(g.header()))
}

/// Write keys one per line, optionally preceded by a header, replacing the file.
///
/// # Errors
///
/// Returns [`StateError::Io`] if the file cannot be written.
pub fn write_entities(
    path: &Path,
    keys: &[EntityKey],
    header: Option<&str>,
) -> Result<(), StateError> {
    let io = |e| StateError::Io {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io)?;
    }
    let mut out = BufWriter::new(File::create(path).map_err(io)?);
    if let Some(header) = header {
        writeln!(out, "{header}").map_err(io)?;
    }
    for key in keys {
        writeln!(out, "{key}").map_err(io)?;
    }
    out.flush().map_err(io)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(content: &str, fields: Granularity, target: Granularity) -> InputLoad {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        std::fs::write(&path, content).unwrap();
        load_entities(&path, fields, target, &RunLog::disabled()).unwrap()
    }

    #[test]
    fn malformed_and_duplicate_lines() {
        let result = load(
            "db1,tbl1\ndb1,tbl2\nmalformed_line\ndb1,tbl1\n",
            Granularity::Table,
            Granularity::Table,
        );
        let keys: Vec<String> = result.keys.iter().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["db1,tbl1", "db1,tbl2"]);
        assert_eq!(result.malformed, 1);
        assert_eq!(result.duplicates, 1);
    }

    #[test]
    fn blank_lines_and_whitespace() {
        let result = load(
            "  db1 , t1 \n\n,t2\ndb1,\n",
            Granularity::Table,
            Granularity::Table,
        );
        assert_eq!(result.keys, vec![EntityKey::table("db1", "t1").unwrap()]);
        assert_eq!(result.malformed, 3);
    }

    #[test]
    fn column_list_projects_to_tables() {
        let result = load(
            "DatabaseName,TableName,ColumnName\ndb,t1,a\ndb,t1,b\ndb,t2,a\n",
            Granularity::Column,
            Granularity::Table,
        );
        assert!(result.header_skipped);
        let keys: Vec<String> = result.keys.iter().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["db,t1", "db,t2"]);
        assert_eq!(result.duplicates, 1);
        assert_eq!(result.malformed, 0);
    }

    #[test]
    fn two_field_line_in_column_file_is_malformed() {
        let result = load("db,t,c\ndb,t\n", Granularity::Column, Granularity::Column);
        assert_eq!(result.keys.len(), 1);
        assert_eq!(result.malformed, 1);
    }

    #[test]
    fn missing_file_is_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_entities(
            &dir.path().join("absent.txt"),
            Granularity::Table,
            Granularity::Table,
            &RunLog::disabled(),
        )
        .unwrap_err();
        assert!(matches!(err, StateError::MissingInput { .. }));
    }

    #[test]
    fn skipped_lines_reach_run_log() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        let log_path = dir.path().join("run.log");
        std::fs::write(&input, "db,t\ndbonly\n").unwrap();
        let log = RunLog::create(&log_path, true).unwrap();

        load_entities(&input, Granularity::Table, Granularity::Table, &log).unwrap();
        drop(log);

        let content = std::fs::read_to_string(log_path).unwrap();
        assert_eq!(content.matches("Skipping invalid line: dbonly").count(), 1);
    }

    #[test]
    fn non_utf8_line_is_skipped_and_loading_continues() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.txt");
        let log_path = dir.path().join("run.log");
        std::fs::write(&input, b"db,a\ndb,\xff\xfe\ndb,b\n").unwrap();
        let log = RunLog::create(&log_path, true).unwrap();

        let result = load_entities(&input, Granularity::Table, Granularity::Table, &log).unwrap();
        drop(log);

        let keys: Vec<String> = result.keys.iter().map(ToString::to_string).collect();
        assert_eq!(keys, vec!["db,a", "db,b"]);
        assert_eq!(result.malformed, 1);
        let content = std::fs::read_to_string(log_path).unwrap();
        assert!(content.contains("Skipping invalid line: line 2 is not valid UTF-8"));
    }

    #[test]
    fn written_listing_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("all_columns.txt");
        let keys = vec![
            EntityKey::column("db", "t", "a").unwrap(),
            EntityKey::column("db", "t", "b").unwrap(),
        ];
        write_entities(&path, &keys, Some(Granularity::Column.header())).unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "DatabaseName,TableName,ColumnName\ndb,t,a\ndb,t,b\n"
        );
        let loaded = load_entities(
            &path,
            Granularity::Column,
            Granularity::Column,
            &RunLog::disabled(),
        )
        .unwrap();
        assert_eq!(loaded.keys, keys);
    }
}
