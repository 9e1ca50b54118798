//! Per-worker snapshot files in a shared hits directory
//!
//! Each worker owns exactly two files:
//!
//! - `hits-<worker>.json`: JSON array of `METHOD /path` strings
//! - `errors-<worker>.json`: JSON object of endpoint key to [`ServerErrorRecord`]
//!
//! Every write goes to a temp file in the same directory which is then renamed
//! over the target, so a reader sees either the previous or the new snapshot.

use crate::error::{CoverageError, Result};
use apicov_api::ServerErrorRecord;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const HITS_PREFIX: &str = "hits-";
const ERRORS_PREFIX: &str = "errors-";
const SUFFIX: &str = ".json";

/// Error map as persisted in an errors file.
pub type ErrorMap = BTreeMap<String, ServerErrorRecord>;

/// A fresh random worker id.
pub fn generate_worker_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Restrict a worker id to characters that are safe in a file name.
pub fn sanitize_worker_id(id: &str) -> String {
    let cleaned: String = id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        generate_worker_id()
    } else {
        cleaned
    }
}

/// The files owned by one worker.
#[derive(Debug, Clone)]
pub struct WorkerStore {
    dir: PathBuf,
    worker_id: String,
}

impl WorkerStore {
    pub fn new(dir: impl Into<PathBuf>, worker_id: &str) -> Self {
        Self {
            dir: dir.into(),
            worker_id: sanitize_worker_id(worker_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn hits_path(&self) -> PathBuf {
        self.dir
            .join(format!("{HITS_PREFIX}{}{SUFFIX}", self.worker_id))
    }

    pub fn errors_path(&self) -> PathBuf {
        self.dir
            .join(format!("{ERRORS_PREFIX}{}{SUFFIX}", self.worker_id))
    }

    /// Replace the hits file with `hits`.
    pub fn write_hits(&self, hits: &[String]) -> Result<()> {
        write_json_atomic(&self.hits_path(), &hits)
    }

    /// Replace the errors file with `errors`.
    pub fn write_errors(&self, errors: &ErrorMap) -> Result<()> {
        write_json_atomic(&self.errors_path(), errors)
    }
}

/// Write `value` as pretty JSON to `path` via temp file and rename.
///
/// The parent directory is created if missing.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| CoverageError::io(&dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| CoverageError::io(&dir, e))?;
    serde_json::to_writer_pretty(&mut tmp, value)
        .map_err(|e| CoverageError::io(path, std::io::Error::from(e)))?;
    tmp.write_all(b"\n")
        .and_then(|_| tmp.flush())
        .map_err(|e| CoverageError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| CoverageError::io(path, e.error))?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Read a JSON file, treating a missing file as `None`.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CoverageError::io(path, e)),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| CoverageError::CorruptFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Hit list of a worker file; missing means empty.
pub fn read_hits(path: &Path) -> Result<Vec<String>> {
    Ok(read_json(path)?.unwrap_or_default())
}

/// Error map of a worker file; missing means empty.
pub fn read_errors(path: &Path) -> Result<ErrorMap> {
    Ok(read_json(path)?.unwrap_or_default())
}

/// Worker ids with at least one file in `dir`, sorted.
pub fn discover_workers(dir: &Path) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CoverageError::io(dir, e)),
    };

    let mut ids = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|e| CoverageError::io(dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(id) = worker_id_from_file_name(name) {
            ids.insert(id.to_string());
        }
    }
    Ok(ids.into_iter().collect())
}

fn worker_id_from_file_name(name: &str) -> Option<&str> {
    let stem = name.strip_suffix(SUFFIX)?;
    let id = stem
        .strip_prefix(HITS_PREFIX)
        .or_else(|| stem.strip_prefix(ERRORS_PREFIX))?;
    (!id.is_empty()).then_some(id)
}

/// Everything one worker has persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerSnapshot {
    pub worker_id: String,
    pub hits: Vec<String>,
    pub errors: ErrorMap,
}

impl WorkerSnapshot {
    /// Read one worker's files. Unreadable files are logged and treated as empty.
    pub fn read(dir: &Path, worker_id: &str) -> Self {
        let store = WorkerStore::new(dir, worker_id);
        let hits = read_hits(&store.hits_path()).unwrap_or_else(|e| {
            warn!("Skipping hits of worker {}: {}", worker_id, e);
            Vec::new()
        });
        let errors = read_errors(&store.errors_path()).unwrap_or_else(|e| {
            warn!("Skipping errors of worker {}: {}", worker_id, e);
            ErrorMap::new()
        });
        Self {
            worker_id: worker_id.to_string(),
            hits,
            errors,
        }
    }
}

/// Snapshots of every worker in `dir` except `exclude`, in worker-id order.
pub fn load_snapshots(dir: &Path, exclude: Option<&str>) -> Vec<WorkerSnapshot> {
    let ids: Vec<String> = match discover_workers(dir) {
        Ok(ids) => ids
            .into_iter()
            .filter(|id| Some(id.as_str()) != exclude)
            .collect(),
        Err(e) => {
            warn!("Cannot list hits directory: {}", e);
            return Vec::new();
        }
    };

    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        ids.par_iter()
            .map(|id| WorkerSnapshot::read(dir, id))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        ids.iter().map(|id| WorkerSnapshot::read(dir, id)).collect()
    }
}

/// Delete every worker file in `dir`, returning how many were removed.
pub fn clean(dir: &Path) -> Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(CoverageError::io(dir, e)),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| CoverageError::io(dir, e))?;
        let name = entry.file_name();
        let is_worker_file = name.to_str().and_then(worker_id_from_file_name).is_some();
        if is_worker_file {
            let path = entry.path();
            std::fs::remove_file(&path).map_err(|e| CoverageError::io(&path, e))?;
            removed += 1;
        }
    }
    Ok(removed)
}
