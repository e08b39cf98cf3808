use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use courier_redcap::{KeySpec, RecordKey};
use polars::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

use crate::frame::{ensure_columns, filter, normalize_keys, record_keys};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Polars(#[from] PolarsError),
    #[error("snapshot key {key} appears more than once")]
    DuplicateKey { key: RecordKey },
}

/// Persists one table per run as `{prefix}_report_{date}.csv` in `dir`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    prefix: String,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    /// Same-day reruns fall back to a timestamped name, then to a counter.
    pub fn snapshot_path(&self, now: NaiveDateTime) -> PathBuf {
        let daily = self
            .dir
            .join(format!("{}_report_{}.csv", self.prefix, now.format("%Y-%m-%d")));
        if !daily.exists() {
            return daily;
        }

        let stamp = now.format("%Y-%m-%d_%H-%M-%S").to_string();
        let stamped = self.dir.join(format!("{}_report_{}.csv", self.prefix, stamp));
        if !stamped.exists() {
            return stamped;
        }

        let mut n = 1;
        loop {
            let candidate = self
                .dir
                .join(format!("{}_report_{}_{}.csv", self.prefix, stamp, n));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn write(
        &self,
        df: &DataFrame,
        key: Option<KeySpec>,
        now: NaiveDateTime,
    ) -> Result<PathBuf, SnapshotError> {
        if let Some(key) = key {
            validate_unique_keys(df, key)?;
        }

        let path = self.snapshot_path(now);
        let mut file = File::create(&path).map_err(|source| SnapshotError::Io {
            path: path.clone(),
            source,
        })?;
        let mut out = df.clone();
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(&mut out)?;

        info!(path = %path.display(), rows = df.height(), "wrote snapshot");
        Ok(path)
    }
}

pub fn validate_unique_keys(df: &DataFrame, key: KeySpec) -> Result<(), SnapshotError> {
    let normalized = normalize_keys(df, key)?;
    let mut seen = HashSet::with_capacity(normalized.height());
    for key in record_keys(&normalized, key)? {
        if !seen.insert(key) {
            return Err(SnapshotError::DuplicateKey { key });
        }
    }
    Ok(())
}

/// Loads a snapshot with every column as a string. A missing file is `None`;
/// an empty file is an empty table. Key columns come back as `Int64` and
/// `required` columns are guaranteed to exist.
pub fn load_snapshot(
    path: &Path,
    key: KeySpec,
    required: &[&str],
) -> Result<Option<DataFrame>, SnapshotError> {
    if !path.exists() {
        debug!(path = %path.display(), "no snapshot on disk");
        return Ok(None);
    }

    let metadata = std::fs::metadata(path).map_err(|source| SnapshotError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let raw = if metadata.len() == 0 {
        DataFrame::empty()
    } else {
        CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .try_into_reader_with_file_path(Some(path.to_path_buf()))?
            .finish()?
    };

    let mut columns: Vec<&str> = key.columns().to_vec();
    columns.extend_from_slice(required);
    let complete = ensure_columns(&raw, &columns)?;
    Ok(Some(normalize_keys(&complete, key)?))
}

/// Yesterday's pending rows: the snapshot with the pending filter re-applied.
pub fn load_pending(
    path: Option<&Path>,
    key: KeySpec,
    required: &[&str],
    pending: Expr,
) -> Result<Option<DataFrame>, SnapshotError> {
    let Some(path) = path else {
        return Ok(None);
    };
    let Some(df) = load_snapshot(path, key, required)? else {
        return Ok(None);
    };
    Ok(Some(filter(&df, pending.fill_null(lit(false)))?))
}
