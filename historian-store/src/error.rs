use crate::codec::MalformedKey;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for history store operations
pub type Result<T, E = StoreError> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the history store.
///
/// Nothing here is retried by the store; every variant carries enough context
/// (path, partition, key) for the caller to report it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not open history database {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("could not write history for {directory}: {source}")]
    Write {
        directory: String,
        #[source]
        source: BoxError,
    },

    #[error("no history entry {key} in {partition}")]
    NotFound { partition: String, key: String },

    #[error("corrupt history partition {partition}: {source}")]
    MalformedKey {
        partition: String,
        #[source]
        source: MalformedKey,
    },

    #[error("query over {partition} failed: {source}")]
    Query {
        partition: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("history store is closed")]
    Closed,
}

impl StoreError {
    pub(crate) fn open(path: &Path, source: impl Into<BoxError>) -> Self {
        StoreError::Open {
            path: path.to_path_buf(),
            source: source.into(),
        }
    }

    pub(crate) fn query(partition: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> Self {
        let partition = partition.into();
        move |source| StoreError::Query { partition, source }
    }

    pub(crate) fn write(directory: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> Self {
        let directory = directory.into();
        move |source| StoreError::Write {
            directory,
            source: Box::new(source),
        }
    }

    /// True for lookups of absent partitions or keys.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
