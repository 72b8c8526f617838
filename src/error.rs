//! Error types shared across the engine.
//!
//! User-correctable outcomes never appear here; they are collected into
//! [`crate::domain::Feedback`]. Everything below is either a structural
//! mismatch between resource and schema, or an infrastructure failure.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Field schema lookups and invariants.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("no field at path {0:?}")]
    NoSuchField(String),

    #[error("no field with id {0:?}")]
    NoSuchId(String),

    #[error("field {field:?} has no value named {value:?}")]
    NoSuchValue { field: String, value: String },

    #[error("field {path:?} violates invariant: {reason}")]
    Invariant { path: String, reason: String },

    #[error("mode {0:?} is not registered")]
    UnknownMode(String),

    #[error("schema decode: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Datastore failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error during {context}: {source}")]
    Sqlx {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("column {column:?} could not be decoded: {reason}")]
    Decode { column: String, reason: String },

    #[error("no row returned by {0}")]
    NoRow(String),

    /// Serialization conflict raised by a non-Postgres datastore.
    #[error("serialization conflict: {0}")]
    Conflict(String),

    /// Unique violation raised by a non-Postgres datastore.
    #[error("unique violation: {0}")]
    Duplicate(String),
}

impl StoreError {
    pub fn sqlx(context: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Sqlx {
            context: context.into(),
            source,
        }
    }

    /// Serialization failures (40001) and unique violations (23505) are
    /// worth another attempt; everything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Sqlx { source, .. } => source
                .as_database_error()
                .and_then(|e| e.code())
                .map(|code| code == "40001" || code == "23505")
                .unwrap_or(false),
            StoreError::Conflict(_) | StoreError::Duplicate(_) => true,
            StoreError::Decode { .. } | StoreError::NoRow(_) => false,
        }
    }
}

/// Disk IO under the storage root.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("{op} {path:?}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("file name {0:?} does not stay inside the storage root")]
    OutsideRoot(String),

    #[error("storage root {0:?} is not an absolute path")]
    RelativeRoot(PathBuf),
}

impl StorageError {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Only a name collision is retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Io { source, .. } if source.kind() == io::ErrorKind::AlreadyExists)
    }
}

/// Image decode, encode and metadata rewriting.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("image codec: {0}")]
    Image(#[from] image::ImageError),

    #[error("malformed {format} stream: {reason}")]
    Malformed { format: &'static str, reason: String },
}

/// Outcome of a bounded retry loop.
#[derive(Error, Debug)]
pub enum RetryError<E: std::error::Error + 'static> {
    /// A non-retryable error ended the loop early.
    #[error("{last}")]
    Fatal {
        #[source]
        last: E,
        earlier: Vec<E>,
    },

    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: usize,
        #[source]
        last: E,
        earlier: Vec<E>,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    pub fn last(&self) -> &E {
        match self {
            RetryError::Fatal { last, .. } | RetryError::Exhausted { last, .. } => last,
        }
    }

    /// Errors from attempts before the final one, oldest first.
    pub fn earlier(&self) -> &[E] {
        match self {
            RetryError::Fatal { earlier, .. } | RetryError::Exhausted { earlier, .. } => earlier,
        }
    }

    /// Total number of attempts made.
    pub fn attempts(&self) -> usize {
        self.earlier().len() + 1
    }
}

/// Fatal engine outcome. Nothing a resubmission could fix.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unable to map received field {0:?} to source.")]
    Unmapped(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("field {path:?}: expected {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Field {path:?} contains unknown validation {name:?}")]
    UnknownValidator { path: String, name: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("Unable to save {format} to disk.")]
    DiskWrite {
        format: String,
        #[source]
        source: RetryError<StorageError>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("commit failed: {0}")]
    Commit(#[from] RetryError<StoreError>),

    #[error("resource {0:?} has no slug to update by")]
    MissingSlug(String),

    /// Files written during an aborted submission could not all be removed.
    /// `cause` is absent when the abort was a feedback outcome.
    #[error("{}unable to remove all new files:\n{}", cleanup_prefix(.cause), .remaining.join("\n"))]
    Cleanup {
        cause: Option<Box<EngineError>>,
        remaining: Vec<String>,
    },
}

fn cleanup_prefix(cause: &Option<Box<EngineError>>) -> String {
    match cause {
        Some(c) => format!("{c}:\n"),
        None => String::new(),
    }
}

impl EngineError {
    pub fn mismatch(path: impl Into<String>, expected: &'static str, found: &'static str) -> Self {
        Self::TypeMismatch {
            path: path.into(),
            expected,
            found,
        }
    }
}
