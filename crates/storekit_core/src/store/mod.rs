//! Store capability contracts and bundled handle implementations.
//!
//! # Responsibility
//! - Define the operations the router needs from a constructed handle.
//! - Define how a handle is built from `ConnectionOptions`.
//! - Provide a relational (SQLite) and a document (in-process) handle.
//!
//! # Invariants
//! - Handles are shared across threads; every operation takes `&self`.
//! - A handle has at most one open transaction.
//! - After `close`, every operation returns `StoreError::Closed`.

use crate::connection::ConnectionOptions;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub mod document;
pub mod sqlite;

pub use document::{DocumentConstructor, DocumentHandle};
pub use sqlite::{SqliteConstructor, SqliteHandle};

pub type StoreResult<T> = Result<T, StoreError>;

/// Storage family wrapped by a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Sqlite,
    Document,
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite => f.write_str("sqlite"),
            Self::Document => f.write_str("document"),
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Serialization(serde_json::Error),
    InvalidConnection(String),
    InvalidData(String),
    DuplicateKey {
        collection: String,
        key: String,
    },
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
    Unsupported {
        backend: BackendKind,
        operation: &'static str,
    },
    NoTransaction,
    TransactionAlreadyOpen,
    Closed,
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "document serialization failed: {err}"),
            Self::InvalidConnection(value) => write!(f, "invalid connection string: {value}"),
            Self::InvalidData(message) => write!(f, "invalid stored data: {message}"),
            Self::DuplicateKey { collection, key } => {
                write!(f, "key `{key}` already exists in `{collection}`")
            }
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
            Self::Unsupported { backend, operation } => {
                write!(f, "{backend} handles do not support {operation}")
            }
            Self::NoTransaction => write!(f, "no transaction is open on this handle"),
            Self::TransactionAlreadyOpen => {
                write!(f, "a transaction is already open on this handle")
            }
            Self::Closed => write!(f, "handle is closed"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Operations exposed by a constructed, connection-bound handle.
///
/// Documents travel as `serde_json::Value`; the router converts typed
/// entities at its boundary.
pub trait StoreHandle: Send + Sync {
    fn backend(&self) -> BackendKind;

    fn connection_string(&self) -> &str;

    /// Creates storage for every owned entity kind. Idempotent.
    fn ensure_schema(&self) -> StoreResult<()>;

    fn find(&self, collection: &str, key: &str) -> StoreResult<Option<Value>>;

    /// Inserts a new document; an existing key is an error.
    fn insert(&self, collection: &str, key: &str, document: Value) -> StoreResult<()>;

    /// Returns every document of `collection`, ordered by key.
    fn scan(&self, collection: &str) -> StoreResult<Vec<Value>>;

    /// Runs a raw command and returns the affected row count.
    fn execute_raw(&self, command: &str, params: &[Value]) -> StoreResult<usize>;

    fn begin(&self) -> StoreResult<()>;

    /// Commits the open transaction, returning the number of writes applied.
    fn commit(&self) -> StoreResult<usize>;

    fn rollback(&self) -> StoreResult<()>;

    fn in_transaction(&self) -> bool;

    fn close(&self) -> StoreResult<()>;
}

/// Builds handles for one binding.
pub trait HandleConstructor: Send + Sync {
    fn backend(&self) -> BackendKind;

    fn construct(&self, options: &ConnectionOptions) -> StoreResult<Arc<dyn StoreHandle>>;
}

/// Returns the bundled constructor for `backend`.
pub fn constructor_for(backend: BackendKind) -> Arc<dyn HandleConstructor> {
    match backend {
        BackendKind::Sqlite => Arc::new(SqliteConstructor),
        BackendKind::Document => Arc::new(DocumentConstructor),
    }
}
