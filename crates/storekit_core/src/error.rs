//! Router error taxonomy.
//!
//! Every failure is surfaced synchronously to the caller; nothing in the
//! router retries or recovers locally.

use crate::catalog::DiscoveryError;
use crate::config::ConfigError;
use crate::model::entity::EntityKind;
use crate::registry::Selector;
use crate::store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RouterResult<T> = Result<T, RouterError>;

#[derive(Debug)]
pub enum RouterError {
    BindingNotFound(Selector),
    InvalidBinding(String),
    Config(ConfigError),
    OverlappingEntity {
        kind: EntityKind,
        existing: String,
    },
    DiscoveryFailed(DiscoveryError),
    HandleConstructionFailed {
        connection: String,
        source: StoreError,
    },
    NoOpenTransaction,
    TransactionAlreadyOpen {
        binding: String,
    },
    AmbiguousTransaction {
        open: usize,
    },
    TransactionMismatch,
    InvalidEntity(String),
    Closed,
    Store(StoreError),
}

impl Display for RouterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BindingNotFound(selector) => write!(f, "can't find binding for {selector}"),
            Self::InvalidBinding(message) => write!(f, "invalid binding: {message}"),
            Self::Config(err) => write!(f, "invalid router config: {err}"),
            Self::OverlappingEntity { kind, existing } => write!(
                f,
                "entity `{kind}` is already owned by binding `{existing}`"
            ),
            Self::DiscoveryFailed(err) => write!(f, "entity discovery failed: {err}"),
            Self::HandleConstructionFailed { connection, source } => {
                write!(f, "failed to construct handle for `{connection}`: {source}")
            }
            Self::NoOpenTransaction => write!(f, "no binding has an open transaction"),
            Self::TransactionAlreadyOpen { binding } => {
                write!(f, "binding `{binding}` already has an open transaction")
            }
            Self::AmbiguousTransaction { open } => write!(
                f,
                "{open} bindings have open transactions; commit one explicitly"
            ),
            Self::TransactionMismatch => {
                write!(f, "transaction is not the one open on its binding")
            }
            Self::InvalidEntity(message) => write!(f, "invalid entity: {message}"),
            Self::Closed => write!(f, "router is closed"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RouterError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::DiscoveryFailed(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::HandleConstructionFailed { source, .. } => Some(source),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for RouterError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<ConfigError> for RouterError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<DiscoveryError> for RouterError {
    fn from(value: DiscoveryError) -> Self {
        Self::DiscoveryFailed(value)
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(value: serde_json::Error) -> Self {
        Self::Store(StoreError::Serialization(value))
    }
}
