//! Connection descriptors and handle construction options.
//!
//! # Invariants
//! - A `ConnectionDescriptor` is never mutated after construction.
//! - Log output uses `redacted()`, never the raw connection string.

use crate::model::entity::EntityKind;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

static SECRET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(password|pwd)=([^;&\s]*)").expect("valid secret regex")
});

/// Endpoint of one primary or replica connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionDescriptor {
    connection_string: String,
}

impl ConnectionDescriptor {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
        }
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Returns the connection string with password values masked.
    pub fn redacted(&self) -> String {
        redact(&self.connection_string)
    }
}

impl Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Masks `password=`/`pwd=` values in a connection string.
pub fn redact(connection_string: &str) -> String {
    SECRET_RE
        .replace_all(connection_string, "$1=***")
        .into_owned()
}

/// Value handed to a `HandleConstructor`.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    connection_string: String,
    entity_kinds: Arc<BTreeSet<EntityKind>>,
}

impl ConnectionOptions {
    pub fn new(descriptor: &ConnectionDescriptor, entity_kinds: Arc<BTreeSet<EntityKind>>) -> Self {
        Self {
            connection_string: descriptor.connection_string().to_string(),
            entity_kinds,
        }
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn entity_kinds(&self) -> &BTreeSet<EntityKind> {
        &self.entity_kinds
    }
}

#[cfg(test)]
mod tests {
    use super::{redact, ConnectionDescriptor};

    #[test]
    fn redacts_password_values() {
        assert_eq!(
            redact("Server=db;User=app;Password=hunter2;Port=5432"),
            "Server=db;User=app;Password=***;Port=5432"
        );
        assert_eq!(
            redact("mongodb://h/?pwd=s3cret&x=1"),
            "mongodb://h/?pwd=***&x=1"
        );
    }

    #[test]
    fn leaves_plain_strings_untouched() {
        let descriptor = ConnectionDescriptor::new("file:orders.db");
        assert_eq!(descriptor.redacted(), "file:orders.db");
        assert_eq!(descriptor.to_string(), "file:orders.db");
    }

    #[test]
    fn deserializes_from_plain_string() {
        let descriptor: ConnectionDescriptor =
            serde_json::from_str(r#""mem://orders""#).expect("descriptor json");
        assert_eq!(descriptor.connection_string(), "mem://orders");
    }
}
