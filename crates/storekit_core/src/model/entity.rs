//! Entity kinds, binding markers and entity keys.
//!
//! # Responsibility
//! - Give every storable type a stable identifier resolved without reflection.
//! - Encode single and composite keys into one store-level key string.
//!
//! # Invariants
//! - `EntityKey` is never empty when produced by `Entity::key`.
//! - Composite keys encode unambiguously (JSON array form).

use crate::model::record::Record;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::{Display, Formatter};

/// Stable identifier for one logical record/table type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKind(&'static str);

impl EntityKind {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }

    /// Returns whether `table` names this kind, ignoring ASCII case.
    pub fn matches_table(&self, table: &str) -> bool {
        self.0.eq_ignore_ascii_case(table.trim())
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Stable identifier for a group of entity kinds owned by one binding.
///
/// Entity modules register their kinds under a marker; a binding configured
/// with that marker owns every kind registered under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableMarker(&'static str);

impl TableMarker {
    /// Generic marker used when a write does not name its binding.
    pub const ANY_RECORD: TableMarker = TableMarker("any_record");

    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl Display for TableMarker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// Primary key of one entity, possibly composite.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey(Vec<String>);

impl EntityKey {
    pub fn single(value: impl Into<String>) -> Self {
        Self(vec![value.into()])
    }

    pub fn composite<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(parts.into_iter().map(Into::into).collect())
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// True when there are no parts or every part is blank.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|part| part.trim().is_empty())
    }

    /// Encodes the key into the string stored by handles.
    ///
    /// Single-part keys are stored verbatim; composite keys as a JSON array.
    pub fn encode(&self) -> String {
        match self.0.as_slice() {
            [single] => single.clone(),
            parts => serde_json::Value::from(parts.to_vec()).to_string(),
        }
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encode())
    }
}

impl From<&str> for EntityKey {
    fn from(value: &str) -> Self {
        Self::single(value)
    }
}

impl From<String> for EntityKey {
    fn from(value: String) -> Self {
        Self::single(value)
    }
}

/// A type the router can persist and load.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: EntityKind;

    fn key(&self) -> EntityKey;

    /// Embedded record identity, validated before every insert.
    fn record(&self) -> Option<&Record> {
        None
    }
}
