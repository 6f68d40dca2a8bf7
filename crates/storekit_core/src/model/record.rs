//! Record base type.
//!
//! # Responsibility
//! - Provide the identity field every stored record embeds.
//!
//! # Invariants
//! - `id` is non-empty and at most 36 characters.
//! - Generated ids are UUID v4 in hyphenated form.

use crate::model::entity::EntityKey;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Maximum stored length of a record id.
pub const RECORD_ID_MAX_LEN: usize = 36;

/// Identity shared by all records. Embed with `#[serde(flatten)]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
}

impl Record {
    /// Creates a record with a generated UUID v4 id.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    /// Creates a record with a caller-provided id.
    ///
    /// Used by import paths where identity already exists externally.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::single(self.id.clone())
    }

    pub fn validate(&self) -> Result<(), RecordValidationError> {
        if self.id.trim().is_empty() {
            return Err(RecordValidationError::EmptyId);
        }
        let len = self.id.chars().count();
        if len > RECORD_ID_MAX_LEN {
            return Err(RecordValidationError::IdTooLong { len });
        }
        Ok(())
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordValidationError {
    EmptyId,
    IdTooLong { len: usize },
}

impl Display for RecordValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyId => write!(f, "record id cannot be empty"),
            Self::IdTooLong { len } => write!(
                f,
                "record id has {len} characters; at most {RECORD_ID_MAX_LEN} allowed"
            ),
        }
    }
}

impl Error for RecordValidationError {}
