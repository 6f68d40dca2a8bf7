//! Entity identity model shared by the registry and the router.
//!
//! # Responsibility
//! - Define stable identifiers for entity kinds and binding markers.
//! - Define the record base type and its identity convention.
//!
//! # Invariants
//! - An `EntityKind` name is unique across the process.
//! - Table-name lookups compare kind names case-insensitively.

pub mod entity;
pub mod record;
