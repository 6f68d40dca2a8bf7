//! Explicit entity registration and discovery.
//!
//! Entity modules register their kind under the marker of the binding that
//! owns them. Binding time asks the catalog for every kind under a marker.

use crate::model::entity::{Entity, EntityKind, TableMarker};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Discovery capability consulted once per binding at bind time.
pub trait EntityDiscovery {
    fn discover(&self, marker: TableMarker) -> Result<BTreeSet<EntityKind>, DiscoveryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    UnknownMarker(TableMarker),
    ConflictingMarker {
        kind: EntityKind,
        existing: TableMarker,
        requested: TableMarker,
    },
}

impl Display for DiscoveryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownMarker(marker) => {
                write!(f, "no entity kinds registered under marker `{marker}`")
            }
            Self::ConflictingMarker {
                kind,
                existing,
                requested,
            } => write!(
                f,
                "entity `{kind}` already registered under `{existing}`; refusing `{requested}`"
            ),
        }
    }
}

impl Error for DiscoveryError {}

/// In-process catalog of marker → entity kinds.
#[derive(Debug, Default, Clone)]
pub struct EntityCatalog {
    by_marker: BTreeMap<TableMarker, BTreeSet<EntityKind>>,
    owners: BTreeMap<EntityKind, TableMarker>,
}

impl EntityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `E` under `marker`.
    pub fn register<E: Entity>(&mut self, marker: TableMarker) -> Result<(), DiscoveryError> {
        self.register_kind(marker, E::KIND)
    }

    /// Registers one kind. Re-registering under the same marker is a no-op.
    pub fn register_kind(
        &mut self,
        marker: TableMarker,
        kind: EntityKind,
    ) -> Result<(), DiscoveryError> {
        if let Some(existing) = self.owners.get(&kind) {
            if *existing == marker {
                return Ok(());
            }
            return Err(DiscoveryError::ConflictingMarker {
                kind,
                existing: *existing,
                requested: marker,
            });
        }

        self.owners.insert(kind, marker);
        self.by_marker.entry(marker).or_default().insert(kind);
        Ok(())
    }

    /// Finds a registered kind by exact name.
    pub fn kind_named(&self, name: &str) -> Option<EntityKind> {
        self.owners.keys().find(|kind| kind.name() == name).copied()
    }

    /// Finds a marker with at least one registered kind by exact name.
    pub fn marker_named(&self, name: &str) -> Option<TableMarker> {
        if name == TableMarker::ANY_RECORD.name() {
            return Some(TableMarker::ANY_RECORD);
        }
        self.by_marker.keys().find(|marker| marker.name() == name).copied()
    }

    pub fn marker_of(&self, kind: EntityKind) -> Option<TableMarker> {
        self.owners.get(&kind).copied()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

impl EntityDiscovery for EntityCatalog {
    fn discover(&self, marker: TableMarker) -> Result<BTreeSet<EntityKind>, DiscoveryError> {
        self.by_marker
            .get(&marker)
            .cloned()
            .ok_or(DiscoveryError::UnknownMarker(marker))
    }
}
