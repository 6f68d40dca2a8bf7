//! Append-only binding registry.
//!
//! # Responsibility
//! - Populate each binding's entity set once, at bind time.
//! - Resolve a kind, marker or table name to exactly one binding.
//!
//! # Invariants
//! - Entity ownership is partitioned: no kind belongs to two bindings.
//! - Lookups scan in insertion order and the first match wins.

use crate::binding::{Binding, BindingConfig, BindingId};
use crate::catalog::EntityDiscovery;
use crate::error::{RouterError, RouterResult};
use crate::model::entity::{EntityKind, TableMarker};
use log::{error, info};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

/// Lookup key accepted by `Registry::resolve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Kind(EntityKind),
    Marker(TableMarker),
    /// Case-insensitive entity name.
    Table(String),
}

impl Display for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Kind(kind) => write!(f, "entity `{kind}`"),
            Self::Marker(marker) => write!(f, "marker `{marker}`"),
            Self::Table(name) => write!(f, "table `{name}`"),
        }
    }
}

#[derive(Default)]
pub struct Registry {
    bindings: Vec<Arc<Binding>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one binding.
    ///
    /// An explicit entity list is used as-is; otherwise the marker is passed
    /// to `discovery`. With `create_schema_if_missing`, the primary handle is
    /// built and its schema ensured before the binding is appended.
    ///
    /// # Errors
    /// - `InvalidBinding` when neither a marker nor entities are given.
    /// - `DiscoveryFailed` when discovery cannot enumerate the marker.
    /// - `OverlappingEntity` when a kind is already owned by another binding.
    /// - `HandleConstructionFailed` / `Store` from the eager schema step.
    pub fn bind(
        &mut self,
        config: BindingConfig,
        discovery: &dyn EntityDiscovery,
    ) -> RouterResult<Arc<Binding>> {
        let started_at = Instant::now();
        let kinds = match (config.marker, config.entities.is_empty()) {
            (_, false) => config.entities.iter().copied().collect::<BTreeSet<_>>(),
            (Some(marker), true) => discovery.discover(marker).map_err(|err| {
                error!(
                    "event=bind module=registry status=error error_code=discovery_failed marker={} error={}",
                    marker, err
                );
                RouterError::DiscoveryFailed(err)
            })?,
            (None, true) => {
                return Err(RouterError::InvalidBinding(
                    "binding needs a marker or an explicit entity list".to_string(),
                ));
            }
        };

        for kind in &kinds {
            if let Some(owner) = self.bindings.iter().find(|binding| binding.owns(*kind)) {
                return Err(RouterError::OverlappingEntity {
                    kind: *kind,
                    existing: owner.label().to_string(),
                });
            }
        }

        let binding = Arc::new(Binding::new(BindingId(self.bindings.len()), config, kinds));
        if binding.create_schema_if_missing() {
            binding.primary_handle()?.ensure_schema()?;
        }

        info!(
            "event=bind module=registry status=ok binding={} backend={} entities={} replicas={} schema_ensured={} duration_ms={}",
            binding.label(),
            binding.backend(),
            binding.entity_kinds().len(),
            binding.replicas().len(),
            binding.create_schema_if_missing(),
            started_at.elapsed().as_millis()
        );
        self.bindings.push(Arc::clone(&binding));
        Ok(binding)
    }

    /// Resolves `selector` to the first matching binding.
    pub fn resolve(&self, selector: &Selector) -> RouterResult<Arc<Binding>> {
        self.bindings
            .iter()
            .find(|binding| match selector {
                Selector::Kind(kind) => binding.matches_type_name(kind.name()),
                Selector::Marker(marker) => binding.matches_type_name(marker.name()),
                Selector::Table(name) => binding.matches_table(name),
            })
            .cloned()
            .ok_or_else(|| RouterError::BindingNotFound(selector.clone()))
    }

    pub fn resolve_kind(&self, kind: EntityKind) -> RouterResult<Arc<Binding>> {
        self.resolve(&Selector::Kind(kind))
    }

    pub fn resolve_marker(&self, marker: TableMarker) -> RouterResult<Arc<Binding>> {
        self.resolve(&Selector::Marker(marker))
    }

    pub fn resolve_table(&self, name: &str) -> RouterResult<Arc<Binding>> {
        self.resolve(&Selector::Table(name.to_string()))
    }

    pub fn get(&self, id: BindingId) -> Option<&Arc<Binding>> {
        self.bindings.get(id.0)
    }

    pub fn bindings(&self) -> &[Arc<Binding>] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
