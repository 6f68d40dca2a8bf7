//! Bindings and their lazily built handles.
//!
//! # Responsibility
//! - Describe one logical data source: constructor, primary, replicas and
//!   owned entity kinds.
//! - Build the primary handle and the replica batch on first use.
//! - Track the single open transaction of the primary.
//!
//! # Invariants
//! - The primary handle is constructed at most once per binding.
//! - The replica batch is constructed at most once, in one pass.
//! - With no replicas configured, the batch holds one handle on the primary
//!   connection string.
//! - Whether a transaction is open is read from the primary handle, so one
//!   opened or ended directly on the handle is honored.
//! - `begin`/`commit`/`rollback` run while the transaction mutex is held; the
//!   stored `Transaction` token only matches callers to the open transaction.

use crate::connection::{ConnectionDescriptor, ConnectionOptions};
use crate::error::{RouterError, RouterResult};
use crate::model::entity::{Entity, EntityKind, TableMarker};
use crate::store::{constructor_for, BackendKind, HandleConstructor, StoreError, StoreHandle};
use log::{info, warn};
use once_cell::sync::OnceCell;
use rand::Rng;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Position of a binding in its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BindingId(pub(crate) usize);

impl Display for BindingId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Caller-supplied description of a binding, consumed by `Registry::bind`.
#[derive(Clone)]
pub struct BindingConfig {
    pub(crate) marker: Option<TableMarker>,
    pub(crate) entities: Vec<EntityKind>,
    pub(crate) constructor: Arc<dyn HandleConstructor>,
    pub(crate) primary: ConnectionDescriptor,
    pub(crate) replicas: Vec<ConnectionDescriptor>,
    pub(crate) create_schema_if_missing: bool,
}

impl BindingConfig {
    pub fn new(constructor: Arc<dyn HandleConstructor>, primary: impl Into<String>) -> Self {
        Self {
            marker: None,
            entities: Vec::new(),
            constructor,
            primary: ConnectionDescriptor::new(primary),
            replicas: Vec::new(),
            create_schema_if_missing: false,
        }
    }

    /// Binding over the bundled SQLite handle.
    pub fn sqlite(primary: impl Into<String>) -> Self {
        Self::new(constructor_for(BackendKind::Sqlite), primary)
    }

    /// Binding over the bundled in-process document handle.
    pub fn document(primary: impl Into<String>) -> Self {
        Self::new(constructor_for(BackendKind::Document), primary)
    }

    /// Owns every kind the discovery source registers under `marker`.
    pub fn marker(mut self, marker: TableMarker) -> Self {
        self.marker = Some(marker);
        self
    }

    /// Owns `E` explicitly. An explicit list bypasses discovery.
    pub fn entity<E: Entity>(self) -> Self {
        self.entity_kind(E::KIND)
    }

    pub fn entity_kind(mut self, kind: EntityKind) -> Self {
        if !self.entities.contains(&kind) {
            self.entities.push(kind);
        }
        self
    }

    pub fn replica(mut self, connection: impl Into<String>) -> Self {
        self.replicas.push(ConnectionDescriptor::new(connection));
        self
    }

    pub fn replicas<I, S>(mut self, connections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replicas
            .extend(connections.into_iter().map(ConnectionDescriptor::new));
        self
    }

    pub fn create_schema_if_missing(mut self, enabled: bool) -> Self {
        self.create_schema_if_missing = enabled;
        self
    }
}

/// Token for the open transaction of one binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    id: Uuid,
    binding: BindingId,
}

impl Transaction {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn binding(&self) -> BindingId {
        self.binding
    }
}

/// One registered logical data source.
pub struct Binding {
    id: BindingId,
    label: String,
    marker: Option<TableMarker>,
    constructor: Arc<dyn HandleConstructor>,
    entity_kinds: Arc<BTreeSet<EntityKind>>,
    primary: ConnectionDescriptor,
    replicas: Vec<ConnectionDescriptor>,
    create_schema_if_missing: bool,
    primary_handle: OnceCell<Arc<dyn StoreHandle>>,
    replica_handles: OnceCell<Vec<Arc<dyn StoreHandle>>>,
    transaction: Mutex<Option<Transaction>>,
}

impl Binding {
    pub(crate) fn new(
        id: BindingId,
        config: BindingConfig,
        entity_kinds: BTreeSet<EntityKind>,
    ) -> Self {
        let label = match config.marker {
            Some(marker) => marker.name().to_string(),
            None => entity_kinds
                .iter()
                .map(EntityKind::name)
                .collect::<Vec<_>>()
                .join("+"),
        };
        Self {
            id,
            label,
            marker: config.marker,
            constructor: config.constructor,
            entity_kinds: Arc::new(entity_kinds),
            primary: config.primary,
            replicas: config.replicas,
            create_schema_if_missing: config.create_schema_if_missing,
            primary_handle: OnceCell::new(),
            replica_handles: OnceCell::new(),
            transaction: Mutex::new(None),
        }
    }

    pub fn id(&self) -> BindingId {
        self.id
    }

    /// Marker name, or the owned kinds joined with `+`.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn marker(&self) -> Option<TableMarker> {
        self.marker
    }

    pub fn backend(&self) -> BackendKind {
        self.constructor.backend()
    }

    pub fn entity_kinds(&self) -> &BTreeSet<EntityKind> {
        &self.entity_kinds
    }

    pub fn primary(&self) -> &ConnectionDescriptor {
        &self.primary
    }

    pub fn replicas(&self) -> &[ConnectionDescriptor] {
        &self.replicas
    }

    pub fn create_schema_if_missing(&self) -> bool {
        self.create_schema_if_missing
    }

    pub fn owns(&self, kind: EntityKind) -> bool {
        self.entity_kinds.contains(&kind)
    }

    /// Type predicate shared by kind and marker lookups: the name is the
    /// binding's marker or one of its owned kinds.
    pub(crate) fn matches_type_name(&self, name: &str) -> bool {
        self.marker.is_some_and(|marker| marker.name() == name)
            || self.entity_kinds.iter().any(|kind| kind.name() == name)
    }

    pub(crate) fn matches_table(&self, table: &str) -> bool {
        self.entity_kinds.iter().any(|kind| kind.matches_table(table))
    }

    /// Returns the primary handle, building it on first call.
    pub fn primary_handle(&self) -> RouterResult<Arc<dyn StoreHandle>> {
        self.primary_handle
            .get_or_try_init(|| {
                let handle = self.construct(&self.primary)?;
                info!(
                    "event=handle_init module=binding status=ok binding={} role=primary target={}",
                    self.label, self.primary
                );
                Ok::<_, RouterError>(handle)
            })
            .cloned()
    }

    /// Returns the primary handle only if it has been built.
    pub fn built_primary(&self) -> Option<&Arc<dyn StoreHandle>> {
        self.primary_handle.get()
    }

    /// Returns the replica batch, building it on first call.
    pub fn replica_handles(&self) -> RouterResult<&[Arc<dyn StoreHandle>]> {
        self.replica_handles
            .get_or_try_init(|| {
                let handles = if self.replicas.is_empty() {
                    vec![self.construct(&self.primary)?]
                } else {
                    self.replicas
                        .iter()
                        .map(|replica| self.construct(replica))
                        .collect::<RouterResult<Vec<_>>>()?
                };
                info!(
                    "event=handle_init module=binding status=ok binding={} role=replica count={} fallback_to_primary={}",
                    self.label,
                    handles.len(),
                    self.replicas.is_empty()
                );
                Ok::<_, RouterError>(handles)
            })
            .map(Vec::as_slice)
    }

    /// Picks a uniformly random replica index. Every call draws again.
    pub fn select_replica_index(&self) -> RouterResult<usize> {
        let count = self.replica_handles()?.len();
        Ok(rand::thread_rng().gen_range(0..count))
    }

    /// Returns a uniformly random replica handle.
    pub fn select_replica(&self) -> RouterResult<Arc<dyn StoreHandle>> {
        let index = self.select_replica_index()?;
        self.replica_at(index)
    }

    pub(crate) fn replica_at(&self, index: usize) -> RouterResult<Arc<dyn StoreHandle>> {
        let handles = self.replica_handles()?;
        handles.get(index).cloned().ok_or_else(|| {
            RouterError::InvalidBinding(format!(
                "replica index {index} out of range for `{}`",
                self.label
            ))
        })
    }

    /// True when the primary exists and its handle reports an open transaction.
    pub fn has_open_transaction(&self) -> bool {
        self.primary_handle
            .get()
            .is_some_and(|primary| primary.in_transaction())
    }

    /// Token of the transaction opened through `begin`, while it is open.
    pub fn open_transaction(&self) -> Option<Transaction> {
        if !self.has_open_transaction() {
            return None;
        }
        self.lock_transaction().clone()
    }

    pub(crate) fn begin(&self) -> RouterResult<Transaction> {
        let mut state = self.lock_transaction();
        let primary = self.primary_handle()?;
        if primary.in_transaction() {
            return Err(self.already_open());
        }
        self.discard_stale(&mut state);
        primary.begin().map_err(|err| match err {
            StoreError::TransactionAlreadyOpen => self.already_open(),
            other => other.into(),
        })?;
        let transaction = Transaction {
            id: Uuid::new_v4(),
            binding: self.id,
        };
        info!(
            "event=tx_begin module=binding status=ok binding={} tx={}",
            self.label, transaction.id
        );
        *state = Some(transaction.clone());
        Ok(transaction)
    }

    /// Commits the open transaction; `expected` must match it when given.
    pub(crate) fn commit(&self, expected: Option<&Transaction>) -> RouterResult<usize> {
        let mut state = self.lock_transaction();
        let primary = self.open_primary(&mut state, expected)?;
        let writes = primary.commit()?;
        info!(
            "event=tx_commit module=binding status=ok binding={} tx={} writes={}",
            self.label,
            tx_label(state.take().as_ref()),
            writes
        );
        Ok(writes)
    }

    pub(crate) fn rollback(&self, expected: Option<&Transaction>) -> RouterResult<()> {
        let mut state = self.lock_transaction();
        let primary = self.open_primary(&mut state, expected)?;
        primary.rollback()?;
        info!(
            "event=tx_rollback module=binding status=ok binding={} tx={}",
            self.label,
            tx_label(state.take().as_ref())
        );
        Ok(())
    }

    /// Primary handle with an open transaction that `expected` refers to.
    ///
    /// A token left behind by a transaction that already ended on the handle
    /// is discarded.
    fn open_primary(
        &self,
        state: &mut Option<Transaction>,
        expected: Option<&Transaction>,
    ) -> RouterResult<&Arc<dyn StoreHandle>> {
        let primary = match self.primary_handle.get() {
            Some(primary) if primary.in_transaction() => primary,
            _ => {
                self.discard_stale(state);
                return Err(RouterError::NoOpenTransaction);
            }
        };
        match expected {
            Some(expected) if state.as_ref() != Some(expected) => {
                Err(RouterError::TransactionMismatch)
            }
            _ => Ok(primary),
        }
    }

    fn discard_stale(&self, state: &mut Option<Transaction>) {
        if let Some(stale) = state.take() {
            warn!(
                "event=tx_stale module=binding status=warn binding={} tx={}",
                self.label, stale.id
            );
        }
    }

    fn already_open(&self) -> RouterError {
        RouterError::TransactionAlreadyOpen {
            binding: self.label.clone(),
        }
    }

    /// Closes every constructed handle. Returns the first close error.
    pub(crate) fn close(&self) -> RouterResult<()> {
        let mut state = self.lock_transaction();
        if let Some(open) = state.take() {
            warn!(
                "event=tx_abandon module=binding status=warn binding={} tx={}",
                self.label, open.id
            );
        }

        let mut first_error = None;
        let replicas = self.replica_handles.get().into_iter().flatten();
        for handle in self.primary_handle.get().into_iter().chain(replicas) {
            if let Err(err) = handle.close() {
                warn!(
                    "event=handle_close module=binding status=error binding={} error={}",
                    self.label, err
                );
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn construct(&self, descriptor: &ConnectionDescriptor) -> RouterResult<Arc<dyn StoreHandle>> {
        let options = ConnectionOptions::new(descriptor, Arc::clone(&self.entity_kinds));
        self.constructor
            .construct(&options)
            .map_err(|source| RouterError::HandleConstructionFailed {
                connection: descriptor.redacted(),
                source,
            })
    }

    fn lock_transaction(&self) -> MutexGuard<'_, Option<Transaction>> {
        self.transaction
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Token id, or `handle` for a transaction opened on the handle directly.
fn tx_label(transaction: Option<&Transaction>) -> String {
    transaction.map_or_else(|| "handle".to_string(), |tx| tx.id.to_string())
}
