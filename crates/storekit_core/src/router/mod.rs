//! Public routing surface.
//!
//! # Responsibility
//! - Resolve the binding that owns an entity kind.
//! - Send reads to a replica unless the binding has an open transaction.
//! - Send writes and raw commands to the primary.
//! - Own the registry lifecycle, including explicit teardown.
//!
//! # Invariants
//! - Reads observe primary state while a transaction is open on the owning
//!   binding, replica state otherwise.
//! - Writes never touch a replica handle.
//! - After `close`, every entry point fails with `RouterError::Closed`.

mod session;
mod table;

pub use session::ReadSession;
pub use table::Table;

use crate::binding::{Binding, BindingConfig, Transaction};
use crate::catalog::{EntityCatalog, EntityDiscovery};
use crate::config::RouterConfig;
use crate::error::{RouterError, RouterResult};
use crate::model::entity::{Entity, EntityKey, EntityKind, TableMarker};
use crate::registry::{Registry, Selector};
use crate::store::{BackendKind, StoreError, StoreHandle};
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Entry point shared by callers; wrap in `Arc` to share across threads.
#[derive(Default)]
pub struct Router {
    registry: Registry,
    closed: AtomicBool,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a router with every binding of `config`, in file order.
    pub fn from_config(config: &RouterConfig, catalog: &EntityCatalog) -> RouterResult<Self> {
        let mut router = Self::new();
        for binding in config.binding_configs(catalog)? {
            router.bind(binding, catalog)?;
        }
        info!(
            "event=router_open module=router status=ok bindings={}",
            router.registry.len()
        );
        Ok(router)
    }

    /// Registers one binding. See `Registry::bind`.
    pub fn bind(
        &mut self,
        config: BindingConfig,
        discovery: &dyn EntityDiscovery,
    ) -> RouterResult<Arc<Binding>> {
        self.ensure_open()?;
        self.registry.bind(config, discovery)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn resolve(&self, selector: &Selector) -> RouterResult<Arc<Binding>> {
        self.ensure_open()?;
        self.registry.resolve(selector)
    }

    /// Handle that reads of `E` should use right now.
    pub fn route_for_read<E: Entity>(&self) -> RouterResult<Arc<dyn StoreHandle>> {
        self.route_read_kind(E::KIND)
    }

    pub fn route_read_kind(&self, kind: EntityKind) -> RouterResult<Arc<dyn StoreHandle>> {
        let binding = self.resolve(&Selector::Kind(kind))?;
        read_handle(&binding)
    }

    /// Primary handle of the binding owning `E`, built if needed.
    pub fn route_for_write<E: Entity>(&self) -> RouterResult<Arc<dyn StoreHandle>> {
        self.route_write_kind(E::KIND)
    }

    pub fn route_write_kind(&self, kind: EntityKind) -> RouterResult<Arc<dyn StoreHandle>> {
        let binding = self.resolve(&Selector::Kind(kind))?;
        debug!(
            "event=route_write module=router binding={} kind={}",
            binding.label(),
            kind
        );
        binding.primary_handle()
    }

    /// Loads one `E` by primary key.
    ///
    /// The primary is used only when it exists and its handle reports an
    /// open transaction; otherwise a replica is drawn.
    pub fn find_by_key<E: Entity>(&self, key: impl Into<EntityKey>) -> RouterResult<Option<E>> {
        let binding = self.resolve(&Selector::Kind(E::KIND))?;
        let handle = match binding.built_primary() {
            Some(primary) if binding.has_open_transaction() => Arc::clone(primary),
            _ => binding.select_replica()?,
        };
        Table::<E>::new(handle, E::KIND.name()).find(key)
    }

    /// Inserts `entity` through the primary of the binding owning `E`.
    pub fn add<E: Entity>(&self, entity: &E) -> RouterResult<()> {
        self.add_to(&Selector::Kind(E::KIND), entity)
    }

    /// Inserts `entity` through the primary of the binding bound to `marker`.
    pub fn add_as<E: Entity>(&self, marker: TableMarker, entity: &E) -> RouterResult<()> {
        self.add_to(&Selector::Marker(marker), entity)
    }

    /// Inserts through the binding bound to `TableMarker::ANY_RECORD`.
    pub fn add_record<E: Entity>(&self, entity: &E) -> RouterResult<()> {
        self.add_as(TableMarker::ANY_RECORD, entity)
    }

    fn add_to<E: Entity>(&self, selector: &Selector, entity: &E) -> RouterResult<()> {
        if let Some(record) = entity.record() {
            record.validate().map_err(|err| {
                RouterError::InvalidEntity(format!("`{}`: {err}", E::KIND))
            })?;
        }
        let key = entity.key();
        if key.is_empty() {
            return Err(RouterError::InvalidEntity(format!(
                "`{}` produced an empty key",
                E::KIND
            )));
        }
        let binding = self.resolve(selector)?;
        let document = serde_json::to_value(entity)?;
        binding
            .primary_handle()?
            .insert(E::KIND.name(), &key.encode(), document)?;
        debug!(
            "event=add module=router binding={} kind={} in_transaction={}",
            binding.label(),
            E::KIND,
            binding.has_open_transaction()
        );
        Ok(())
    }

    /// Typed accessor over the handle reads of `E` should use right now.
    pub fn table<E: Entity>(&self) -> RouterResult<Table<E>> {
        let handle = self.route_for_read::<E>()?;
        Ok(Table::new(handle, E::KIND.name()))
    }

    /// Like `table`, over a document collection named `name`.
    ///
    /// A blank `name` falls back to the kind name.
    pub fn collection<E: Entity>(&self, name: &str) -> RouterResult<Table<E>> {
        let handle = self.route_for_read::<E>()?;
        if handle.backend() != BackendKind::Document {
            return Err(StoreError::Unsupported {
                backend: handle.backend(),
                operation: "named collections",
            }
            .into());
        }
        let name = match name.trim() {
            "" => E::KIND.name(),
            trimmed => trimmed,
        };
        Ok(Table::new(handle, name))
    }

    /// Runs a raw command on the primary of the binding owning `E`.
    pub fn execute_raw<E, I>(&self, command: &str, params: I) -> RouterResult<usize>
    where
        E: Entity,
        I: IntoIterator<Item = Value>,
    {
        let params: Vec<Value> = params.into_iter().collect();
        let changed = self.route_for_write::<E>()?.execute_raw(command, &params)?;
        Ok(changed)
    }

    /// Opens a transaction on the primary of the binding owning `E`.
    pub fn begin_transaction<E: Entity>(&self) -> RouterResult<Transaction> {
        self.resolve(&Selector::Kind(E::KIND))?.begin()
    }

    /// Commits the one open transaction in the registry.
    ///
    /// # Errors
    /// - `NoOpenTransaction` when no binding has one.
    /// - `AmbiguousTransaction` when several bindings have one.
    pub fn commit(&self) -> RouterResult<usize> {
        self.ensure_open()?;
        let open: Vec<&Arc<Binding>> = self
            .registry
            .bindings()
            .iter()
            .filter(|binding| binding.has_open_transaction())
            .collect();
        match open.as_slice() {
            [] => Err(RouterError::NoOpenTransaction),
            [binding] => binding.commit(None),
            many => Err(RouterError::AmbiguousTransaction { open: many.len() }),
        }
    }

    pub fn commit_transaction(&self, transaction: &Transaction) -> RouterResult<usize> {
        self.binding_of(transaction)?.commit(Some(transaction))
    }

    pub fn rollback_transaction(&self, transaction: &Transaction) -> RouterResult<()> {
        self.binding_of(transaction)?.rollback(Some(transaction))
    }

    /// Starts a read session that keeps one replica per binding.
    pub fn read_session(&self) -> ReadSession<'_> {
        ReadSession::new(self)
    }

    /// Closes every constructed handle. Idempotent.
    pub fn close(&self) -> RouterResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut first_error = None;
        for binding in self.registry.bindings() {
            if let Err(err) = binding.close() {
                warn!(
                    "event=router_close module=router status=error binding={} error={}",
                    binding.label(),
                    err
                );
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        info!(
            "event=router_close module=router status={} bindings={}",
            if first_error.is_none() { "ok" } else { "error" },
            self.registry.len()
        );
        crate::logging::flush_logs();
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn binding_of(&self, transaction: &Transaction) -> RouterResult<&Arc<Binding>> {
        self.ensure_open()?;
        self.registry
            .get(transaction.binding())
            .ok_or(RouterError::NoOpenTransaction)
    }

    fn ensure_open(&self) -> RouterResult<()> {
        if self.is_closed() {
            return Err(RouterError::Closed);
        }
        Ok(())
    }
}

/// Primary while a transaction is open on `binding`, a random replica
/// otherwise.
pub(crate) fn read_handle(binding: &Binding) -> RouterResult<Arc<dyn StoreHandle>> {
    if binding.has_open_transaction() {
        debug!(
            "event=route_read module=router binding={} target=primary",
            binding.label()
        );
        return binding.primary_handle();
    }
    debug!(
        "event=route_read module=router binding={} target=replica",
        binding.label()
    );
    binding.select_replica()
}
