//! Sticky read sessions.
//!
//! `Router` draws a new replica on every read. A `ReadSession` draws once per
//! binding and keeps that replica for the rest of the session, so one logical
//! multi-read operation sees a single replica's replication lag.

use crate::binding::BindingId;
use crate::error::RouterResult;
use crate::model::entity::{Entity, EntityKey};
use crate::registry::Selector;
use crate::router::{Router, Table};
use crate::store::StoreHandle;
use std::collections::HashMap;
use std::sync::Arc;

pub struct ReadSession<'r> {
    router: &'r Router,
    pinned: HashMap<BindingId, usize>,
}

impl<'r> ReadSession<'r> {
    pub(crate) fn new(router: &'r Router) -> Self {
        Self {
            router,
            pinned: HashMap::new(),
        }
    }

    /// Same rule as `Router::route_for_read`, with the replica pinned.
    pub fn route_for_read<E: Entity>(&mut self) -> RouterResult<Arc<dyn StoreHandle>> {
        let binding = self.router.resolve(&Selector::Kind(E::KIND))?;
        if binding.has_open_transaction() {
            return binding.primary_handle();
        }
        let index = match self.pinned.get(&binding.id()) {
            Some(index) => *index,
            None => {
                let index = binding.select_replica_index()?;
                self.pinned.insert(binding.id(), index);
                index
            }
        };
        binding.replica_at(index)
    }

    pub fn find_by_key<E: Entity>(
        &mut self,
        key: impl Into<EntityKey>,
    ) -> RouterResult<Option<E>> {
        self.table::<E>()?.find(key)
    }

    pub fn table<E: Entity>(&mut self) -> RouterResult<Table<E>> {
        let handle = self.route_for_read::<E>()?;
        Ok(Table::new(handle, E::KIND.name()))
    }

    /// Number of bindings with a pinned replica.
    pub fn pinned_len(&self) -> usize {
        self.pinned.len()
    }
}
