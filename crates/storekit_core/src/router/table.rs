//! Typed accessor over one routed handle.

use crate::error::RouterResult;
use crate::model::entity::{Entity, EntityKey};
use crate::store::StoreHandle;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// Read access to one table or collection through the handle the router
/// picked when the accessor was created.
pub struct Table<E> {
    handle: Arc<dyn StoreHandle>,
    name: String,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Table<E> {
    pub(crate) fn new(handle: Arc<dyn StoreHandle>, name: impl Into<String>) -> Self {
        Self {
            handle,
            name: name.into(),
            _entity: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &Arc<dyn StoreHandle> {
        &self.handle
    }

    /// Returns whether this accessor reads through `handle`.
    pub fn is_backed_by(&self, handle: &Arc<dyn StoreHandle>) -> bool {
        Arc::ptr_eq(&self.handle, handle)
    }

    pub fn find(&self, key: impl Into<EntityKey>) -> RouterResult<Option<E>> {
        let key = key.into();
        self.handle
            .find(&self.name, &key.encode())?
            .map(decode::<E>)
            .transpose()
    }

    pub fn all(&self) -> RouterResult<Vec<E>> {
        self.handle
            .scan(&self.name)?
            .into_iter()
            .map(decode::<E>)
            .collect()
    }

    pub fn count(&self) -> RouterResult<usize> {
        Ok(self.handle.scan(&self.name)?.len())
    }
}

pub(crate) fn decode<E: Entity>(document: Value) -> RouterResult<E> {
    Ok(serde_json::from_value(document)?)
}
