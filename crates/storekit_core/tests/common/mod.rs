#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use storekit_core::store::{constructor_for, BackendKind, HandleConstructor, StoreHandle};
use storekit_core::{
    ConnectionOptions, Entity, EntityCatalog, EntityKey, EntityKind, Record, StoreResult,
    TableMarker,
};

pub const SALES: TableMarker = TableMarker::new("sales");
pub const AUDIT: TableMarker = TableMarker::new("audit");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    #[serde(flatten)]
    pub record: Record,
    pub customer: String,
    pub total_cents: i64,
}

impl Order {
    pub fn new(customer: &str, total_cents: i64) -> Self {
        Self {
            record: Record::new(),
            customer: customer.to_string(),
            total_cents,
        }
    }
}

impl Entity for Order {
    const KIND: EntityKind = EntityKind::new("Order");

    fn key(&self) -> EntityKey {
        self.record.key()
    }

    fn record(&self) -> Option<&Record> {
        Some(&self.record)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    #[serde(flatten)]
    pub record: Record,
    pub order_id: String,
}

impl Entity for Invoice {
    const KIND: EntityKind = EntityKind::new("Invoice");

    fn key(&self) -> EntityKey {
        self.record.key()
    }

    fn record(&self) -> Option<&Record> {
        Some(&self.record)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub stream: String,
    pub sequence: u64,
    pub action: String,
}

impl Entity for AuditEvent {
    const KIND: EntityKind = EntityKind::new("AuditEvent");

    fn key(&self) -> EntityKey {
        EntityKey::composite([self.stream.clone(), self.sequence.to_string()])
    }
}

/// Kind registered nowhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stray {
    pub id: String,
}

impl Entity for Stray {
    const KIND: EntityKind = EntityKind::new("Stray");

    fn key(&self) -> EntityKey {
        EntityKey::single(self.id.clone())
    }
}

pub fn catalog() -> EntityCatalog {
    let mut catalog = EntityCatalog::new();
    catalog.register::<Order>(SALES).expect("register order");
    catalog.register::<Invoice>(SALES).expect("register invoice");
    catalog.register::<AuditEvent>(AUDIT).expect("register audit event");
    catalog
}

/// Wraps a bundled constructor and counts constructions.
pub struct CountingConstructor {
    inner: Arc<dyn HandleConstructor>,
    built: AtomicUsize,
}

impl CountingConstructor {
    pub fn new(backend: BackendKind) -> Arc<Self> {
        Arc::new(Self {
            inner: constructor_for(backend),
            built: AtomicUsize::new(0),
        })
    }

    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }
}

impl HandleConstructor for CountingConstructor {
    fn backend(&self) -> BackendKind {
        self.inner.backend()
    }

    fn construct(&self, options: &ConnectionOptions) -> StoreResult<Arc<dyn StoreHandle>> {
        self.built.fetch_add(1, Ordering::SeqCst);
        self.inner.construct(options)
    }
}

/// Unique `mem://` space name per test to keep process-wide spaces apart.
pub fn space(test: &str, role: &str) -> String {
    format!("mem://{test}-{role}-{}", uuid::Uuid::new_v4())
}
