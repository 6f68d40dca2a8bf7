//! Multi-backend data-access routing for storekit.
//!
//! Entity kinds are bound to logical data sources (a primary plus replicas,
//! each a relational or document store). The router builds handles lazily,
//! reads from replicas, and writes to the primary. Reads made while the
//! primary holds an open transaction go to the primary as well.

pub mod binding;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod model;
pub mod registry;
pub mod router;
pub mod store;

pub use binding::{Binding, BindingConfig, BindingId, Transaction};
pub use catalog::{DiscoveryError, EntityCatalog, EntityDiscovery};
pub use config::{BindingSpec, ConfigError, RouterConfig};
pub use connection::{ConnectionDescriptor, ConnectionOptions};
pub use error::{RouterError, RouterResult};
pub use logging::{default_log_level, flush_logs, init_logging, logging_status};
pub use model::entity::{Entity, EntityKey, EntityKind, TableMarker};
pub use model::record::{Record, RecordValidationError};
pub use registry::{Registry, Selector};
pub use router::{ReadSession, Router, Table};
pub use store::{
    BackendKind, DocumentHandle, HandleConstructor, SqliteHandle, StoreError, StoreHandle,
    StoreResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
