//! Declarative router configuration.
//!
//! # Responsibility
//! - Describe bindings in JSON so deployments can change connection strings
//!   and replica lists without code changes.
//! - Turn that description into `BindingConfig`s against an entity catalog.
//!
//! # Invariants
//! - Every binding names a marker or at least one entity.
//! - Names resolve against registered kinds/markers only; no new kinds are
//!   created from configuration.

use crate::binding::BindingConfig;
use crate::catalog::EntityCatalog;
use crate::connection::ConnectionDescriptor;
use crate::store::{constructor_for, BackendKind};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
    Invalid(String),
    UnknownMarker(String),
    UnknownEntity(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "{err}"),
            Self::Invalid(message) => f.write_str(message),
            Self::UnknownMarker(name) => write!(f, "marker `{name}` is not registered"),
            Self::UnknownEntity(name) => write!(f, "entity `{name}` is not registered"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// One binding as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BindingSpec {
    pub backend: BackendKind,
    #[serde(default)]
    pub marker: Option<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    pub primary: ConnectionDescriptor,
    #[serde(default)]
    pub replicas: Vec<ConnectionDescriptor>,
    #[serde(default)]
    pub create_schema_if_missing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    pub bindings: Vec<BindingSpec>,
}

impl RouterConfig {
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        for (index, binding) in self.bindings.iter().enumerate() {
            if binding.marker.is_none() && binding.entities.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "bindings[{index}] needs a marker or an entity list"
                )));
            }
            if binding.primary.connection_string().trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "bindings[{index}].primary cannot be empty"
                )));
            }
        }
        Ok(())
    }

    /// Resolves every binding against `catalog`, in file order.
    pub fn binding_configs(&self, catalog: &EntityCatalog) -> ConfigResult<Vec<BindingConfig>> {
        self.bindings
            .iter()
            .map(|binding| binding.to_binding_config(catalog))
            .collect()
    }
}

impl BindingSpec {
    fn to_binding_config(&self, catalog: &EntityCatalog) -> ConfigResult<BindingConfig> {
        let mut config = BindingConfig::new(
            constructor_for(self.backend),
            self.primary.connection_string(),
        )
        .replicas(
            self.replicas
                .iter()
                .map(|replica| replica.connection_string().to_string()),
        )
        .create_schema_if_missing(self.create_schema_if_missing);

        if let Some(name) = &self.marker {
            let marker = catalog
                .marker_named(name)
                .ok_or_else(|| ConfigError::UnknownMarker(name.clone()))?;
            config = config.marker(marker);
        }
        for name in &self.entities {
            let kind = catalog
                .kind_named(name)
                .ok_or_else(|| ConfigError::UnknownEntity(name.clone()))?;
            config = config.entity_kind(kind);
        }
        Ok(config)
    }
}
