//! Configuration: store options and the YAML file the CLI reads
//!
//! ```yaml
//! base_url: https://api.example.com
//! pagination:
//!   style: page-per-page
//! store:
//!   remote_saves: true
//! entities:
//!   Post:
//!     attributes: { title: string }
//!     relationships:
//!       comments: { target: Comment, cardinality: to-many, inverse: post }
//!   Comment:
//!     attributes: { body: string }
//!     relationships:
//!       post: { target: Post, inverse: comments }
//! ```

use crate::adapter::{HttpTransport, LimitOffsetPaginator, PagePerPagePaginator, RestAdapter, TransportError};
use crate::graph::{EntityDescriptor, Model, SchemaError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

const APP_DIR: &str = "mirrorgraph";
const LOCAL_CONFIG: &str = "mirrorgraph.yaml";

/// Errors loading or applying a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("no configuration file found; create one at ~/.config/mirrorgraph/config.yaml")]
    Missing,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Options of an `IncrementalStore`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Send saves to the server. When off, saves commit locally.
    pub remote_saves: bool,
    /// Resolve faults from the server. When off, faults stay faults.
    pub remote_faults: bool,
    /// Name of the root context `IncrementalStore::root_context` opens
    pub context_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            remote_saves: true,
            remote_faults: true,
            context_name: "main".to_string(),
        }
    }
}

fn limit_parameter() -> String {
    "limit".to_string()
}

fn offset_parameter() -> String {
    "offset".to_string()
}

fn page_parameter() -> String {
    "page".to_string()
}

fn per_page_parameter() -> String {
    "per_page".to_string()
}

/// Pagination style and parameter names
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "style", rename_all = "kebab-case")]
pub enum PaginationConfig {
    LimitOffset {
        #[serde(default = "limit_parameter")]
        limit: String,
        #[serde(default = "offset_parameter")]
        offset: String,
    },
    PagePerPage {
        #[serde(default = "page_parameter")]
        page: String,
        #[serde(default = "per_page_parameter")]
        per_page: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub base_url: String,
    pub pagination: Option<PaginationConfig>,
    /// Keys searched for resource identifiers, in priority order
    pub identifier_keys: Option<Vec<String>>,
    #[serde(default)]
    pub store: StoreConfig,
    pub entities: BTreeMap<String, EntityDescriptor>,
}

impl Config {
    /// Load configuration from file.
    ///
    /// Search order when no path is given:
    /// 1. ./mirrorgraph.yaml
    /// 2. $XDG_CONFIG_HOME/mirrorgraph/config.yaml
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit_path {
            Some(p) if p.exists() => p.to_path_buf(),
            Some(p) => return Err(ConfigError::NotFound(p.to_path_buf())),
            None => Self::find_config_file().ok_or(ConfigError::Missing)?,
        };
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config = Self::parse(&contents)?;
        tracing::debug!(path = %path.display(), entities = config.entities.len(), "config loaded");
        Ok(config)
    }

    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// `$XDG_CONFIG_HOME/mirrorgraph/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.yaml"))
    }

    /// Default SQLite database location under the user data directory
    pub fn default_database_path() -> Option<PathBuf> {
        dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
            .map(|dir| dir.join(APP_DIR).join("graph.db"))
    }

    fn find_config_file() -> Option<PathBuf> {
        let local = PathBuf::from(LOCAL_CONFIG);
        if local.exists() {
            return Some(local);
        }
        Self::default_path().filter(|p| p.exists())
    }

    pub fn model(&self) -> Result<Model, ConfigError> {
        Ok(Model::from_map(self.entities.clone())?)
    }

    /// A REST adapter with the configured pagination and identifier keys
    pub fn adapter(&self) -> RestAdapter {
        let mut adapter = RestAdapter::new();
        if let Some(keys) = &self.identifier_keys {
            adapter = adapter.with_identifier_keys(keys.iter().cloned());
        }
        match &self.pagination {
            Some(PaginationConfig::LimitOffset { limit, offset }) => {
                adapter.with_paginator(LimitOffsetPaginator::new(limit.as_str(), offset.as_str()))
            }
            Some(PaginationConfig::PagePerPage { page, per_page }) => {
                adapter.with_paginator(PagePerPagePaginator::new(page.as_str(), per_page.as_str()))
            }
            None => adapter,
        }
    }

    pub fn transport(&self) -> Result<HttpTransport, ConfigError> {
        Ok(HttpTransport::new(&self.base_url)?)
    }
}
