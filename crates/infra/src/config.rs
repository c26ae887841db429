//! Process configuration read from environment variables.
//!
//! | variable                    | default      |
//! |-----------------------------|--------------|
//! | `INVENTORY_BACKEND`         | `memory`     |
//! | `DATABASE_URL`              | required for `postgres` |
//! | `DATABASE_MAX_CONNECTIONS`  | `10`         |
//! | `INVENTORY_BULK_MODE`       | `sequential` |
//! | `INVENTORY_MAX_CAS_RETRIES` | `16`         |

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stock_store::BulkMode;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CAS_RETRIES: u32 = 16;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} is required when INVENTORY_BACKEND={backend}")]
    Missing { name: &'static str, backend: &'static str },

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Which [`InventoryStore`](crate::stock_store::InventoryStore) the process runs on.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InventoryBackend {
    /// Per-row mutexes in process memory.
    #[default]
    Memory,
    /// Version compare-and-set with bounded retries, in process memory.
    Optimistic,
    /// Conditional `UPDATE` against PostgreSQL.
    Postgres,
}

impl InventoryBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryBackend::Memory => "memory",
            InventoryBackend::Optimistic => "optimistic",
            InventoryBackend::Postgres => "postgres",
        }
    }
}

impl core::str::FromStr for InventoryBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(InventoryBackend::Memory),
            "optimistic" => Ok(InventoryBackend::Optimistic),
            "postgres" | "postgresql" => Ok(InventoryBackend::Postgres),
            other => Err(format!(
                "unknown backend '{other}' (expected memory, optimistic or postgres)"
            )),
        }
    }
}

impl core::fmt::Display for InventoryBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryConfig {
    pub backend: InventoryBackend,
    #[serde(skip_serializing)]
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub bulk_mode: BulkMode,
    pub max_cas_retries: u32,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            backend: InventoryBackend::default(),
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            bulk_mode: BulkMode::default(),
            max_cas_retries: DEFAULT_MAX_CAS_RETRIES,
        }
    }
}

impl InventoryConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any name → value lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let backend = match get("INVENTORY_BACKEND") {
            Some(raw) => raw.parse::<InventoryBackend>().map_err(|reason| ConfigError::Invalid {
                name: "INVENTORY_BACKEND",
                reason,
            })?,
            None => InventoryBackend::default(),
        };

        let bulk_mode = match get("INVENTORY_BULK_MODE") {
            Some(raw) => raw.parse::<BulkMode>().map_err(|reason| ConfigError::Invalid {
                name: "INVENTORY_BULK_MODE",
                reason,
            })?,
            None => BulkMode::default(),
        };

        let max_connections = parse_positive(
            "DATABASE_MAX_CONNECTIONS",
            get("DATABASE_MAX_CONNECTIONS"),
            DEFAULT_MAX_CONNECTIONS,
        )?;
        let max_cas_retries = parse_positive(
            "INVENTORY_MAX_CAS_RETRIES",
            get("INVENTORY_MAX_CAS_RETRIES"),
            DEFAULT_MAX_CAS_RETRIES,
        )?;

        let database_url = get("DATABASE_URL");
        if backend == InventoryBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing {
                name: "DATABASE_URL",
                backend: backend.as_str(),
            });
        }

        Ok(Self {
            backend,
            database_url,
            max_connections,
            bulk_mode,
            max_cas_retries,
        })
    }
}

fn parse_positive(name: &'static str, raw: Option<String>, default: u32) -> Result<u32, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().parse::<u32>() {
        Ok(0) => Err(ConfigError::Invalid {
            name,
            reason: "must be at least 1".to_string(),
        }),
        Ok(v) => Ok(v),
        Err(e) => Err(ConfigError::Invalid {
            name,
            reason: format!("'{raw}': {e}"),
        }),
    }
}
