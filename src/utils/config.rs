use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::engine::dialect::Dialect;
use crate::utils::error::{RelqError, RelqResult};

/// Main engine configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    pub dialect: Dialect,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub sqlite: Option<SqliteConfig>,
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
}

/// Per-session execution behavior
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Allow unloaded associations to be resolved with a second query
    pub allow_deferred_loading: bool,
    /// Run the page and count statements of `fetch_results` concurrently when the store allows it
    pub concurrent_count_query: bool,
    /// Resolve associations declared eager after each entity query
    pub resolve_eager_associations: bool,
}

/// SQLite execution context configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SqliteConfig {
    /// Database file; `None` opens an in-memory database
    pub path: Option<String>,
    pub busy_timeout_ms: u64,
}

/// PostgreSQL execution context configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub statement_timeout_ms: Option<u64>,
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> RelqResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelqError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    /// Parse configuration from a JSON document
    pub fn from_json_str(content: &str) -> RelqResult<Self> {
        let config: EngineConfig = serde_json::from_str(content)
            .map_err(|e| RelqError::Configuration(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the backend section matches the selected dialect
    pub fn validate(&self) -> RelqResult<()> {
        match self.dialect {
            Dialect::Sqlite if self.postgres.is_some() && self.sqlite.is_none() => {
                Err(RelqError::Configuration(
                    "dialect is sqlite but only a postgres section is present".to_string(),
                ))
            }
            Dialect::Postgres if self.postgres.is_none() => Err(RelqError::Configuration(
                "dialect is postgres but no postgres section is present".to_string(),
            )),
            _ => {
                if let Some(pg) = &self.postgres {
                    if pg.max_connections == 0 {
                        return Err(RelqError::Configuration(
                            "postgres.max_connections must be at least 1".to_string(),
                        ));
                    }
                }
                Ok(())
            }
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::Sqlite,
            session: SessionConfig::default(),
            sqlite: Some(SqliteConfig::default()),
            postgres: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            allow_deferred_loading: true,
            concurrent_count_query: true,
            resolve_eager_associations: true,
        }
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5_000,
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            dbname: "postgres".to_string(),
            max_connections: 10,
            connect_timeout_secs: 30,
            statement_timeout_ms: Some(30_000),
        }
    }
}
