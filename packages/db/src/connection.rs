//! Database connection management.

use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect as connect_any};
use surrealdb::opt::auth::Root;
use thiserror::Error;

/// Database connection wrapper.
pub type Database = Surreal<Any>;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection mode: "mem://", "rocksdb://path", "ws://host", ...
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "taskqueue".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    pub const ENDPOINT_VAR: &'static str = "SURREAL_ENDPOINT";
    pub const NAMESPACE_VAR: &'static str = "SURREAL_NAMESPACE";
    pub const DATABASE_VAR: &'static str = "SURREAL_DATABASE";
    pub const USER_VAR: &'static str = "SURREAL_USER";
    pub const PASS_VAR: &'static str = "SURREAL_PASS";

    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a config for RocksDB persistence (requires rocksdb feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("rocksdb://{}", path.into()),
            ..Default::default()
        }
    }

    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`; unset values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            endpoint: non_empty(Self::ENDPOINT_VAR).unwrap_or(defaults.endpoint),
            namespace: non_empty(Self::NAMESPACE_VAR).unwrap_or(defaults.namespace),
            database: non_empty(Self::DATABASE_VAR).unwrap_or(defaults.database),
            credentials: non_empty(Self::USER_VAR).zip(non_empty(Self::PASS_VAR)),
        }
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Open a connection and select the configured namespace and database.
///
/// Every call returns an independent handle; `mem://` endpoints get a fresh datastore.
pub async fn connect(config: &DbConfig) -> Result<Database, DbError> {
    tracing::info!("Connecting to database: {}", config.endpoint);

    let db = connect_any(config.endpoint.as_str()).await?;

    // Authenticate if credentials provided
    if let Some((username, password)) = &config.credentials {
        db.signin(Root {
            username: username.as_str(),
            password: password.as_str(),
        })
        .await?;
    }

    db.use_ns(config.namespace.as_str())
        .use_db(config.database.as_str())
        .await?;

    tracing::info!(
        "Connected to database: {}/{}",
        config.namespace,
        config.database
    );

    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_defaults() {
        let config = DbConfig::from_lookup(|key| match key {
            "SURREAL_ENDPOINT" => Some("rocksdb://./data/queue".to_string()),
            "SURREAL_USER" => Some("root".to_string()),
            "SURREAL_PASS" => Some("secret".to_string()),
            _ => None,
        });

        assert_eq!(config.endpoint, "rocksdb://./data/queue");
        assert_eq!(config.namespace, "taskqueue");
        assert_eq!(config.database, "main");
        assert_eq!(
            config.credentials,
            Some(("root".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn credentials_need_both_halves() {
        let config = DbConfig::from_lookup(|key| {
            (key == "SURREAL_USER").then(|| "root".to_string())
        });
        assert!(config.credentials.is_none());
    }
}
