//! Configuration file handling.
//!
//! Looks for `.config/keel.toml` in the current directory or any parent
//! directory:
//!
//! ```toml
//! database_url = "postgres://localhost/app"
//! schema = "public"
//! skip_tables = ["audit_log"]
//! ```
//!
//! `DATABASE_URL` (from the environment or a `.env` file) wins over the
//! file's `database_url`.

use camino::{Utf8Path, Utf8PathBuf};
use deadpool_postgres::{Pool, Runtime};
use keel_db_schema::MetadataGraph;
use serde::Deserialize;
use tokio_postgres::NoTls;

use crate::postgres::PostgresDriver;

const CONFIG_FILE: &str = ".config/keel.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Connection string. Overridden by `DATABASE_URL`.
    pub database_url: Option<String>,
    /// Namespace the Postgres driver works in.
    pub schema: String,
    /// Tables that exist in the graph but are never synchronized.
    pub skip_tables: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            schema: "public".to_string(),
            skip_tables: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration, searching up from the current directory.
    pub fn load() -> Result<(Config, Utf8PathBuf), ConfigError> {
        let cwd = Utf8PathBuf::try_from(std::env::current_dir().map_err(|source| {
            ConfigError::Io {
                path: Utf8PathBuf::from("."),
                source,
            }
        })?)?;
        Self::load_from(&cwd)
    }

    /// Load configuration starting from a specific directory.
    pub fn load_from(start: &Utf8Path) -> Result<(Config, Utf8PathBuf), ConfigError> {
        let path = find_config_file(start)?;
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        let mut config = Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;

        let _ = dotenvy::dotenv();
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = Some(url);
        }

        tracing::debug!(%path, schema = %config.schema, "loaded config");
        Ok((config, path))
    }

    /// Parse a config file's contents. No environment lookup.
    pub fn parse(content: &str) -> Result<Config, toml::de::Error> {
        toml::from_str(content)
    }

    /// Mark every table in `skip_tables` as not synchronized.
    pub fn apply_to(&self, graph: &mut MetadataGraph) {
        for name in &self.skip_tables {
            if !graph.skip(name) {
                tracing::warn!(table = %name, "skip_tables names a table the graph does not have");
            }
        }
    }

    /// Build a connection pool for `database_url`.
    pub fn pool(&self) -> Result<Pool, ConfigError> {
        let url = self
            .database_url
            .as_deref()
            .ok_or(ConfigError::MissingDatabaseUrl)?;
        let mut cfg = deadpool_postgres::Config::new();
        cfg.url = Some(url.to_string());
        Ok(cfg.create_pool(Some(Runtime::Tokio1), NoTls)?)
    }

    /// Check a connection out of `pool` as a driver for the configured schema.
    pub async fn driver(&self, pool: &Pool) -> crate::Result<PostgresDriver> {
        let conn = pool.get().await?;
        Ok(PostgresDriver::new(conn).with_schema(&self.schema))
    }
}

/// Find `.config/keel.toml` by searching up the directory tree.
fn find_config_file(start: &Utf8Path) -> Result<Utf8PathBuf, ConfigError> {
    let mut current = start.to_path_buf();

    loop {
        let path = current.join(CONFIG_FILE);
        if path.exists() {
            return Ok(path);
        }

        if !current.pop() {
            return Err(ConfigError::NotFound {
                start: start.to_path_buf(),
            });
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no .config/keel.toml found in {start} or any parent")]
    NotFound { start: Utf8PathBuf },

    #[error("failed to read {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("current directory is not valid UTF-8: {0}")]
    NonUtf8Path(#[from] camino::FromPathBufError),

    #[error("no database URL: set DATABASE_URL or database_url in .config/keel.toml")]
    MissingDatabaseUrl,

    #[error("failed to create connection pool: {0}")]
    Pool(#[from] deadpool_postgres::CreatePoolError),
}
