use keel_db_schema::SchemaError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum Error {
    /// Reading the live schema failed. Raised before any DDL is issued.
    #[error("failed to read {catalog} catalog: {message}")]
    Introspection {
        catalog: &'static str,
        message: String,
    },

    /// A desired column type has no mapping in the active dialect.
    #[error("column '{table}.{column}' has type '{column_type}', which {dialect} cannot represent")]
    UnsupportedType {
        table: String,
        column: String,
        column_type: String,
        dialect: &'static str,
    },

    /// A DDL statement failed. `source` is the error the database returned.
    #[error("{operation} failed: {source}")]
    DdlExecution {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A drop was attempted while something still depended on the object.
    #[error("dependency resolution failed: {0}")]
    DependencyResolution(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(#[from] SchemaError),

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Wrap a driver failure for the operation described by `operation`.
    pub fn ddl(
        operation: impl std::fmt::Display,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Error::DdlExecution {
            operation: operation.to_string(),
            source: source.into(),
        }
    }
}
