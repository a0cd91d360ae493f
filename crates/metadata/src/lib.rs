//! Metadata store abstraction and implementations for Hodie.
//!
//! This crate persists the quota service's shared state:
//! - Client identities and the per-prefix ID sequence
//! - Calendar-aligned usage counters
//! - Upload records used for content-addressed duplicate detection
//!
//! All coordination between server instances happens through this store;
//! counters are only ever changed with single-statement atomic upserts.

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::{ClientRow, UploadRecordRow, UsageCounterRow, UsageKey};
pub use postgres::PostgresStore;
pub use store::{MetadataStore, SqliteStore};

use hodie_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
        MetadataConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } => {
            let store = if let Some(url) = url {
                tracing::info!("Connecting to PostgreSQL using connection URL");
                PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                PostgresStore::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                )
                .await?
            } else {
                return Err(MetadataError::Config(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ));
            };
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
