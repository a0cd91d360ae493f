//! Metadata store test utilities.

use hodie_metadata::{MetadataError, MetadataResult, MetadataStore, PostgresStore, SqliteStore};
use sqlx::{PgPool, SqlitePool};
use std::sync::Arc;
use tempfile::TempDir;
use testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

/// Stable prefix for Docker/container startup failures in Postgres test setup.
/// Tests use this marker to decide whether to skip due to unavailable Docker.
pub const POSTGRES_CONTAINER_START_ERR_PREFIX: &str = "postgres-container-start:";

/// A test metadata store wrapper that cleans up on drop.
#[allow(dead_code)]
pub struct TestMetadata {
    pub store: Arc<dyn MetadataStore>,
    raw: SqlitePool,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestMetadata {
    /// Create a new file-backed SQLite store in a temp directory.
    pub async fn new() -> MetadataResult<Self> {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("test.db");
        let store = Arc::new(SqliteStore::new(&db_path).await?);
        let raw = SqlitePool::connect(&format!("sqlite:{}", db_path.display())).await?;

        Ok(Self {
            store,
            raw,
            _temp_dir: temp_dir,
        })
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }

    /// A separate connection to the same database file for raw queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.raw
    }
}

/// PostgreSQL test metadata store wrapper that manages a testcontainer.
#[allow(dead_code)]
pub struct PostgresTestMetadata {
    pub store: Arc<dyn MetadataStore>,
    raw: PgPool,
    _container: ContainerAsync<Postgres>,
}

#[allow(dead_code)]
impl PostgresTestMetadata {
    /// Create a new PostgreSQL test store with a testcontainer.
    pub async fn new() -> MetadataResult<Self> {
        let container = Postgres::default()
            .with_tag("15-alpine")
            .start()
            .await
            .map_err(|e| {
                MetadataError::Config(format!(
                    "{} Failed to start PostgreSQL container: {e}",
                    POSTGRES_CONTAINER_START_ERR_PREFIX
                ))
            })?;

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("Failed to get port");

        // Default credentials from testcontainers-modules postgres
        let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

        let store = Arc::new(PostgresStore::from_url(&url, 5, Some(5000)).await?);
        let raw = PgPool::connect(&url).await?;

        Ok(Self {
            store,
            raw,
            _container: container,
        })
    }

    pub fn store(&self) -> Arc<dyn MetadataStore> {
        self.store.clone()
    }

    /// A separate connection pool to the container for raw queries.
    pub fn pool(&self) -> &PgPool {
        &self.raw
    }
}

/// Try to create a PostgreSQL test store, skipping if Docker is unavailable
/// or SKIP_POSTGRES_TESTS is set.
///
/// Only container-start failures (Docker unavailable) cause a skip.
/// Schema, migration, or connection errors still panic so real regressions
/// are not silently swallowed.
#[allow(dead_code)]
pub async fn postgres_or_skip() -> Option<PostgresTestMetadata> {
    if std::env::var("SKIP_POSTGRES_TESTS").is_ok() {
        return None;
    }
    match PostgresTestMetadata::new().await {
        Ok(metadata) => Some(metadata),
        Err(err) => {
            let msg = err.to_string();
            if msg.contains(POSTGRES_CONTAINER_START_ERR_PREFIX) {
                eprintln!("Skipping PostgreSQL test (Docker unavailable): {msg}");
                None
            } else {
                panic!("PostgreSQL test setup failed: {msg}");
            }
        }
    }
}

/// Run a test against both SQLite and PostgreSQL backends.
#[allow(dead_code)]
pub async fn run_metadata_test_both<F, Fut>(test_fn: F)
where
    F: Fn(Arc<dyn MetadataStore>) -> Fut + Clone,
    Fut: std::future::Future<Output = ()>,
{
    let sqlite = TestMetadata::new()
        .await
        .expect("Failed to create SQLite test metadata");
    test_fn.clone()(sqlite.store()).await;

    if let Some(postgres) = postgres_or_skip().await {
        test_fn(postgres.store()).await;
    }
}
