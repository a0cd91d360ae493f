//! Metadata store trait and implementations.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{ClientRepo, UploadRecordRepo, UsageRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: ClientRepo + UsageRepo + UploadRecordRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;

    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // serializes writers instead of failing them with "database is locked".
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::warn!(
            path = %path.display(),
            "SQLite metadata store is for single-instance deployments and tests. \
             Use PostgreSQL when several server instances share quota counters."
        );

        Ok(store)
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;

        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl ClientRepo for SqliteStore {
        async fn get_client(&self, client_id: &str) -> MetadataResult<Option<ClientRow>> {
            let row = sqlx::query_as::<_, ClientRow>("SELECT * FROM clients WHERE client_id = ?")
                .bind(client_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_client_by_subject(
            &self,
            auth_subject: &str,
        ) -> MetadataResult<Option<ClientRow>> {
            let row =
                sqlx::query_as::<_, ClientRow>("SELECT * FROM clients WHERE auth_subject = ?")
                    .bind(auth_subject)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn next_client_sequence(&self, prefix: &str) -> MetadataResult<i64> {
            let value: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO client_sequences (prefix, last_value) VALUES (?, 1)
                ON CONFLICT(prefix) DO UPDATE SET last_value = client_sequences.last_value + 1
                RETURNING last_value
                "#,
            )
            .bind(prefix)
            .fetch_one(&self.pool)
            .await?;
            Ok(value)
        }

        async fn insert_client(&self, client: &ClientRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO clients (
                    client_id, auth_subject, email, tier, uploads_made,
                    created_at, updated_at, deactivated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&client.client_id)
            .bind(&client.auth_subject)
            .bind(&client.email)
            .bind(&client.tier)
            .bind(client.uploads_made)
            .bind(client.created_at)
            .bind(client.updated_at)
            .bind(client.deactivated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MetadataError::from_insert(e, || {
                    format!(
                        "client {} or subject {}",
                        client.client_id, client.auth_subject
                    )
                })
            })?;
            Ok(())
        }

        async fn update_client_tier(
            &self,
            client_id: &str,
            tier: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<ClientRow> {
            sqlx::query_as::<_, ClientRow>(
                "UPDATE clients SET tier = ?, updated_at = ? WHERE client_id = ? RETURNING *",
            )
            .bind(tier)
            .bind(updated_at)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("client {client_id}")))
        }

        async fn update_client_email(
            &self,
            client_id: &str,
            email: Option<&str>,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<ClientRow> {
            sqlx::query_as::<_, ClientRow>(
                "UPDATE clients SET email = ?, updated_at = ? WHERE client_id = ? RETURNING *",
            )
            .bind(email)
            .bind(updated_at)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("client {client_id}")))
        }

        async fn deactivate_client(
            &self,
            client_id: &str,
            at: OffsetDateTime,
        ) -> MetadataResult<ClientRow> {
            sqlx::query_as::<_, ClientRow>(
                r#"
                UPDATE clients
                SET deactivated_at = COALESCE(deactivated_at, ?), updated_at = ?
                WHERE client_id = ?
                RETURNING *
                "#,
            )
            .bind(at)
            .bind(at)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("client {client_id}")))
        }

        async fn increment_uploads_made(
            &self,
            client_id: &str,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<i64> {
            sqlx::query_scalar::<_, i64>(
                r#"
                UPDATE clients SET uploads_made = uploads_made + 1, updated_at = ?
                WHERE client_id = ?
                RETURNING uploads_made
                "#,
            )
            .bind(updated_at)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MetadataError::NotFound(format!("client {client_id}")))
        }
    }

    #[async_trait]
    impl UsageRepo for SqliteStore {
        async fn increment_usage(
            &self,
            key: &UsageKey,
            amount: i64,
            tokens: i64,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<UsageCounterRow> {
            let row = sqlx::query_as::<_, UsageCounterRow>(
                r#"
                INSERT INTO usage_counters (
                    client_id, counter_kind, period, period_start, count, tokens_used, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(client_id, counter_kind, period, period_start) DO UPDATE SET
                    count = usage_counters.count + excluded.count,
                    tokens_used = usage_counters.tokens_used + excluded.tokens_used,
                    updated_at = excluded.updated_at
                RETURNING *
                "#,
            )
            .bind(&key.client_id)
            .bind(&key.counter_kind)
            .bind(&key.period)
            .bind(key.period_start)
            .bind(amount)
            .bind(tokens)
            .bind(updated_at)
            .fetch_one(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_usage(&self, key: &UsageKey) -> MetadataResult<Option<UsageCounterRow>> {
            let row = sqlx::query_as::<_, UsageCounterRow>(
                r#"
                SELECT * FROM usage_counters
                WHERE client_id = ? AND counter_kind = ? AND period = ? AND period_start = ?
                "#,
            )
            .bind(&key.client_id)
            .bind(&key.counter_kind)
            .bind(&key.period)
            .bind(key.period_start)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_usage(&self, client_id: &str) -> MetadataResult<Vec<UsageCounterRow>> {
            let rows = sqlx::query_as::<_, UsageCounterRow>(
                r#"
                SELECT * FROM usage_counters
                WHERE client_id = ?
                ORDER BY period_start DESC, counter_kind, period
                "#,
            )
            .bind(client_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl UploadRecordRepo for SqliteStore {
        async fn create_upload_record(&self, record: &UploadRecordRow) -> MetadataResult<()> {
            sqlx::query(
                r#"
                INSERT INTO upload_records (
                    upload_id, client_id, content_hash, file_name, content_type,
                    category, size_bytes, object_key, status, error_detail,
                    uploaded_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record.upload_id)
            .bind(&record.client_id)
            .bind(&record.content_hash)
            .bind(&record.file_name)
            .bind(&record.content_type)
            .bind(&record.category)
            .bind(record.size_bytes)
            .bind(&record.object_key)
            .bind(&record.status)
            .bind(&record.error_detail)
            .bind(record.uploaded_at)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                MetadataError::from_insert(e, || {
                    format!(
                        "upload of {} for client {}",
                        record.content_hash, record.client_id
                    )
                })
            })?;
            Ok(())
        }

        async fn get_upload_record(
            &self,
            upload_id: Uuid,
        ) -> MetadataResult<Option<UploadRecordRow>> {
            let row = sqlx::query_as::<_, UploadRecordRow>(
                "SELECT * FROM upload_records WHERE upload_id = ?",
            )
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn find_active_upload_by_hash(
            &self,
            client_id: &str,
            content_hash: &str,
        ) -> MetadataResult<Option<UploadRecordRow>> {
            let row = sqlx::query_as::<_, UploadRecordRow>(
                r#"
                SELECT * FROM upload_records
                WHERE client_id = ? AND content_hash = ? AND status <> 'failed'
                LIMIT 1
                "#,
            )
            .bind(client_id)
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn update_upload_status(
            &self,
            upload_id: Uuid,
            from: &str,
            to: &str,
            error_detail: Option<&str>,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<bool> {
            let result = sqlx::query(
                r#"
                UPDATE upload_records
                SET status = ?, error_detail = ?, updated_at = ?
                WHERE upload_id = ? AND status = ?
                "#,
            )
            .bind(to)
            .bind(error_detail)
            .bind(updated_at)
            .bind(upload_id)
            .bind(from)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        }

        async fn list_upload_records(
            &self,
            client_id: &str,
            limit: u32,
        ) -> MetadataResult<Vec<UploadRecordRow>> {
            let rows = sqlx::query_as::<_, UploadRecordRow>(
                r#"
                SELECT * FROM upload_records
                WHERE client_id = ?
                ORDER BY uploaded_at DESC
                LIMIT ?
                "#,
            )
            .bind(client_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }
}

const SCHEMA_SQL: &str = r#"
-- Per-prefix client ID sequences
CREATE TABLE IF NOT EXISTS client_sequences (
    prefix TEXT PRIMARY KEY,
    last_value INTEGER NOT NULL
);

-- Client identities, one per external auth subject
CREATE TABLE IF NOT EXISTS clients (
    client_id TEXT PRIMARY KEY,
    auth_subject TEXT NOT NULL UNIQUE,
    email TEXT,
    tier TEXT NOT NULL DEFAULT 'free',
    uploads_made INTEGER NOT NULL DEFAULT 0 CHECK (uploads_made >= 0),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deactivated_at TEXT
);

-- Calendar-aligned usage counters
CREATE TABLE IF NOT EXISTS usage_counters (
    client_id TEXT NOT NULL REFERENCES clients(client_id),
    counter_kind TEXT NOT NULL CHECK (counter_kind IN ('ai_messages', 'uploads')),
    period TEXT NOT NULL CHECK (period IN ('daily', 'monthly')),
    period_start TEXT NOT NULL,
    count INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
    tokens_used INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (client_id, counter_kind, period, period_start)
);

-- Upload records
CREATE TABLE IF NOT EXISTS upload_records (
    upload_id BLOB PRIMARY KEY,
    client_id TEXT NOT NULL REFERENCES clients(client_id),
    content_hash TEXT NOT NULL,
    file_name TEXT NOT NULL,
    content_type TEXT NOT NULL,
    category TEXT NOT NULL,
    size_bytes INTEGER NOT NULL CHECK (size_bytes >= 0),
    object_key TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('processing', 'completed', 'failed')),
    error_detail TEXT,
    uploaded_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
-- Only one live record per (client, content); failed records may repeat
CREATE UNIQUE INDEX IF NOT EXISTS idx_upload_records_active_hash
    ON upload_records(client_id, content_hash) WHERE status <> 'failed';
CREATE INDEX IF NOT EXISTS idx_upload_records_client_date
    ON upload_records(client_id, uploaded_at);
"#;
