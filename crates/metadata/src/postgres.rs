//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{ClientRepo, UploadRecordRepo, UsageRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use hodie_core::config::PgSslMode;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
///
/// Required when more than one server instance shares quota counters.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// This allows credentials to be passed separately (e.g., passwords via
    /// environment variables).
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

#[async_trait]
impl ClientRepo for PostgresStore {
    async fn get_client(&self, client_id: &str) -> MetadataResult<Option<ClientRow>> {
        let row = sqlx::query_as::<_, ClientRow>("SELECT * FROM clients WHERE client_id = $1")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_client_by_subject(
        &self,
        auth_subject: &str,
    ) -> MetadataResult<Option<ClientRow>> {
        let row = sqlx::query_as::<_, ClientRow>("SELECT * FROM clients WHERE auth_subject = $1")
            .bind(auth_subject)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn next_client_sequence(&self, prefix: &str) -> MetadataResult<i64> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO client_sequences (prefix, last_value) VALUES ($1, 1)
            ON CONFLICT (prefix) DO UPDATE SET last_value = client_sequences.last_value + 1
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
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
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
            "UPDATE clients SET tier = $1, updated_at = $2 WHERE client_id = $3 RETURNING *",
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
            "UPDATE clients SET email = $1, updated_at = $2 WHERE client_id = $3 RETURNING *",
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
            SET deactivated_at = COALESCE(deactivated_at, $1), updated_at = $1
            WHERE client_id = $2
            RETURNING *
            "#,
        )
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
            UPDATE clients SET uploads_made = uploads_made + 1, updated_at = $1
            WHERE client_id = $2
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
impl UsageRepo for PostgresStore {
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
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (client_id, counter_kind, period, period_start) DO UPDATE SET
                count = usage_counters.count + EXCLUDED.count,
                tokens_used = usage_counters.tokens_used + EXCLUDED.tokens_used,
                updated_at = EXCLUDED.updated_at
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
            WHERE client_id = $1 AND counter_kind = $2 AND period = $3 AND period_start = $4
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
            WHERE client_id = $1
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
impl UploadRecordRepo for PostgresStore {
    async fn create_upload_record(&self, record: &UploadRecordRow) -> MetadataResult<()> {
        sqlx::query(
            r#"
            INSERT INTO upload_records (
                upload_id, client_id, content_hash, file_name, content_type,
                category, size_bytes, object_key, status, error_detail,
                uploaded_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
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

    async fn get_upload_record(&self, upload_id: Uuid) -> MetadataResult<Option<UploadRecordRow>> {
        let row = sqlx::query_as::<_, UploadRecordRow>(
            "SELECT * FROM upload_records WHERE upload_id = $1",
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
            WHERE client_id = $1 AND content_hash = $2 AND status <> 'failed'
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
            SET status = $1, error_detail = $2, updated_at = $3
            WHERE upload_id = $4 AND status = $5
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
            WHERE client_id = $1
            ORDER BY uploaded_at DESC
            LIMIT $2
            "#,
        )
        .bind(client_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::postgres_schema_statements;

    #[test]
    fn postgres_schema_statements_skips_empty_and_comment_only() {
        let schema = r#"
            -- comment only

            CREATE TABLE foo (id int);
            ;
            -- another comment
            CREATE TABLE bar (id int);
        "#;

        let statements = postgres_schema_statements(schema);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("CREATE TABLE foo"));
        assert!(statements[1].contains("CREATE TABLE bar"));
    }

    #[test]
    fn embedded_schema_splits_into_statements() {
        let statements = postgres_schema_statements(super::POSTGRES_SCHEMA);
        assert!(statements.iter().any(|s| s.contains("CREATE TABLE IF NOT EXISTS clients")));
        assert!(
            statements
                .iter()
                .any(|s| s.contains("idx_upload_records_active_hash"))
        );
    }
}
