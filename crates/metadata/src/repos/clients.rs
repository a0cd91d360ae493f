//! Client identity repository.

use crate::error::MetadataResult;
use crate::models::ClientRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for client identity records.
#[async_trait]
pub trait ClientRepo: Send + Sync {
    /// Get a client by its allocated ID.
    async fn get_client(&self, client_id: &str) -> MetadataResult<Option<ClientRow>>;

    /// Get a client by the external auth subject it was created for.
    async fn get_client_by_subject(&self, auth_subject: &str)
    -> MetadataResult<Option<ClientRow>>;

    /// Atomically advance the sequence for `prefix` and return the new value.
    ///
    /// The first call for a prefix returns 1. Values are never handed out
    /// twice, even when the caller later fails to use them.
    async fn next_client_sequence(&self, prefix: &str) -> MetadataResult<i64>;

    /// Insert a new client.
    ///
    /// Returns `AlreadyExists` if either the client ID or the auth subject is
    /// already taken.
    async fn insert_client(&self, client: &ClientRow) -> MetadataResult<()>;

    /// Set the tier string. Returns `NotFound` for unknown clients.
    async fn update_client_tier(
        &self,
        client_id: &str,
        tier: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<ClientRow>;

    /// Replace the stored email. Returns `NotFound` for unknown clients.
    async fn update_client_email(
        &self,
        client_id: &str,
        email: Option<&str>,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<ClientRow>;

    /// Mark a client deactivated. Already deactivated clients keep their
    /// original timestamp.
    async fn deactivate_client(
        &self,
        client_id: &str,
        at: OffsetDateTime,
    ) -> MetadataResult<ClientRow>;

    /// Atomically increment the lifetime upload counter and return the new value.
    async fn increment_uploads_made(
        &self,
        client_id: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<i64>;
}
