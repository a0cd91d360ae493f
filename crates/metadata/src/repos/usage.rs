//! Per-period usage counter repository.

use crate::error::MetadataResult;
use crate::models::{UsageCounterRow, UsageKey};
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for usage counters.
#[async_trait]
pub trait UsageRepo: Send + Sync {
    /// Add `amount` (and `tokens`) to the counter at `key`, creating the row
    /// if this is the first increment in the period.
    ///
    /// Runs as a single upsert statement, so concurrent increments on the same
    /// key never lose updates.
    async fn increment_usage(
        &self,
        key: &UsageKey,
        amount: i64,
        tokens: i64,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<UsageCounterRow>;

    /// Read a counter. Never creates a row.
    async fn get_usage(&self, key: &UsageKey) -> MetadataResult<Option<UsageCounterRow>>;

    /// All counters for a client, most recent periods first.
    async fn list_usage(&self, client_id: &str) -> MetadataResult<Vec<UsageCounterRow>>;
}
