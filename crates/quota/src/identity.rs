//! Verified subject to durable client resolution.

use crate::clock::Clock;
use crate::error::{QuotaError, QuotaResult, bounded};
use hodie_core::{Client, ClientId, VerifiedIdentity};
use hodie_metadata::repos::ClientRepo;
use hodie_metadata::{ClientRow, MetadataError, MetadataStore};
use std::sync::Arc;
use std::time::Duration;

/// Result of resolving an identity.
#[derive(Clone, Debug)]
pub struct Resolution {
    pub client: Client,
    /// True if this call created the client.
    pub created: bool,
}

/// Maps verified auth subjects to client records, creating them on first sight.
///
/// The unique index on `auth_subject` is the only arbiter between concurrent
/// first-time requests: every resolver attempts its insert, and losers re-read
/// and return the winner's record.
pub struct IdentityResolver {
    store: Arc<dyn MetadataStore>,
    clock: Arc<dyn Clock>,
    prefix: String,
    max_attempts: u32,
    timeout: Duration,
}

impl IdentityResolver {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        clock: Arc<dyn Clock>,
        prefix: impl Into<String>,
        max_attempts: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            prefix: prefix.into(),
            max_attempts: max_attempts.max(1),
            timeout,
        }
    }

    /// Return the client for `identity`, creating it with the default tier if
    /// the subject has never been seen.
    pub async fn resolve(&self, identity: &VerifiedIdentity) -> QuotaResult<Resolution> {
        bounded("identity resolution", self.timeout, self.resolve_inner(identity)).await
    }

    async fn resolve_inner(&self, identity: &VerifiedIdentity) -> QuotaResult<Resolution> {
        for attempt in 1..=self.max_attempts {
            if let Some(row) = self.store.get_client_by_subject(&identity.subject).await? {
                return Ok(Resolution {
                    client: row.into_client()?,
                    created: false,
                });
            }

            // A sequence value consumed by a losing insert is skipped, never reissued.
            let seq = self.store.next_client_sequence(&self.prefix).await?;
            let seq = u64::try_from(seq)
                .map_err(|_| QuotaError::Internal(format!("negative client sequence {seq}")))?;
            let client_id = ClientId::from_sequence(&self.prefix, seq)?;
            let row = ClientRow::new_client(
                &client_id,
                &identity.subject,
                identity.email.as_deref(),
                self.clock.now(),
            );

            match self.store.insert_client(&row).await {
                Ok(()) => {
                    tracing::info!(
                        client_id = %client_id,
                        attempt = attempt,
                        "Created client for new subject"
                    );
                    return Ok(Resolution {
                        client: row.into_client()?,
                        created: true,
                    });
                }
                Err(MetadataError::AlreadyExists(what)) => {
                    tracing::debug!(
                        client_id = %client_id,
                        attempt = attempt,
                        conflict = %what,
                        "Client insert lost a race; re-reading"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        // The final insert may have lost to a winner we have not read yet.
        if let Some(row) = self.store.get_client_by_subject(&identity.subject).await? {
            return Ok(Resolution {
                client: row.into_client()?,
                created: false,
            });
        }

        tracing::warn!(
            attempts = self.max_attempts,
            "Client creation kept conflicting"
        );
        Err(QuotaError::IdentityCreationConflict {
            attempts: self.max_attempts,
        })
    }
}
