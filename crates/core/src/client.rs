//! Client identity types.

use crate::tier::Tier;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Human-readable, sequentially allocated client identifier (`HDL-00001`).
///
/// Once assigned to a client, an ID is never reassigned or reused.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientId(String);

impl ClientId {
    /// Build the ID for sequence number `seq` under `prefix`.
    ///
    /// The numeric part is zero-padded to [`crate::CLIENT_ID_DIGITS`] and
    /// simply grows past that width once the sequence exceeds it.
    pub fn from_sequence(prefix: &str, seq: u64) -> crate::Result<Self> {
        validate_prefix(prefix)?;
        if seq == 0 {
            return Err(crate::Error::InvalidClientId(
                "sequence numbers start at 1".to_string(),
            ));
        }
        Ok(Self(format!(
            "{prefix}-{seq:0width$}",
            width = crate::CLIENT_ID_DIGITS
        )))
    }

    /// Parse and validate an existing ID.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let (prefix, digits) = s
            .rsplit_once('-')
            .ok_or_else(|| crate::Error::InvalidClientId(format!("missing separator: {s}")))?;
        validate_prefix(prefix)?;
        if digits.len() < crate::CLIENT_ID_DIGITS || !digits.chars().all(|c| c.is_ascii_digit())
        {
            return Err(crate::Error::InvalidClientId(format!(
                "expected at least {} digits: {s}",
                crate::CLIENT_ID_DIGITS
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_prefix(prefix: &str) -> crate::Result<()> {
    if prefix.is_empty()
        || prefix.len() > 16
        || !prefix.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    {
        return Err(crate::Error::InvalidClientId(format!(
            "prefix must be 1-16 uppercase alphanumerics: {prefix:?}"
        )));
    }
    Ok(())
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ClientId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<ClientId> for String {
    fn from(id: ClientId) -> Self {
        id.0
    }
}

/// Identity handed to the core by the external token verifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// Stable subject identifier from the identity provider.
    pub subject: String,
    /// Verified email, when the provider supplies one.
    pub email: Option<String>,
}

/// A durable client record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Client {
    pub client_id: ClientId,
    pub auth_subject: String,
    pub email: Option<String>,
    /// Raw tier string as held by the subscription record. May name a tier
    /// this service does not know; see [`Client::known_tier`].
    pub tier: String,
    pub uploads_made: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub deactivated_at: Option<OffsetDateTime>,
}

impl Client {
    /// The parsed tier, or None if the stored value is not a known tier.
    pub fn known_tier(&self) -> Option<Tier> {
        Tier::parse(&self.tier).ok()
    }

    /// Whether the client has been soft-deactivated.
    pub fn is_active(&self) -> bool {
        self.deactivated_at.is_none()
    }
}
