//! Configuration types shared across crates.

use crate::tier::{AiBackend, Tier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// The endpoint is unauthenticated; restrict it at the network level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Maximum JSON request body size in bytes.
    #[serde(default = "default_max_json_body_bytes")]
    pub max_json_body_bytes: usize,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_max_json_body_bytes() -> usize {
    1024 * 1024 // 1 MiB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
            max_json_body_bytes: default_max_json_body_bytes(),
        }
    }
}

/// Admin token configuration.
///
/// The admin token only grants access to `/v1/admin/*`. It never resolves to
/// a client identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Pre-computed hash of the admin token (SHA256 hex, 64 characters).
    /// Generate with: `echo -n "your-secret-token" | sha256sum`
    pub token_hash: String,
}

impl AdminConfig {
    /// Create a test configuration with a dummy token hash.
    ///
    /// **For testing only.** The hash is deterministic but not a real token.
    pub fn for_testing() -> Self {
        Self {
            // SHA256 of "test-admin-token"
            token_hash: "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5"
                .to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_token_hash("admin.token_hash", &self.token_hash)
    }
}

/// One statically configured bearer token and the identity it verifies to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StaticTokenConfig {
    /// SHA256 hex of the raw bearer token.
    pub token_hash: String,
    /// Identity-provider subject (e.g. `auth0|64f1...`).
    pub subject: String,
    /// Verified email for the subject.
    pub email: Option<String>,
}

/// Token verification configuration.
///
/// Production deployments verify Auth0/Firebase tokens in front of this
/// service; the static table covers development and tests.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<StaticTokenConfig>,
}

impl AuthConfig {
    pub fn validate(&self) -> Result<(), String> {
        for (i, token) in self.tokens.iter().enumerate() {
            validate_token_hash(&format!("auth.tokens[{i}].token_hash"), &token.token_hash)?;
            if token.subject.trim().is_empty() {
                return Err(format!("auth.tokens[{i}].subject cannot be empty"));
            }
        }
        Ok(())
    }
}

fn validate_token_hash(field: &str, hash: &str) -> Result<(), String> {
    if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("{field} must be 64 hex characters (SHA256)"));
    }
    Ok(())
}

/// Client identity allocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Prefix of allocated client IDs (`HDL` gives `HDL-00001`).
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// How many insert attempts a first-time resolve makes before reporting
    /// a creation conflict.
    #[serde(default = "default_max_create_attempts")]
    pub max_create_attempts: u32,
}

fn default_client_id_prefix() -> String {
    crate::DEFAULT_CLIENT_ID_PREFIX.to_string()
}

fn default_max_create_attempts() -> u32 {
    3
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            client_id_prefix: default_client_id_prefix(),
            max_create_attempts: default_max_create_attempts(),
        }
    }
}

impl IdentityConfig {
    pub fn validate(&self) -> Result<(), String> {
        crate::ClientId::from_sequence(&self.client_id_prefix, 1)
            .map_err(|e| format!("identity.client_id_prefix: {e}"))?;
        if self.max_create_attempts == 0 {
            return Err("identity.max_create_attempts cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Per-tier routing and ceilings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicyConfig {
    /// AI provider for this tier.
    pub backend: AiBackend,
    /// Provider model name.
    pub model: String,
    /// AI messages allowed per UTC day.
    pub daily_ai_messages: u64,
    /// AI messages allowed per calendar month.
    pub monthly_ai_messages: u64,
    /// Uploads allowed per UTC day.
    #[serde(default = "default_daily_uploads")]
    pub daily_uploads: u64,
}

fn default_daily_uploads() -> u64 {
    3
}

impl TierPolicyConfig {
    /// Built-in policy for a tier.
    pub fn builtin(tier: Tier) -> Self {
        let (backend, model, daily, monthly) = match tier {
            Tier::Free => (AiBackend::Groq, "llama-3.1-8b-instant", 50, 1_000),
            Tier::Basic => (AiBackend::Groq, "llama-3.3-70b-versatile", 200, 5_000),
            Tier::Pro => (AiBackend::Claude, "claude-3-5-haiku-latest", 500, 12_000),
            Tier::Premium => (AiBackend::Claude, "claude-sonnet-4-20250514", 2_000, 50_000),
        };
        Self {
            backend,
            model: model.to_string(),
            daily_ai_messages: daily,
            monthly_ai_messages: monthly,
            daily_uploads: default_daily_uploads(),
        }
    }
}

/// Quota enforcement configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Bound on each identity, quota-check and increment round trip, in
    /// milliseconds. Checks that exceed it are denied; summaries degrade.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Policy per tier name. Tiers missing here route to `free`, and a missing
    /// `free` entry routes to the most restrictive configured policy.
    #[serde(default = "default_tiers")]
    pub tiers: BTreeMap<String, TierPolicyConfig>,
}

fn default_operation_timeout_ms() -> u64 {
    2000
}

fn default_tiers() -> BTreeMap<String, TierPolicyConfig> {
    Tier::ALL
        .iter()
        .map(|tier| (tier.as_str().to_string(), TierPolicyConfig::builtin(*tier)))
        .collect()
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: default_operation_timeout_ms(),
            tiers: default_tiers(),
        }
    }
}

impl QuotaConfig {
    /// Get the operation timeout as a Duration.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Validate quota configuration.
    /// Returns warnings for configs that work but are probably mistakes.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if self.operation_timeout_ms == 0 {
            return Err("quota.operation_timeout_ms cannot be 0: every check would time out \
                 and be denied"
                .to_string());
        }

        for (name, policy) in &self.tiers {
            if Tier::parse(name).is_err() {
                warnings.push(format!(
                    "quota.tiers.{name} does not name a known tier and will never be routed to"
                ));
            }
            if policy.daily_ai_messages > policy.monthly_ai_messages {
                warnings.push(format!(
                    "quota.tiers.{name}: daily_ai_messages ({}) exceeds monthly_ai_messages ({})",
                    policy.daily_ai_messages, policy.monthly_ai_messages
                ));
            }
            if policy.model.trim().is_empty() {
                return Err(format!("quota.tiers.{name}.model cannot be empty"));
            }
        }

        if !self.tiers.contains_key(Tier::Free.as_str()) {
            warnings.push(
                "quota.tiers has no 'free' entry; unknown tiers will use the most restrictive \
                 configured policy"
                    .to_string(),
            );
        }

        Ok(warnings)
    }
}

/// Upload admission configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Largest accepted file in bytes.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Accepted MIME types (parameters such as `charset` are ignored).
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
    /// Accepted filename extensions, used when the declared content type is
    /// generic (e.g. `application/octet-stream`).
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024 // 10 MiB
}

fn default_allowed_content_types() -> Vec<String> {
    [
        "application/pdf",
        "text/plain",
        "text/csv",
        "application/json",
        "image/png",
        "image/jpeg",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_allowed_extensions() -> Vec<String> {
    ["pdf", "txt", "csv", "json", "png", "jpg", "jpeg", "vcf"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            allowed_content_types: default_allowed_content_types(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl UploadConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_file_bytes == 0 {
            return Err("uploads.max_file_bytes cannot be 0".to_string());
        }
        if self.allowed_content_types.is_empty() && self.allowed_extensions.is_empty() {
            return Err(
                "uploads.allowed_content_types and uploads.allowed_extensions are both empty; \
                 no upload could ever be accepted"
                    .to_string(),
            );
        }
        Ok(())
    }
}

/// Credentials and endpoint for one AI provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API base URL. Defaults to the provider's public endpoint.
    pub base_url: Option<String>,
    /// API key.
    /// WARNING: Prefer HODIE_AI__CLAUDE__API_KEY style env vars over storing in config.
    pub api_key: String,
}

/// AI provider gateway configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AiConfig {
    /// Per-request timeout for provider calls, in seconds.
    #[serde(default = "default_ai_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Default completion budget when the request does not set one.
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    /// Anthropic Messages API.
    pub claude: Option<ProviderConfig>,
    /// Groq chat completions API.
    pub groq: Option<ProviderConfig>,
}

fn default_ai_request_timeout_secs() -> u64 {
    60
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_ai_request_timeout_secs(),
            default_max_tokens: default_max_tokens(),
            claude: None,
            groq: None,
        }
    }
}

impl AiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Provider settings for a backend, if configured.
    pub fn provider(&self, backend: AiBackend) -> Option<&ProviderConfig> {
        match backend {
            AiBackend::Claude => self.claude.as_ref(),
            AiBackend::Groq => self.groq.as_ref(),
        }
    }
}

/// Object storage configuration for uploaded files.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/uploads"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Filesystem { path } if path.as_os_str().is_empty() => {
                Err("storage.path cannot be empty".to_string())
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// PostgreSQL SSL mode.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (single-instance deployments and tests).
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
    /// PostgreSQL database (required when several server instances share
    /// counters).
    Postgres {
        /// Connection URL (optional if using individual fields).
        /// Takes precedence over individual fields if both are provided.
        url: Option<String>,
        /// Database host.
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// WARNING: Prefer HODIE_METADATA__PASSWORD env var over storing in config.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds (prevents hung queries).
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(5000)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) => Ok(()),
                (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => Err(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ),
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields".to_string(),
                ),
            },
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Admin token configuration (required).
    pub admin: AdminConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub uploads: UploadConfig,
    #[serde(default)]
    pub ai: AiConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses filesystem storage, SQLite metadata,
    /// and a dummy admin token.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            metadata: MetadataConfig::default(),
            storage: StorageConfig::default(),
            admin: AdminConfig::for_testing(),
            auth: AuthConfig::default(),
            identity: IdentityConfig::default(),
            quota: QuotaConfig::default(),
            uploads: UploadConfig::default(),
            ai: AiConfig::default(),
        }
    }

    /// Validate every section. Returns warnings to log, or the first error.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        self.admin.validate()?;
        self.auth.validate()?;
        self.identity.validate()?;
        self.metadata.validate()?;
        self.storage.validate()?;
        self.uploads.validate()?;
        let mut warnings = self.quota.validate()?;

        for (name, policy) in &self.quota.tiers {
            if self.ai.provider(policy.backend).is_none() {
                warnings.push(format!(
                    "quota.tiers.{name} routes to {} but ai.{} is not configured; \
                     requests for this tier will fail with 503",
                    policy.backend, policy.backend
                ));
            }
        }

        Ok(warnings)
    }
}
