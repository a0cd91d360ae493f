//! Server test utilities.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use hodie_core::config::{
    AdminConfig, AppConfig, MetadataConfig, StaticTokenConfig, StorageConfig,
};
use crate::common::faults::FaultyMetadata;
use hodie_metadata::{MetadataStore, SqliteStore};
use hodie_quota::{ManualClock, Route};
use hodie_server::ai::{AiError, AiGateway, ChatReply, ChatRequest};
use hodie_server::auth::{StaticTokenVerifier, hash_token};
use hodie_server::{AppState, create_router};
use hodie_storage::{FilesystemBackend, ObjectStore};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;
use time::OffsetDateTime;
use time::macros::datetime;
use tower::ServiceExt;

/// Raw admin token whose hash is in `AdminConfig::for_testing()`.
#[allow(dead_code)]
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Client tokens configured on every test server, as (token, subject, email).
#[allow(dead_code)]
pub const ALICE: (&str, &str, &str) = ("alice-token", "auth0|alice", "alice@example.com");
#[allow(dead_code)]
pub const BOB: (&str, &str, &str) = ("bob-token", "auth0|bob", "bob@example.com");

/// Fixed start time: mid-day, mid-month, so tests can roll days without
/// rolling the month.
#[allow(dead_code)]
pub const START: OffsetDateTime = datetime!(2025-05-14 12:00 UTC);

/// AI gateway that answers locally and can be told to fail.
#[derive(Default)]
pub struct StubAiGateway {
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    pub tokens_per_reply: AtomicU64,
    /// Milliseconds each call waits before answering.
    pub delay_ms: AtomicU64,
    pub last_request: Mutex<Option<ChatRequest>>,
}

#[allow(dead_code)]
impl StubAiGateway {
    pub fn new() -> Self {
        Self {
            tokens_per_reply: AtomicU64::new(42),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: std::time::Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.last_request
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|r| r.messages.last())
            .map(|m| m.content.clone())
    }
}

#[async_trait]
impl AiGateway for StubAiGateway {
    async fn complete(&self, route: &Route, request: &ChatRequest) -> Result<ChatReply, AiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        let delay_ms = self.delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(AiError::Provider {
                backend: route.backend,
                status: 500,
                message: "stub failure".to_string(),
            });
        }
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.chars().take(32).collect::<String>())
            .unwrap_or_default();
        Ok(ChatReply {
            content: format!("stub reply to: {prompt}"),
            model: route.model.clone(),
            tokens_used: self.tokens_per_reply.load(Ordering::SeqCst),
        })
    }
}

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub ai: Arc<StubAiGateway>,
    pub clock: Arc<ManualClock>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        Self::build(modifier, |store| store).await
    }

    /// Create a test server whose metadata store can be told to fail.
    pub async fn with_faults<F>(modifier: F) -> (Self, Arc<FaultyMetadata>)
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut faulty = None;
        let server = Self::build(modifier, |store| {
            let wrapped = Arc::new(FaultyMetadata::new(store));
            faulty = Some(wrapped.clone());
            wrapped as Arc<dyn MetadataStore>
        })
        .await;
        (server, faulty.expect("wrapper was built"))
    }

    async fn build<F, W>(modifier: F, wrap: W) -> Self
    where
        F: FnOnce(&mut AppConfig),
        W: FnOnce(Arc<dyn MetadataStore>) -> Arc<dyn MetadataStore>,
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("storage");
        let storage: Arc<dyn ObjectStore> = Arc::new(
            FilesystemBackend::new(&storage_path)
                .await
                .expect("Failed to create storage backend"),
        );

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig::for_testing();
        config.storage = StorageConfig::Filesystem { path: storage_path };
        config.metadata = MetadataConfig::Sqlite { path: db_path };
        config.admin = AdminConfig::for_testing();
        config.auth.tokens = [ALICE, BOB]
            .into_iter()
            .map(|(token, subject, email)| StaticTokenConfig {
                token_hash: hash_token(token),
                subject: subject.to_string(),
                email: Some(email.to_string()),
            })
            .collect();

        modifier(&mut config);

        let metadata = wrap(metadata);
        let verifier = Arc::new(StaticTokenVerifier::from_config(&config.auth));
        let ai = Arc::new(StubAiGateway::new());
        let clock = Arc::new(ManualClock::new(START));

        let state = AppState::new(
            config,
            storage,
            metadata,
            verifier,
            ai.clone(),
            clock.clone(),
        );
        let router = create_router(state.clone());

        Self {
            router,
            state,
            ai,
            clock,
            _temp_dir: temp_dir,
        }
    }

    /// Get access to the underlying metadata.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Send a JSON (or empty) request and decode the JSON response.
    pub async fn json(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let body = match body {
            Some(v) => {
                builder = builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&v).unwrap())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).unwrap()).await
    }

    /// Upload raw bytes as `filename` with the given content type.
    pub async fn upload(
        &self,
        token: &str,
        filename: &str,
        category: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(format!(
                "/v1/uploads?filename={filename}&category={category}"
            ))
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", content_type)
            .body(Body::from(bytes))
            .unwrap();
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Send one chat message as `token`.
    pub async fn chat(&self, token: &str, text: &str) -> (StatusCode, Value) {
        self.json(
            "POST",
            "/v1/chat",
            Some(serde_json::json!({
                "messages": [{ "role": "user", "content": text }]
            })),
            Some(token),
        )
        .await
    }
}
