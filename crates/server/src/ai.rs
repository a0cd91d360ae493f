//! AI provider gateway.
//!
//! Forwards validated chat requests to the backend selected by the tier
//! router. Claude speaks the Anthropic Messages API; Groq speaks the
//! OpenAI-compatible chat completions API.

use async_trait::async_trait;
use hodie_core::AiBackend;
use hodie_core::config::{AiConfig, ProviderConfig};
use hodie_quota::Route;
use serde::{Deserialize, Serialize};

const CLAUDE_DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const GROQ_DEFAULT_BASE_URL: &str = "https://api.groq.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Upper bound accepted for `max_tokens` in a request.
pub const MAX_COMPLETION_TOKENS: u32 = 8192;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// Chat request accepted at the API boundary.
#[derive(Clone, Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// Single-turn request with a system prompt.
    pub fn single(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage {
                role: ChatRole::User,
                content: prompt.into(),
            }],
            system: Some(system.into()),
            max_tokens: None,
        }
    }

    /// Check shape before any quota is consulted.
    pub fn validate(&self) -> Result<(), String> {
        let last = self
            .messages
            .last()
            .ok_or_else(|| "messages cannot be empty".to_string())?;
        if last.role != ChatRole::User {
            return Err("the last message must come from the user".to_string());
        }
        if let Some(i) = self.messages.iter().position(|m| m.content.trim().is_empty()) {
            return Err(format!("messages[{i}].content cannot be empty"));
        }
        if let Some(max) = self.max_tokens
            && (max == 0 || max > MAX_COMPLETION_TOKENS)
        {
            return Err(format!(
                "max_tokens must be between 1 and {MAX_COMPLETION_TOKENS}"
            ));
        }
        Ok(())
    }
}

/// A completed provider call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    pub content: String,
    pub model: String,
    /// Prompt plus completion tokens as reported by the provider.
    pub tokens_used: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("no provider configured for backend {0}")]
    NotConfigured(AiBackend),

    #[error("request to provider failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{backend} returned {status}: {message}")]
    Provider {
        backend: AiBackend,
        status: u16,
        message: String,
    },

    #[error("{0} returned no content")]
    EmptyResponse(AiBackend),
}

/// Sends chat requests to an AI backend.
#[async_trait]
pub trait AiGateway: Send + Sync + 'static {
    async fn complete(&self, route: &Route, request: &ChatRequest) -> Result<ChatReply, AiError>;
}

/// Gateway backed by the providers' HTTP APIs.
pub struct HttpAiGateway {
    http: reqwest::Client,
    config: AiConfig,
}

impl HttpAiGateway {
    pub fn new(config: AiConfig) -> Result<Self, AiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { http, config })
    }

    fn provider(&self, backend: AiBackend) -> Result<&ProviderConfig, AiError> {
        self.config
            .provider(backend)
            .ok_or(AiError::NotConfigured(backend))
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        backend: AiBackend,
        req: reqwest::RequestBuilder,
    ) -> Result<T, AiError> {
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Provider {
                backend,
                status: status.as_u16(),
                message: truncate(&body, 512),
            });
        }
        Ok(response.json().await?)
    }

    async fn claude(&self, route: &Route, request: &ChatRequest) -> Result<ChatReply, AiError> {
        let provider = self.provider(AiBackend::Claude)?;
        let base = provider
            .base_url
            .as_deref()
            .unwrap_or(CLAUDE_DEFAULT_BASE_URL)
            .trim_end_matches('/');
        let body = ClaudeRequest {
            model: &route.model,
            max_tokens: request.max_tokens.unwrap_or(self.config.default_max_tokens),
            system: request.system.as_deref(),
            messages: &request.messages,
        };
        let response: ClaudeResponse = self
            .send(
                AiBackend::Claude,
                self.http
                    .post(format!("{base}/v1/messages"))
                    .header("x-api-key", &provider.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&body),
            )
            .await?;
        response.into_reply(&route.model)
    }

    async fn groq(&self, route: &Route, request: &ChatRequest) -> Result<ChatReply, AiError> {
        let provider = self.provider(AiBackend::Groq)?;
        let base = provider
            .base_url
            .as_deref()
            .unwrap_or(GROQ_DEFAULT_BASE_URL)
            .trim_end_matches('/');
        let body = GroqRequest::new(route, request, self.config.default_max_tokens);
        let response: GroqResponse = self
            .send(
                AiBackend::Groq,
                self.http
                    .post(format!("{base}/openai/v1/chat/completions"))
                    .bearer_auth(&provider.api_key)
                    .json(&body),
            )
            .await?;
        response.into_reply(&route.model)
    }
}

#[async_trait]
impl AiGateway for HttpAiGateway {
    async fn complete(&self, route: &Route, request: &ChatRequest) -> Result<ChatReply, AiError> {
        match route.backend {
            AiBackend::Claude => self.claude(route, request).await,
            AiBackend::Groq => self.groq(route, request).await,
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

// Anthropic Messages API

#[derive(Serialize)]
struct ClaudeRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ClaudeResponse {
    #[serde(default)]
    model: Option<String>,
    content: Vec<ClaudeContent>,
    #[serde(default)]
    usage: ClaudeUsage,
}

#[derive(Deserialize)]
struct ClaudeContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct ClaudeUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl ClaudeResponse {
    fn into_reply(self, requested_model: &str) -> Result<ChatReply, AiError> {
        let content: String = self
            .content
            .into_iter()
            .filter(|c| c.kind == "text")
            .filter_map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");
        if content.is_empty() {
            return Err(AiError::EmptyResponse(AiBackend::Claude));
        }
        Ok(ChatReply {
            content,
            model: self.model.unwrap_or_else(|| requested_model.to_string()),
            tokens_used: self.usage.input_tokens + self.usage.output_tokens,
        })
    }
}

// OpenAI-compatible chat completions (Groq)

#[derive(Serialize)]
struct GroqRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<GroqMessage<'a>>,
}

#[derive(Serialize)]
struct GroqMessage<'a> {
    role: &'a str,
    content: &'a str,
}

impl<'a> GroqRequest<'a> {
    fn new(route: &'a Route, request: &'a ChatRequest, default_max_tokens: u32) -> Self {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system.as_deref() {
            messages.push(GroqMessage {
                role: "system",
                content: system,
            });
        }
        messages.extend(request.messages.iter().map(|m| GroqMessage {
            role: match m.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            },
            content: &m.content,
        }));
        Self {
            model: &route.model,
            max_tokens: request.max_tokens.unwrap_or(default_max_tokens),
            messages,
        }
    }
}

#[derive(Deserialize)]
struct GroqResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<GroqChoice>,
    #[serde(default)]
    usage: GroqUsage,
}

#[derive(Deserialize)]
struct GroqChoice {
    message: GroqReplyMessage,
}

#[derive(Deserialize)]
struct GroqReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Default, Deserialize)]
struct GroqUsage {
    #[serde(default)]
    total_tokens: u64,
}

impl GroqResponse {
    fn into_reply(self, requested_model: &str) -> Result<ChatReply, AiError> {
        let content = self
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or(AiError::EmptyResponse(AiBackend::Groq))?;
        Ok(ChatReply {
            content,
            model: self.model.unwrap_or_else(|| requested_model.to_string()),
            tokens_used: self.usage.total_tokens,
        })
    }
}
