//! Provider-agnostic plumbing shared by every adapter

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{ProviderError, classify_status, vendor_message_from_value};
use crate::types::{Message, Response, ToolSchema};

/// Per-request HTTP timeout; model generation can be slow
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Immutable provider settings handed to every adapter call
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub provider: String,
    #[serde(alias = "model_name")]
    pub model: String,
    /// Generic key, used when no provider-specific key is set
    pub api_key: String,
    pub openai_key: String,
    pub anthropic_key: String,
    pub google_key: String,
    pub openrouter_key: String,
    /// Overrides the vendor's default endpoint root
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub ollama_base_url: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key: String::new(),
            openai_key: String::new(),
            anthropic_key: String::new(),
            google_key: String::new(),
            openrouter_key: String::new(),
            base_url: None,
            max_tokens: 4096,
            temperature: 0.7,
            ollama_base_url: "http://localhost:11434".to_string(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &mask_secret(self.active_key()))
            .field("base_url", &self.base_url)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("ollama_base_url", &self.ollama_base_url)
            .finish()
    }
}

impl ProviderConfig {
    /// Key for the configured provider; a provider-specific key wins over `api_key`
    pub fn active_key(&self) -> &str {
        let specific = match self.provider.to_lowercase().as_str() {
            "openai" => &self.openai_key,
            "anthropic" => &self.anthropic_key,
            "google" => &self.google_key,
            "openrouter" => &self.openrouter_key,
            _ => "",
        };
        if specific.is_empty() {
            &self.api_key
        } else {
            specific
        }
    }

    /// Copy of this config targeting another model
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }

    /// Configured base URL without a trailing slash, if any
    pub fn base_url_override(&self) -> Option<&str> {
        self.base_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .filter(|u| !u.is_empty())
    }
}

/// Mask a secret for display, keeping a short prefix and suffix
pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

/// The closed set of supported backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    OpenRouter,
    Anthropic,
    Google,
    Ollama,
}

impl ProviderKind {
    /// Parse a configured provider name; unknown names are a configuration error
    pub fn parse(name: &str) -> Result<Self, ProviderError> {
        match name.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "openrouter" => Ok(Self::OpenRouter),
            "anthropic" => Ok(Self::Anthropic),
            "google" | "gemini" => Ok(Self::Google),
            "ollama" => Ok(Self::Ollama),
            other => Err(ProviderError::Configuration(format!(
                "Unknown provider: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::OpenRouter => "openrouter",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::Ollama => "ollama",
        }
    }

    /// Name used in user-facing error messages
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::OpenAi => "Openai",
            Self::OpenRouter => "Openrouter",
            Self::Anthropic => "Anthropic",
            Self::Google => "Google",
            Self::Ollama => "Ollama",
        }
    }

    /// Whether this provider speaks the OpenAI chat-completions protocol with auth
    pub fn is_openai_family(&self) -> bool {
        matches!(self, Self::OpenAi | Self::OpenRouter)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Free-tier aggregator models are the only ones that fall back
pub fn is_free_tier(kind: ProviderKind, model: &str) -> bool {
    kind == ProviderKind::OpenRouter && model.contains(":free")
}

/// Result of one adapter call, so the router branches on data rather than errors
#[derive(Debug, Clone)]
pub enum CallOutcome {
    Success(Response),
    /// Non-success HTTP status that a fallback model might not hit
    Retryable { status: u16, body: String },
    Fatal(ProviderError),
}

impl CallOutcome {
    pub fn into_result(self, provider: &str) -> Result<Response, ProviderError> {
        match self {
            Self::Success(response) => Ok(response),
            Self::Retryable { status, body } => Err(classify_status(provider, status, &body)),
            Self::Fatal(err) => Err(err),
        }
    }
}

/// One vendor wire protocol
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Human-readable provider name (e.g. "Anthropic")
    fn provider_name(&self) -> &str;

    /// Translate the transcript, send it, and translate the reply
    async fn send(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        system: &str,
        config: &ProviderConfig,
    ) -> CallOutcome;
}

/// The single `chat` contract the agent loop depends on
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Model identifier as configured (for logging)
    fn model(&self) -> &str;

    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        system: &str,
    ) -> Result<Response, ProviderError>;
}

/// Raw status and body of one HTTP exchange
#[derive(Debug, Clone)]
pub(crate) struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Send a prepared JSON request and capture status and body
pub(crate) async fn send_json(
    request: RequestBuilder,
    body: &Value,
) -> Result<HttpReply, reqwest::Error> {
    let response = request.json(body).send().await?;
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Ok(HttpReply { status, body })
}

/// Map a transport-level failure, keeping timeouts distinguishable
pub(crate) fn transport_error(provider: &str, err: &reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Model(format!(
            "{} request timed out after {}s",
            provider,
            HTTP_TIMEOUT.as_secs()
        ))
    } else {
        ProviderError::Model(format!("Failed to send request to {}: {}", provider, err))
    }
}

/// Turn a non-success reply into an outcome; auth and rate limits never fall back
pub(crate) fn failure_outcome(provider: &str, reply: HttpReply) -> CallOutcome {
    match reply.status {
        401 | 429 => CallOutcome::Fatal(classify_status(provider, reply.status, &reply.body)),
        status => CallOutcome::Retryable {
            status,
            body: reply.body,
        },
    }
}

/// Parse a success body as JSON, reporting garbage as a model error
pub(crate) fn parse_body(provider: &str, body: &str) -> Result<Value, ProviderError> {
    serde_json::from_str(body).map_err(|e| {
        ProviderError::Model(format!("Failed to parse {} API response: {}", provider, e))
    })
}

/// Error for a success body that lacks the expected completion payload
pub(crate) fn missing_payload(provider: &str, json: &Value) -> ProviderError {
    match vendor_message_from_value(json) {
        Some(msg) => ProviderError::Model(format!("{}: {}", provider, msg)),
        None => ProviderError::Model(format!(
            "{} returned an unexpected response format.",
            provider
        )),
    }
}
