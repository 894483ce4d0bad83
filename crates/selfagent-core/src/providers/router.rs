//! Model router with free-tier fallback across models

use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::error::ProviderError;
use crate::types::{Message, Response, ToolSchema};

use super::anthropic::AnthropicAdapter;
use super::google::GoogleAdapter;
use super::ollama::OllamaAdapter;
use super::openai::OpenAiAdapter;
use super::types::{
    CallOutcome, ChatModel, HTTP_TIMEOUT, ProviderAdapter, ProviderConfig, ProviderKind,
    is_free_tier,
};

/// Free aggregator models tried, in order, when a free primary fails
pub const DEFAULT_FALLBACK_MODELS: &[&str] = &[
    "google/gemma-3-27b-it:free",
    "meta-llama/llama-3.3-70b-instruct:free",
    "mistralai/mistral-small-3.1-24b-instruct:free",
    "qwen/qwen3-coder:free",
    "nousresearch/hermes-3-llama-3.1-405b:free",
];

/// Routes chat requests to the configured provider's adapter
pub struct ModelRouter {
    config: ProviderConfig,
    kind: ProviderKind,
    adapter: Box<dyn ProviderAdapter>,
    /// Candidates after the primary, only used for free-tier models
    fallback_models: Vec<String>,
    closed: AtomicBool,
}

impl std::fmt::Debug for ModelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRouter")
            .field("config", &self.config)
            .field("fallback_models", &self.fallback_models)
            .finish()
    }
}

impl ModelRouter {
    /// Build a router owning one shared HTTP client and the adapter for `config.provider`
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let kind = ProviderKind::parse(&config.provider)?;
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        let adapter: Box<dyn ProviderAdapter> = match kind {
            ProviderKind::OpenAi | ProviderKind::OpenRouter => {
                Box::new(OpenAiAdapter::new(client, kind))
            }
            ProviderKind::Anthropic => Box::new(AnthropicAdapter::new(client)),
            ProviderKind::Google => Box::new(GoogleAdapter::new(client)),
            ProviderKind::Ollama => Box::new(OllamaAdapter::new(client)),
        };

        Ok(Self::with_adapter(config, kind, adapter))
    }

    /// Build a router around an existing adapter
    pub fn with_adapter(
        config: ProviderConfig,
        kind: ProviderKind,
        adapter: Box<dyn ProviderAdapter>,
    ) -> Self {
        info!(
            "Model router ready: provider={}, model={}",
            kind, config.model
        );
        Self {
            config,
            kind,
            adapter,
            fallback_models: DEFAULT_FALLBACK_MODELS.iter().map(|m| m.to_string()).collect(),
            closed: AtomicBool::new(false),
        }
    }

    /// Replace the fallback candidate list
    pub fn with_fallback_models(mut self, models: Vec<String>) -> Self {
        self.fallback_models = models;
        self
    }

    /// Send one chat request.
    ///
    /// Authentication and rate-limit failures surface immediately. Other
    /// failures of a free-tier model walk the fallback list; the configured
    /// model is never changed by a fallback.
    pub async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        system: &str,
    ) -> Result<Response, ProviderError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProviderError::model("router is closed"));
        }

        let provider = self.kind.display_name();
        debug!(
            "Routing to {} ({}), messages={}, tools={}",
            provider,
            self.config.model,
            messages.len(),
            tools.len()
        );

        let mut last = match self.adapter.send(messages, tools, system, &self.config).await {
            CallOutcome::Success(response) => return Ok(response),
            CallOutcome::Fatal(e) => return Err(e),
            retryable => retryable,
        };

        if !is_free_tier(self.kind, &self.config.model) {
            return last.into_result(provider);
        }

        for model in self.fallback_models.iter().filter(|m| **m != self.config.model) {
            if let CallOutcome::Retryable { status, .. } = &last {
                warn!("{} request failed ({}), trying fallback {}", provider, status, model);
            }

            let attempt = self.config.with_model(model);
            match self.adapter.send(messages, tools, system, &attempt).await {
                CallOutcome::Success(response) => {
                    info!("Request succeeded on fallback model {}", model);
                    return Ok(response);
                }
                CallOutcome::Fatal(e) => return Err(e),
                retryable => last = retryable,
            }
        }

        last.into_result(provider)
    }

    /// Refuse further requests
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// The configured (primary) model
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Display name of the configured provider
    pub fn provider_name(&self) -> &str {
        self.kind.display_name()
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

#[async_trait]
impl ChatModel for ModelRouter {
    fn model(&self) -> &str {
        ModelRouter::model(self)
    }

    async fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        system: &str,
    ) -> Result<Response, ProviderError> {
        ModelRouter::chat(self, messages, tools, system).await
    }
}
