//! Local Ollama provider, via its OpenAI-compatible endpoint
//!
//! Reuses the chat-completions translation of [`OpenAiAdapter`]; no auth, no fallback.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ProviderError, clip};
use crate::types::{Message, ToolSchema};

use super::openai::{OpenAiAdapter, SystemPlacement};
use super::types::{
    CallOutcome, HttpReply, ProviderAdapter, ProviderConfig, parse_body, send_json,
    transport_error,
};

const PROVIDER: &str = "Ollama";
const MAX_ERROR_BODY: usize = 300;

/// Ollama chat-completions adapter
pub struct OllamaAdapter {
    client: Client,
}

impl std::fmt::Debug for OllamaAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaAdapter").finish()
    }
}

impl OllamaAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn base_url(config: &ProviderConfig) -> &str {
        let base = config.ollama_base_url.trim_end_matches('/');
        if base.is_empty() {
            "http://localhost:11434"
        } else {
            base
        }
    }

    async fn attempt(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        system: &str,
        config: &ProviderConfig,
    ) -> Result<HttpReply, ProviderError> {
        let base = Self::base_url(config);
        let openai_messages =
            OpenAiAdapter::to_openai_messages(messages, system, SystemPlacement::SystemMessage);

        let mut body = serde_json::json!({
            "model": config.model,
            "messages": openai_messages,
            "temperature": config.temperature,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(OpenAiAdapter::to_openai_tools(tools))
                .map_err(|e| ProviderError::Model(format!("Failed to encode tools: {}", e)))?;
        }

        debug!(
            "Ollama request: model={}, messages={}, tools={}",
            config.model,
            openai_messages.len(),
            tools.len()
        );

        let request = self
            .client
            .post(format!("{}/v1/chat/completions", base))
            .header("Content-Type", "application/json");

        send_json(request, &body).await.map_err(|e| {
            if e.is_connect() {
                ProviderError::Unreachable {
                    provider: PROVIDER.to_string(),
                    url: base.to_string(),
                }
            } else {
                transport_error(PROVIDER, &e)
            }
        })
    }

    async fn send_inner(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        system: &str,
        config: &ProviderConfig,
    ) -> Result<CallOutcome, ProviderError> {
        let mut reply = self.attempt(messages, tools, system, config).await?;

        if reply.status >= 400 && !tools.is_empty() && reply.body.to_lowercase().contains("tool") {
            info!("Ollama model {} doesn't support tools, retrying without", config.model);
            reply = self.attempt(messages, &[], system, config).await?;
        }

        if reply.status == 404 {
            return Err(ProviderError::Model(format!(
                "Ollama model '{}' not found. Pull it with: ollama pull {}",
                config.model, config.model
            )));
        }
        if reply.status >= 400 {
            return Err(ProviderError::Model(format!(
                "Ollama error ({}): {}",
                reply.status,
                clip(&reply.body, MAX_ERROR_BODY)
            )));
        }

        let json: Value = parse_body(PROVIDER, &reply.body)?;
        Ok(CallOutcome::Success(OpenAiAdapter::from_openai_body(
            PROVIDER,
            json,
            &config.model,
        )?))
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    async fn send(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        system: &str,
        config: &ProviderConfig,
    ) -> CallOutcome {
        self.send_inner(messages, tools, system, config)
            .await
            .unwrap_or_else(CallOutcome::Fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(base: String) -> ProviderConfig {
        ProviderConfig {
            provider: "ollama".to_string(),
            model: "llama3.2".to_string(),
            ollama_base_url: base,
            ..Default::default()
        }
    }

    fn search_tool() -> ToolSchema {
        ToolSchema {
            name: "search".to_string(),
            description: "Search".to_string(),
            parameters: json!({"type": "object"}),
        }
    }

    fn ok_body() -> Value {
        json!({
            "model": "llama3.2",
            "choices": [{"message": {"role": "assistant", "content": "Hello from llama"}}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 3}
        })
    }

    #[test]
    fn test_base_url_defaults() {
        assert_eq!(OllamaAdapter::base_url(&config_for(String::new())), "http://localhost:11434");
        assert_eq!(
            OllamaAdapter::base_url(&config_for("http://gpu-box:11434/".to_string())),
            "http://gpu-box:11434"
        );
    }

    #[tokio::test]
    async fn test_send_success_with_system_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_string_contains("\"role\":\"system\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(1)
            .mount(&server)
            .await;

        let response = OllamaAdapter::new(Client::new())
            .send(&[Message::user("hi")], &[], "Be brief.", &config_for(server.uri()))
            .await
            .into_result(PROVIDER)
            .unwrap();
        assert_eq!(response.text, "Hello from llama");
        assert_eq!(response.input_tokens, 5);
    }

    #[tokio::test]
    async fn test_send_retries_without_tools() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("\"tools\""))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(json!({"error": "llama3.2 does not support tools"})),
            )
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(1)
            .mount(&server)
            .await;

        let response = OllamaAdapter::new(Client::new())
            .send(&[Message::user("hi")], &[search_tool()], "", &config_for(server.uri()))
            .await
            .into_result(PROVIDER)
            .unwrap();
        assert_eq!(response.text, "Hello from llama");
    }

    #[tokio::test]
    async fn test_send_404_suggests_pull() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let err = OllamaAdapter::new(Client::new())
            .send(&[Message::user("hi")], &[], "", &config_for(server.uri()))
            .await
            .into_result(PROVIDER)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Ollama model 'llama3.2' not found. Pull it with: ollama pull llama3.2"
        );
    }

    #[tokio::test]
    async fn test_send_error_body_is_clipped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("e".repeat(1000)))
            .mount(&server)
            .await;

        let err = OllamaAdapter::new(Client::new())
            .send(&[Message::user("hi")], &[], "", &config_for(server.uri()))
            .await
            .into_result(PROVIDER)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("Ollama error (500): "));
        assert_eq!(msg.len(), "Ollama error (500): ".len() + 300);
    }

    #[tokio::test]
    async fn test_send_unreachable() {
        // Nothing listens on port 9 locally
        let config = config_for("http://127.0.0.1:9".to_string());
        let err = OllamaAdapter::new(Client::new())
            .send(&[Message::user("hi")], &[], "", &config)
            .await
            .into_result(PROVIDER)
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unreachable { .. }));
        assert!(err.to_string().contains("ollama serve"));
    }
}
