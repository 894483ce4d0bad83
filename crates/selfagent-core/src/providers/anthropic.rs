//! Anthropic Claude provider

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ProviderError;
use crate::types::{Message, Response, Role, ToolCall, ToolSchema};

use super::types::{
    CallOutcome, ProviderAdapter, ProviderConfig, failure_outcome, missing_payload, parse_body,
    send_json, transport_error,
};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "Anthropic";

/// Anthropic Messages API adapter
pub struct AnthropicAdapter {
    client: Client,
}

impl std::fmt::Debug for AnthropicAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicAdapter").finish()
    }
}

impl AnthropicAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Convert the canonical transcript to Anthropic wire format.
    ///
    /// Tool results become `user` turns carrying `tool_result` blocks; results
    /// answering the same assistant turn share one `user` turn.
    fn to_anthropic_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
        let mut result: Vec<AnthropicMessage> = Vec::with_capacity(messages.len());

        for msg in messages {
            match msg.role {
                Role::System => {}
                Role::Tool => {
                    let block = AnthropicBlock::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: match &msg.attachment {
                            Some(attachment) => {
                                // Empty text blocks are rejected by the API
                                let mut blocks = Vec::with_capacity(2);
                                if !msg.content.is_empty() {
                                    blocks.push(AnthropicBlock::Text {
                                        text: msg.content.clone(),
                                    });
                                }
                                blocks.push(AnthropicBlock::Image {
                                    source: ImageSource {
                                        r#type: "base64".to_string(),
                                        media_type: attachment.mime_type.clone(),
                                        data: attachment.data.clone(),
                                    },
                                });
                                ToolResultContent::Blocks(blocks)
                            }
                            None => ToolResultContent::Text(msg.content.clone()),
                        },
                    };

                    match result.last_mut() {
                        Some(AnthropicMessage {
                            role,
                            content: AnthropicContent::Blocks(blocks),
                        }) if role.as_str() == "user"
                            && blocks
                                .iter()
                                .all(|b| matches!(b, AnthropicBlock::ToolResult { .. })) =>
                        {
                            blocks.push(block);
                        }
                        _ => result.push(AnthropicMessage {
                            role: "user".to_string(),
                            content: AnthropicContent::Blocks(vec![block]),
                        }),
                    }
                }
                Role::Assistant if msg.has_tool_calls() => {
                    let mut blocks = Vec::with_capacity(msg.tool_calls.len() + 1);
                    if !msg.content.is_empty() {
                        blocks.push(AnthropicBlock::Text {
                            text: msg.content.clone(),
                        });
                    }
                    for tc in &msg.tool_calls {
                        blocks.push(AnthropicBlock::ToolUse {
                            id: tc.id.clone(),
                            name: tc.name.clone(),
                            input: Value::Object(tc.arguments.clone()),
                        });
                    }
                    result.push(AnthropicMessage {
                        role: "assistant".to_string(),
                        content: AnthropicContent::Blocks(blocks),
                    });
                }
                Role::User | Role::Assistant => result.push(AnthropicMessage {
                    role: msg.role.to_string(),
                    content: AnthropicContent::Text(msg.content.clone()),
                }),
            }
        }

        result
    }

    fn to_anthropic_tools(tools: &[ToolSchema]) -> Vec<AnthropicToolDef> {
        tools
            .iter()
            .map(|t| AnthropicToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: if t.parameters.is_null() {
                    serde_json::json!({"type": "object", "properties": {}})
                } else {
                    t.parameters.clone()
                },
            })
            .collect()
    }

    /// Convert an Anthropic body to a canonical response
    fn from_anthropic_body(json: Value, requested_model: &str) -> Result<Response, ProviderError> {
        if !json.get("content").is_some_and(Value::is_array) {
            return Err(missing_payload(PROVIDER, &json));
        }

        let resp: AnthropicApiResponse = serde_json::from_value(json).map_err(|e| {
            ProviderError::Model(format!("Failed to parse {} API response: {}", PROVIDER, e))
        })?;

        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in resp.content {
            match block {
                AnthropicResponseBlock::Text { text } => text_parts.push(text),
                AnthropicResponseBlock::ToolUse { id, name, input } => {
                    let arguments = match input {
                        Value::Object(map) => map,
                        _ => serde_json::Map::new(),
                    };
                    tool_calls.push(ToolCall::new(Some(id), name, arguments));
                }
                AnthropicResponseBlock::Other => {}
            }
        }

        debug!(
            "Anthropic response: stop_reason={:?}, tool_calls={}",
            resp.stop_reason,
            tool_calls.len()
        );

        let usage = resp.usage.unwrap_or_default();
        Ok(Response {
            text: text_parts.join("\n"),
            tool_calls,
            input_tokens: usage.input_tokens.unwrap_or(0),
            output_tokens: usage.output_tokens.unwrap_or(0),
            model_id: resp
                .model
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| requested_model.to_string()),
        })
    }

    async fn send_inner(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        system: &str,
        config: &ProviderConfig,
    ) -> Result<CallOutcome, ProviderError> {
        let url = format!(
            "{}/v1/messages",
            config.base_url_override().unwrap_or(ANTHROPIC_BASE_URL)
        );
        let anthropic_messages = Self::to_anthropic_messages(messages);

        let mut body = serde_json::json!({
            "model": config.model,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "messages": anthropic_messages,
        });
        if !system.is_empty() {
            body["system"] = Value::String(system.to_string());
        }
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(Self::to_anthropic_tools(tools))
                .map_err(|e| ProviderError::Model(format!("Failed to encode tools: {}", e)))?;
        }

        debug!(
            "Anthropic request: model={}, messages={}",
            config.model,
            anthropic_messages.len()
        );

        let request = self
            .client
            .post(&url)
            .header("x-api-key", config.active_key())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json");

        let reply = send_json(request, &body)
            .await
            .map_err(|e| transport_error(PROVIDER, &e))?;

        if !reply.is_success() {
            return Ok(failure_outcome(PROVIDER, reply));
        }

        let json = parse_body(PROVIDER, &reply.body)?;
        Ok(CallOutcome::Success(Self::from_anthropic_body(
            json,
            &config.model,
        )?))
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
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

// ── Anthropic wire types ──

#[derive(Debug, Clone, Serialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicBlock>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: ToolResultContent,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum ToolResultContent {
    Text(String),
    Blocks(Vec<AnthropicBlock>),
}

#[derive(Debug, Clone, Serialize)]
struct ImageSource {
    r#type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicToolDef {
    name: String,
    description: String,
    input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicApiResponse {
    content: Vec<AnthropicResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{SCREENSHOT_MARKER, ToolOutput};
    use crate::types::Attachment;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall::new(Some(id.to_string()), name, json!({"q": "x"}).as_object().unwrap().clone())
    }

    #[test]
    fn test_to_anthropic_messages_filters_system() {
        let msgs = vec![
            Message {
                role: Role::System,
                ..Message::user("system prompt")
            },
            Message::user("hello"),
        ];
        let result = AnthropicAdapter::to_anthropic_messages(&msgs);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].role, "user");
    }

    #[test]
    fn test_assistant_tool_calls_become_blocks() {
        let msgs = vec![Message::assistant_with_tools(
            "Let me look.",
            vec![call("tu_1", "search"), call("tu_2", "fetch")],
        )];
        let result = AnthropicAdapter::to_anthropic_messages(&msgs);
        let json = serde_json::to_value(&result[0]).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "tool_use");
        assert_eq!(json["content"][1]["id"], "tu_1");
        assert_eq!(json["content"][1]["input"]["q"], "x");
        assert_eq!(json["content"][2]["name"], "fetch");
    }

    #[test]
    fn test_tool_results_become_user_tool_result_blocks() {
        let first = call("tu_1", "search");
        let second = call("tu_2", "fetch");
        let msgs = vec![
            Message::assistant_with_tools("", vec![first.clone(), second.clone()]),
            Message::tool_result(&first, "result one", None),
            Message::tool_result(&second, "result two", None),
        ];
        let result = AnthropicAdapter::to_anthropic_messages(&msgs);
        assert_eq!(result.len(), 2);
        let json = serde_json::to_value(&result[1]).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"][0]["type"], "tool_result");
        assert_eq!(json["content"][0]["tool_use_id"], "tu_1");
        assert_eq!(json["content"][0]["content"], "result one");
        assert_eq!(json["content"][1]["tool_use_id"], "tu_2");
    }

    #[test]
    fn test_tool_result_with_attachment_carries_image() {
        let tc = call("tu_1", "screenshot");
        let msgs = vec![
            Message::assistant_with_tools("", vec![tc.clone()]),
            Message::tool_result(&tc, "Took a screenshot", Some(Attachment::jpeg("QUJD"))),
        ];
        let result = AnthropicAdapter::to_anthropic_messages(&msgs);
        let json = serde_json::to_value(&result[1]).unwrap();
        let content = &json["content"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "image");
        assert_eq!(content[1]["source"]["type"], "base64");
        assert_eq!(content[1]["source"]["media_type"], "image/jpeg");
        assert_eq!(content[1]["source"]["data"], "QUJD");
    }

    #[test]
    fn test_image_only_tool_result_has_no_empty_text_block() {
        let tc = call("tu_1", "screenshot");
        let output = ToolOutput::from_marked_text(&format!("{}QUJD", SCREENSHOT_MARKER));
        assert!(output.text.is_empty());
        let msgs = vec![
            Message::assistant_with_tools("", vec![tc.clone()]),
            Message::tool_result(&tc, output.text, output.attachment),
        ];
        let result = AnthropicAdapter::to_anthropic_messages(&msgs);
        let json = serde_json::to_value(&result[1]).unwrap();
        let content = json["content"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["type"], "image");
        assert_eq!(content[0]["source"]["data"], "QUJD");
    }

    #[test]
    fn test_to_anthropic_tools_renames_parameters() {
        let tools = vec![ToolSchema {
            name: "search".to_string(),
            description: "Search".to_string(),
            parameters: json!({"type": "object", "properties": {"q": {"type": "string"}}}),
        }];
        let json = serde_json::to_value(AnthropicAdapter::to_anthropic_tools(&tools)).unwrap();
        assert_eq!(json[0]["input_schema"]["properties"]["q"]["type"], "string");
        assert!(json[0].get("parameters").is_none());
    }

    #[test]
    fn test_from_anthropic_body_text_and_tools() {
        let body = json!({
            "id": "msg_1",
            "model": "claude-sonnet-4-5",
            "content": [
                {"type": "thinking", "thinking": "hmm"},
                {"type": "text", "text": "Checking."},
                {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {"q": "rust"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 20, "output_tokens": 15}
        });
        let result = AnthropicAdapter::from_anthropic_body(body, "claude").unwrap();
        assert_eq!(result.text, "Checking.");
        assert_eq!(result.tool_calls.len(), 1);
        assert_eq!(result.tool_calls[0].id, "toolu_1");
        assert_eq!(result.tool_calls[0].arguments["q"], "rust");
        assert_eq!(result.input_tokens, 20);
        assert_eq!(result.model_id, "claude-sonnet-4-5");
    }

    #[test]
    fn test_from_anthropic_body_missing_usage() {
        let body = json!({"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]});
        let result = AnthropicAdapter::from_anthropic_body(body, "claude").unwrap();
        assert_eq!(result.text, "a\nb");
        assert_eq!(result.input_tokens, 0);
        assert_eq!(result.output_tokens, 0);
        assert_eq!(result.model_id, "claude");
    }

    #[test]
    fn test_from_anthropic_body_error_payload() {
        let body = json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}});
        let err = AnthropicAdapter::from_anthropic_body(body, "claude").unwrap_err();
        assert_eq!(err.to_string(), "Anthropic: Overloaded");
    }

    #[tokio::test]
    async fn test_send_uses_vendor_headers_and_top_level_system() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "sk-ant-test"))
            .and(header("anthropic-version", "2023-06-01"))
            .and(body_partial_json(json!({"system": "Be kind."})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "Hi!"}],
                "usage": {"input_tokens": 3, "output_tokens": 2}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = ProviderConfig {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            anthropic_key: "sk-ant-test".to_string(),
            base_url: Some(server.uri()),
            ..Default::default()
        };
        let adapter = AnthropicAdapter::new(Client::new());
        let response = adapter
            .send(&[Message::user("hello")], &[], "Be kind.", &config)
            .await
            .into_result(PROVIDER)
            .unwrap();
        assert_eq!(response.text, "Hi!");
        assert_eq!(response.output_tokens, 2);
    }

    #[tokio::test]
    async fn test_send_429_is_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let config = ProviderConfig {
            provider: "anthropic".to_string(),
            base_url: Some(server.uri()),
            ..Default::default()
        };
        let adapter = AnthropicAdapter::new(Client::new());
        let err = adapter
            .send(&[Message::user("hello")], &[], "", &config)
            .await
            .into_result(PROVIDER)
            .unwrap_err();
        assert!(matches!(err, ProviderError::RateLimit { .. }));
    }
}
