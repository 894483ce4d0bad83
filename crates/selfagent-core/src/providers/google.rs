//! Google Gemini provider

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

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const SCREENSHOT_CAPTION: &str = "Screenshot of the current browser page.";
const PROVIDER: &str = "Google";

/// Google Gemini generateContent adapter
pub struct GoogleAdapter {
    client: Client,
}

impl std::fmt::Debug for GoogleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleAdapter").finish()
    }
}

impl GoogleAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Convert the canonical transcript to Gemini contents.
    ///
    /// Gemini wants every `functionResponse` of one multi-call turn inside a
    /// single `function` block, so consecutive tool messages are merged. Their
    /// attachments follow in one `user` block after the merged block.
    fn to_gemini_contents(messages: &[Message]) -> Vec<GeminiContent> {
        let mut contents: Vec<GeminiContent> = Vec::new();
        let mut pending_images: Vec<GeminiPart> = Vec::new();

        for (i, msg) in messages.iter().enumerate() {
            match msg.role {
                Role::System => {}
                Role::Tool => {
                    let part = GeminiPart::FunctionResponse {
                        function_response: GeminiFunctionResponse {
                            name: msg.tool_name.clone().unwrap_or_else(|| "tool".to_string()),
                            response: serde_json::json!({ "result": msg.content }),
                        },
                    };
                    match contents.last_mut() {
                        Some(last) if last.role == "function" => last.parts.push(part),
                        _ => contents.push(GeminiContent {
                            role: "function".to_string(),
                            parts: vec![part],
                        }),
                    }

                    if let Some(attachment) = &msg.attachment {
                        pending_images.push(GeminiPart::InlineData {
                            inline_data: GeminiInlineData {
                                mime_type: attachment.mime_type.clone(),
                                data: attachment.data.clone(),
                            },
                        });
                    }

                    let next_is_tool = messages.get(i + 1).is_some_and(|m| m.role == Role::Tool);
                    if !next_is_tool && !pending_images.is_empty() {
                        let mut parts = std::mem::take(&mut pending_images);
                        parts.push(GeminiPart::Text {
                            text: SCREENSHOT_CAPTION.to_string(),
                        });
                        contents.push(GeminiContent {
                            role: "user".to_string(),
                            parts,
                        });
                    }
                }
                Role::Assistant => {
                    let mut parts = Vec::with_capacity(msg.tool_calls.len() + 1);
                    if !msg.content.is_empty() {
                        parts.push(GeminiPart::Text {
                            text: msg.content.clone(),
                        });
                    }
                    for tc in &msg.tool_calls {
                        parts.push(GeminiPart::FunctionCall {
                            function_call: GeminiFunctionCall {
                                name: tc.name.clone(),
                                args: Value::Object(tc.arguments.clone()),
                            },
                        });
                    }
                    contents.push(GeminiContent {
                        role: "model".to_string(),
                        parts,
                    });
                }
                Role::User => contents.push(GeminiContent {
                    role: "user".to_string(),
                    parts: vec![GeminiPart::Text {
                        text: msg.content.clone(),
                    }],
                }),
            }
        }

        contents
    }

    /// Convert tool definitions to Gemini function declarations
    fn to_gemini_tools(tools: &[ToolSchema]) -> Vec<GeminiToolDecl> {
        if tools.is_empty() {
            return vec![];
        }
        vec![GeminiToolDecl {
            function_declarations: tools
                .iter()
                .map(|t| GeminiFunctionDeclaration {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: Some(t.parameters.clone()).filter(|p| !p.is_null()),
                })
                .collect(),
        }]
    }

    /// Convert a Gemini body to a canonical response
    fn from_gemini_body(json: Value, requested_model: &str) -> Result<Response, ProviderError> {
        let has_candidates = json
            .get("candidates")
            .and_then(Value::as_array)
            .is_some_and(|c| !c.is_empty());
        if !has_candidates {
            if let Some(reason) = json
                .get("promptFeedback")
                .and_then(|f| f.get("blockReason"))
                .and_then(Value::as_str)
            {
                return Err(ProviderError::Model(format!(
                    "{}: prompt was blocked ({})",
                    PROVIDER, reason
                )));
            }
            return Err(missing_payload(PROVIDER, &json));
        }

        let resp: GeminiApiResponse = serde_json::from_value(json).map_err(|e| {
            ProviderError::Model(format!("Failed to parse {} API response: {}", PROVIDER, e))
        })?;

        let candidate = resp.candidates.into_iter().next().unwrap_or_default();

        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            match part {
                GeminiPart::Text { text } => text_parts.push(text),
                GeminiPart::FunctionCall { function_call } => {
                    let arguments = match function_call.args {
                        Value::Object(map) => map,
                        _ => serde_json::Map::new(),
                    };
                    tool_calls.push(ToolCall::new(None, function_call.name, arguments));
                }
                _ => {}
            }
        }

        debug!(
            "Gemini response: finish_reason={:?}, tool_calls={}",
            candidate.finish_reason,
            tool_calls.len()
        );

        let usage = resp.usage_metadata.unwrap_or_default();
        Ok(Response {
            text: text_parts.join("\n"),
            tool_calls,
            input_tokens: usage.prompt_token_count.unwrap_or(0),
            output_tokens: usage.candidates_token_count.unwrap_or(0),
            model_id: requested_model.to_string(),
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
            "{}/v1beta/models/{}:generateContent",
            config.base_url_override().unwrap_or(GEMINI_BASE_URL),
            config.model
        );

        let contents = Self::to_gemini_contents(messages);

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": config.max_tokens,
                "temperature": config.temperature,
            },
        });
        if !system.is_empty() {
            body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": system }] });
        }

        let gemini_tools = Self::to_gemini_tools(tools);
        if !gemini_tools.is_empty() {
            body["tools"] = serde_json::to_value(&gemini_tools)
                .map_err(|e| ProviderError::Model(format!("Failed to encode tools: {}", e)))?;
        }

        debug!(
            "Gemini request: model={}, contents={}",
            config.model,
            contents.len()
        );

        let request = self
            .client
            .post(&url)
            .header("x-goog-api-key", config.active_key())
            .header("Content-Type", "application/json");

        let reply = send_json(request, &body)
            .await
            .map_err(|e| transport_error(PROVIDER, &e))?;

        if !reply.is_success() {
            return Ok(failure_outcome(PROVIDER, reply));
        }

        let json = parse_body(PROVIDER, &reply.body)?;
        Ok(CallOutcome::Success(Self::from_gemini_body(
            json,
            &config.model,
        )?))
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
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

// ── Gemini wire types ──

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GeminiFunctionResponse,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    Other(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiInlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiToolDecl {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiApiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct GeminiUsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: Option<u32>,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Attachment;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn call(name: &str) -> ToolCall {
        ToolCall::new(None, name, serde_json::Map::new())
    }

    fn three_call_transcript(with_screens: bool) -> Vec<Message> {
        let calls = vec![call("navigate"), call("click"), call("screenshot")];
        let mut msgs = vec![
            Message::user("open the page"),
            Message::assistant_with_tools("", calls.clone()),
        ];
        for tc in &calls {
            let attachment = (with_screens && tc.name != "click").then(|| Attachment::jpeg("QUJD"));
            msgs.push(Message::tool_result(tc, format!("{} done", tc.name), attachment));
        }
        msgs
    }

    fn ok_body(text: &str) -> Value {
        json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 4}
        })
    }

    #[test]
    fn test_to_gemini_contents_text() {
        let msgs = vec![Message::user("hello"), Message::assistant("hi")];
        let result = GoogleAdapter::to_gemini_contents(&msgs);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].role, "user");
        assert_eq!(result[1].role, "model");
    }

    #[test]
    fn test_consecutive_tool_results_share_one_function_block() {
        let result = GoogleAdapter::to_gemini_contents(&three_call_transcript(false));
        assert_eq!(result.len(), 3);
        assert_eq!(result[1].parts.len(), 3);
        assert_eq!(result[2].role, "function");
        assert_eq!(result[2].parts.len(), 3);

        let json = serde_json::to_value(&result[2]).unwrap();
        assert_eq!(json["parts"][0]["functionResponse"]["name"], "navigate");
        assert_eq!(json["parts"][0]["functionResponse"]["response"]["result"], "navigate done");
        assert_eq!(json["parts"][2]["functionResponse"]["name"], "screenshot");
    }

    #[test]
    fn test_attachments_follow_function_block() {
        let result = GoogleAdapter::to_gemini_contents(&three_call_transcript(true));
        assert_eq!(result.len(), 4);
        assert_eq!(result[2].parts.len(), 3);
        assert_eq!(result[3].role, "user");

        let json = serde_json::to_value(&result[3]).unwrap();
        assert_eq!(json["parts"][0]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(json["parts"][1]["inlineData"]["data"], "QUJD");
        assert_eq!(json["parts"][2]["text"], SCREENSHOT_CAPTION);
    }

    #[test]
    fn test_to_gemini_tools_omits_null_parameters() {
        let tools = vec![
            ToolSchema {
                name: "now".to_string(),
                description: "Current time".to_string(),
                parameters: Value::Null,
            },
            ToolSchema {
                name: "search".to_string(),
                description: "Search".to_string(),
                parameters: json!({"type": "object"}),
            },
        ];
        let json = serde_json::to_value(GoogleAdapter::to_gemini_tools(&tools)).unwrap();
        let decls = &json[0]["functionDeclarations"];
        assert!(decls[0].get("parameters").is_none());
        assert_eq!(decls[1]["parameters"]["type"], "object");
        assert!(GoogleAdapter::to_gemini_tools(&[]).is_empty());
    }

    #[test]
    fn test_from_gemini_body_function_calls_get_ids() {
        let body = json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"text": "Let me check"},
                {"functionCall": {"name": "get_weather", "args": {"city": "Paris"}}},
                {"functionCall": {"name": "get_weather", "args": {"city": "Rome"}}}
            ]}}]
        });
        let result = GoogleAdapter::from_gemini_body(body, "gemini-2.0-flash").unwrap();
        assert_eq!(result.text, "Let me check");
        assert_eq!(result.tool_calls.len(), 2);
        assert!(result.tool_calls[0].id.starts_with("call_"));
        assert_ne!(result.tool_calls[0].id, result.tool_calls[1].id);
        assert_eq!(result.tool_calls[1].arguments["city"], "Rome");
        assert_eq!(result.input_tokens, 0);
        assert_eq!(result.model_id, "gemini-2.0-flash");
    }

    #[test]
    fn test_from_gemini_body_usage() {
        let result = GoogleAdapter::from_gemini_body(ok_body("Hi"), "gemini").unwrap();
        assert_eq!(result.text, "Hi");
        assert_eq!(result.input_tokens, 12);
        assert_eq!(result.output_tokens, 4);
    }

    #[test]
    fn test_from_gemini_body_blocked_prompt() {
        let body = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let err = GoogleAdapter::from_gemini_body(body, "gemini").unwrap_err();
        assert!(err.to_string().contains("SAFETY"));

        let body = json!({"candidates": []});
        let err = GoogleAdapter::from_gemini_body(body, "gemini").unwrap_err();
        assert!(err.to_string().contains("unexpected response format"));
    }

    #[tokio::test]
    async fn test_send_sends_one_function_block_for_three_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("done")))
            .expect(1)
            .mount(&server)
            .await;

        let config = ProviderConfig {
            provider: "google".to_string(),
            model: "gemini-2.0-flash".to_string(),
            google_key: "g-key".to_string(),
            base_url: Some(server.uri()),
            ..Default::default()
        };
        let adapter = GoogleAdapter::new(Client::new());
        let response = adapter
            .send(&three_call_transcript(false), &[], "Be brief.", &config)
            .await
            .into_result(PROVIDER)
            .unwrap();
        assert_eq!(response.text, "done");

        let requests = server.received_requests().await.unwrap();
        let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
        let function_blocks: Vec<&Value> = sent["contents"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|c| c["role"] == "function")
            .collect();
        assert_eq!(function_blocks.len(), 1);
        assert_eq!(function_blocks[0]["parts"].as_array().unwrap().len(), 3);
        assert_eq!(sent["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(sent["generationConfig"]["maxOutputTokens"], 4096);
    }

    #[tokio::test]
    async fn test_send_500_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
            .mount(&server)
            .await;

        let config = ProviderConfig {
            provider: "google".to_string(),
            base_url: Some(server.uri()),
            ..Default::default()
        };
        let outcome = GoogleAdapter::new(Client::new())
            .send(&[Message::user("hi")], &[], "", &config)
            .await;
        assert!(matches!(outcome, CallOutcome::Retryable { status: 500, .. }));
    }
}
