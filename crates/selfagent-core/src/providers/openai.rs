//! OpenAI-compatible provider (OpenAI, OpenRouter)
//!
//! Also owns the chat-completions wire translation reused by the Ollama adapter.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::ProviderError;
use crate::types::{Message, Response, Role, ToolArguments, ToolCall, ToolSchema};

use super::types::{
    CallOutcome, HttpReply, ProviderAdapter, ProviderConfig, ProviderKind, failure_outcome,
    missing_payload, parse_body, send_json, transport_error,
};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Where the system prompt goes in a chat-completions request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemPlacement {
    /// Leading `system` message
    SystemMessage,
    /// `[Instructions: ..]` prefix on the first user message, for models that reject the system role
    FoldedIntoUser,
}

/// OpenAI chat-completions adapter
pub struct OpenAiAdapter {
    client: Client,
    kind: ProviderKind,
}

impl std::fmt::Debug for OpenAiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAdapter")
            .field("kind", &self.kind)
            .finish()
    }
}

impl OpenAiAdapter {
    pub fn new(client: Client, kind: ProviderKind) -> Self {
        Self { client, kind }
    }

    fn endpoint(&self, config: &ProviderConfig) -> String {
        let base = config.base_url_override().unwrap_or(match self.kind {
            ProviderKind::OpenRouter => OPENROUTER_BASE_URL,
            _ => OPENAI_BASE_URL,
        });
        format!("{}/chat/completions", base)
    }

    /// Convert the canonical transcript to OpenAI wire messages
    pub(crate) fn to_openai_messages(
        messages: &[Message],
        system: &str,
        placement: SystemPlacement,
    ) -> Vec<OpenAiMessage> {
        let mut result = Vec::with_capacity(messages.len() + 1);

        if !system.is_empty() && placement == SystemPlacement::SystemMessage {
            result.push(OpenAiMessage::text("system", system));
        }

        for msg in messages {
            match msg.role {
                // The system prompt is passed separately
                Role::System => {}
                Role::Assistant if msg.has_tool_calls() => {
                    let tool_calls = msg
                        .tool_calls
                        .iter()
                        .map(|tc| OpenAiToolCall {
                            id: tc.id.clone(),
                            r#type: "function".to_string(),
                            function: OpenAiFunction {
                                name: tc.name.clone(),
                                arguments: Value::Object(tc.arguments.clone()).to_string(),
                            },
                        })
                        .collect();
                    result.push(OpenAiMessage {
                        role: "assistant".to_string(),
                        content: if msg.content.is_empty() {
                            None
                        } else {
                            Some(msg.content.clone())
                        },
                        tool_calls: Some(tool_calls),
                        tool_call_id: None,
                    });
                }
                Role::Tool => result.push(OpenAiMessage {
                    role: "tool".to_string(),
                    content: Some(msg.content.clone()),
                    tool_calls: None,
                    tool_call_id: msg.tool_call_id.clone(),
                }),
                role => result.push(OpenAiMessage::text(&role.to_string(), &msg.content)),
            }
        }

        if !system.is_empty() && placement == SystemPlacement::FoldedIntoUser {
            let instructions = format!("[Instructions: {}]", system);
            match result.first_mut() {
                Some(first) if first.role == "user" => {
                    let original = first.content.take().unwrap_or_default();
                    first.content = Some(format!("{}\n\n{}", instructions, original));
                }
                _ => result.insert(0, OpenAiMessage::text("user", &instructions)),
            }
        }

        result
    }

    /// Convert tool schemas to OpenAI function tools
    pub(crate) fn to_openai_tools(tools: &[ToolSchema]) -> Vec<OpenAiToolDef> {
        tools
            .iter()
            .map(|t| OpenAiToolDef {
                r#type: "function".to_string(),
                function: OpenAiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    /// Convert a chat-completions body to a canonical response
    pub(crate) fn from_openai_body(
        provider: &str,
        json: Value,
        requested_model: &str,
    ) -> Result<Response, ProviderError> {
        let has_choices = json
            .get("choices")
            .and_then(Value::as_array)
            .is_some_and(|c| !c.is_empty());
        if !has_choices {
            warn!("{} response had no choices: {}", provider, crate::error::clip(&json.to_string(), 500));
            return Err(missing_payload(provider, &json));
        }

        let resp: OpenAiApiResponse = serde_json::from_value(json).map_err(|e| {
            ProviderError::Model(format!("Failed to parse {} API response: {}", provider, e))
        })?;

        let model_id = resp
            .model
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| requested_model.to_string());

        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| missing_payload(provider, &Value::Null))?;

        let mut tool_calls = Vec::new();
        for tc in choice.message.tool_calls.unwrap_or_default() {
            let Some(function) = tc.function else {
                warn!("Skipping malformed tool call without function");
                continue;
            };
            let Some(name) = function.name.filter(|n| !n.is_empty()) else {
                warn!("Skipping malformed tool call without name");
                continue;
            };
            match parse_arguments(function.arguments) {
                Some(arguments) => tool_calls.push(ToolCall::new(tc.id, name, arguments)),
                None => warn!("Skipping malformed tool call arguments for {}", name),
            }
        }

        let usage = resp.usage.unwrap_or_default();

        debug!(
            "{} response: finish_reason={:?}, tool_calls={}",
            provider,
            choice.finish_reason,
            tool_calls.len()
        );

        Ok(Response {
            text: choice.message.content.unwrap_or_default(),
            tool_calls,
            input_tokens: usage.prompt_tokens.unwrap_or(0),
            output_tokens: usage.completion_tokens.unwrap_or(0),
            model_id,
        })
    }

    async fn attempt(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        system: &str,
        config: &ProviderConfig,
        placement: SystemPlacement,
    ) -> Result<HttpReply, ProviderError> {
        let provider = self.kind.display_name();
        let openai_messages = Self::to_openai_messages(messages, system, placement);

        let mut body = serde_json::json!({
            "model": config.model,
            "messages": openai_messages,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
        });
        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(Self::to_openai_tools(tools))
                .map_err(|e| ProviderError::Model(format!("Failed to encode tools: {}", e)))?;
        }

        debug!(
            "{} request: model={}, messages={}, tools={}, placement={:?}",
            provider,
            config.model,
            openai_messages.len(),
            tools.len(),
            placement
        );

        let mut request = self
            .client
            .post(self.endpoint(config))
            .header("Authorization", format!("Bearer {}", config.active_key()))
            .header("Content-Type", "application/json");

        // OpenRouter requires attribution headers for free models
        if self.kind == ProviderKind::OpenRouter {
            request = request
                .header("HTTP-Referer", "http://localhost:8765")
                .header("X-Title", "SelfAgent");
        }

        send_json(request, &body)
            .await
            .map_err(|e| transport_error(provider, &e))
    }

    async fn send_inner(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        system: &str,
        config: &ProviderConfig,
    ) -> Result<CallOutcome, ProviderError> {
        let provider = self.kind.display_name();
        let mut placement = SystemPlacement::SystemMessage;
        let mut tools = tools;

        let mut reply = self.attempt(messages, tools, system, config, placement).await?;

        if reply.status == 400 && !system.is_empty() {
            info!("Retrying {} without system role", config.model);
            placement = SystemPlacement::FoldedIntoUser;
            reply = self.attempt(messages, tools, system, config, placement).await?;
        }

        if reply.status == 404 && !tools.is_empty() && reply.body.to_lowercase().contains("tool use") {
            info!("Model {} doesn't support tools, retrying without", config.model);
            let no_tools: &[ToolSchema] = &[];
            tools = no_tools;
            reply = self.attempt(messages, tools, system, config, placement).await?;
        }

        if !reply.is_success() {
            return Ok(failure_outcome(provider, reply));
        }

        let json = parse_body(provider, &reply.body)?;
        Ok(CallOutcome::Success(Self::from_openai_body(
            provider,
            json,
            &config.model,
        )?))
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn provider_name(&self) -> &str {
        self.kind.display_name()
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

/// Accept arguments as a JSON-encoded string or as an object
fn parse_arguments(raw: Option<Value>) -> Option<ToolArguments> {
    match raw {
        None | Some(Value::Null) => Some(Map::new()),
        Some(Value::Object(map)) => Some(map),
        Some(Value::String(s)) if s.trim().is_empty() => Some(Map::new()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        Some(_) => None,
    }
}

// ── OpenAI wire types ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct OpenAiMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl OpenAiMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct OpenAiToolCall {
    pub id: String,
    pub r#type: String,
    pub function: OpenAiFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct OpenAiFunction {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct OpenAiToolDef {
    pub r#type: String,
    pub function: OpenAiToolFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct OpenAiToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiApiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoice {
    #[serde(default)]
    message: OpenAiChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiIncomingToolCall>>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiIncomingToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAiIncomingFunction>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiIncomingFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: Option<u32>,
    #[serde(default)]
    completion_tokens: Option<u32>,
}
