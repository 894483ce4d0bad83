//! Canonical conversation model shared by the agent loop and every provider adapter

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// String-keyed JSON arguments of a tool call
pub type ToolArguments = Map<String, Value>;

/// Who authored a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// Inline binary payload carried next to a tool result (e.g. a screenshot)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub mime_type: String,
    /// Base64-encoded bytes
    pub data: String,
}

impl Attachment {
    /// JPEG image attachment, the format screenshot tools produce
    pub fn jpeg(data: impl Into<String>) -> Self {
        Self {
            mime_type: "image/jpeg".to_string(),
            data: data.into(),
        }
    }
}

/// A model-issued request to run a named tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: ToolArguments,
}

impl ToolCall {
    /// Build a tool call, synthesizing a `call_` id when the vendor omitted one
    pub fn new(id: Option<String>, name: impl Into<String>, arguments: ToolArguments) -> Self {
        let id = id.filter(|s| !s.is_empty()).unwrap_or_else(synthesize_call_id);
        Self {
            id,
            name: name.into(),
            arguments,
        }
    }
}

/// `call_` followed by 12 random hex characters
pub fn synthesize_call_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("call_{}", &hex[..12])
}

/// One entry of the canonical transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            attachment: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant turn that requests tool execution
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    /// Tool-role message answering the call with the given id
    pub fn tool_result(call: &ToolCall, content: impl Into<String>, attachment: Option<Attachment>) -> Self {
        Self {
            tool_call_id: Some(call.id.clone()),
            tool_name: Some(call.name.clone()),
            attachment,
            ..Self::plain(Role::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Declaration of a callable tool, in provider-neutral form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

/// Result of one router call, normalized across vendors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// The model that actually served the request (may be a fallback)
    pub model_id: String,
}

impl Response {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// No text and no tool calls: the model produced nothing usable
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_display() {
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert_eq!(Role::Tool.to_string(), "tool");
        assert_eq!(Role::System.to_string(), "system");
    }

    #[test]
    fn test_tool_call_synthesized_id() {
        let tc = ToolCall::new(None, "search", Map::new());
        assert!(tc.id.starts_with("call_"));
        assert_eq!(tc.id.len(), "call_".len() + 12);

        let empty = ToolCall::new(Some(String::new()), "search", Map::new());
        assert!(empty.id.starts_with("call_"));

        let kept = ToolCall::new(Some("toolu_1".to_string()), "search", Map::new());
        assert_eq!(kept.id, "toolu_1");
    }

    #[test]
    fn test_synthesized_ids_differ() {
        assert_ne!(synthesize_call_id(), synthesize_call_id());
    }

    #[test]
    fn test_response_has_tool_calls() {
        let resp = Response {
            text: "Hello!".to_string(),
            ..Default::default()
        };
        assert!(!resp.has_tool_calls());
        assert!(!resp.is_empty());

        let resp = Response {
            tool_calls: vec![ToolCall::new(None, "search", Map::new())],
            ..Default::default()
        };
        assert!(resp.has_tool_calls());
        assert!(!resp.is_empty());

        assert!(Response::default().is_empty());
    }

    #[test]
    fn test_tool_result_links_call() {
        let call = ToolCall::new(Some("call_abc".to_string()), "read_file", Map::new());
        let msg = Message::tool_result(&call, "contents", None);
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_abc"));
        assert_eq!(msg.tool_name.as_deref(), Some("read_file"));
    }

    #[test]
    fn test_message_serialization_skips_empty_fields() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("attachment").is_none());
    }
}
