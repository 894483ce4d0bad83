//! Lifecycle events streamed out of an agent turn

use serde::{Deserialize, Serialize};

use crate::types::ToolArguments;

/// One observable step of a turn, serialized as `{"type": "...", ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Text {
        content: String,
    },
    ToolStart {
        name: String,
        arguments: ToolArguments,
    },
    ToolResult {
        name: String,
        result: String,
    },
    /// Emitted after every model call, with this call's and the session's tokens
    Usage {
        input_tokens: u32,
        output_tokens: u32,
        total_input_tokens: u64,
        total_output_tokens: u64,
        model: String,
    },
    Done,
    Error {
        content: String,
    },
}

impl AgentEvent {
    /// Whether no further events follow in this turn
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. })
    }
}
