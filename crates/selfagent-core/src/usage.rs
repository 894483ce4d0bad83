//! Token usage accounting for one agent session

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Running usage totals across every model call of a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub api_calls: u32,
    /// Executions per tool name
    pub tool_calls: BTreeMap<String, u64>,
    /// Model that served the latest call
    pub last_model: Option<String>,
}

impl SessionUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add usage from a single model response
    pub fn add(&mut self, input_tokens: u32, output_tokens: u32, model: &str) {
        self.input_tokens += u64::from(input_tokens);
        self.output_tokens += u64::from(output_tokens);
        self.api_calls += 1;
        if !model.is_empty() {
            self.last_model = Some(model.to_string());
        }
    }

    /// Record a tool call
    pub fn record_tool_call(&mut self, tool_name: &str) {
        *self.tool_calls.entry(tool_name.to_string()).or_default() += 1;
    }

    /// Tool executions across all tools
    pub fn tool_call_count(&self) -> u64 {
        self.tool_calls.values().sum()
    }

    /// Total tokens
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl std::fmt::Display for SessionUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} calls, {} tokens ({} in / {} out), {} tool calls",
            self.api_calls,
            self.total_tokens(),
            self.input_tokens,
            self.output_tokens,
            self.tool_call_count()
        )?;
        if let Some(model) = &self.last_model {
            write!(f, ", last model {}", model)?;
        }
        Ok(())
    }
}
