//! Tool registry and executor system

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::types::{Attachment, ToolArguments, ToolSchema};

/// Legacy in-band delimiter some tools use to append a base64 screenshot
pub const SCREENSHOT_MARKER: &str = "__SCREENSHOT_BASE64__:";

/// Largest tool output, in bytes, that enters the transcript
pub const MAX_TOOL_OUTPUT: usize = 100_000;

/// Structured result of one tool execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(text: impl Into<String>, attachment: Attachment) -> Self {
        Self {
            text: text.into(),
            attachment: Some(attachment),
        }
    }

    /// Split a [`SCREENSHOT_MARKER`]-delimited image off the end of raw tool text
    pub fn from_marked_text(raw: &str) -> Self {
        match raw.split_once(SCREENSHOT_MARKER) {
            Some((text, data)) => {
                let data = data.trim();
                Self {
                    text: text.trim().to_string(),
                    attachment: (!data.is_empty()).then(|| Attachment::jpeg(data)),
                }
            }
            None => Self::text(raw),
        }
    }

    /// Cap the text at `max` bytes on a char boundary, marking the cut
    pub fn truncated(mut self, max: usize) -> Self {
        if self.text.len() > max {
            let mut end = max;
            while !self.text.is_char_boundary(end) {
                end -= 1;
            }
            self.text.truncate(end);
            self.text.push_str("\n[Output truncated]");
        }
        self
    }
}

/// Trait for executing tools
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run one tool. Implementations should stop work once `cancel` fires.
    async fn execute(
        &self,
        tool_name: &str,
        arguments: ToolArguments,
        cancel: CancellationToken,
    ) -> Result<ToolOutput>;

    fn schemas(&self) -> Vec<ToolSchema>;
}

/// Individual tool handler
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;

    /// Raw text output; a trailing [`SCREENSHOT_MARKER`] payload becomes an attachment
    async fn execute(&self, arguments: ToolArguments, cancel: CancellationToken) -> Result<String>;
}

/// Registry of available tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool handler
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.name().to_string();
        debug!("Registering tool: {}", name);
        self.tools.insert(name, handler);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(
        &self,
        tool_name: &str,
        arguments: ToolArguments,
        cancel: CancellationToken,
    ) -> Result<ToolOutput> {
        debug!("Executing tool: {} with input: {:?}", tool_name, arguments);

        let handler = self
            .get(tool_name)
            .ok_or_else(|| anyhow!("Unknown tool: {}", tool_name))?;

        match handler.execute(arguments, cancel).await {
            Ok(raw) => {
                debug!("Tool {} succeeded", tool_name);
                Ok(ToolOutput::from_marked_text(&raw))
            }
            Err(e) => {
                warn!("Tool {} failed: {}", tool_name, e);
                Err(e)
            }
        }
    }

    /// Schemas sorted by name so requests are stable across runs
    fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|handler| ToolSchema {
                name: handler.name().to_string(),
                description: handler.description().to_string(),
                parameters: handler.input_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }
}
