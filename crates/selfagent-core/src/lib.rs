//! selfagent-core - The brain of the selfagent assistant
//!
//! This crate provides:
//! - A canonical conversation model shared by every LLM backend
//! - Provider adapters for OpenAI/OpenRouter, Anthropic, Google Gemini and Ollama
//! - A model router with free-tier model fallback
//! - The bounded agent loop that drives model calls and tool executions
//! - Collaborator contracts for tools, memory and tasks, with in-process implementations

pub mod agent;
pub mod context;
pub mod error;
pub mod events;
pub mod memory;
pub mod providers;
pub mod session;
pub mod tasks;
pub mod tools;
pub mod types;
pub mod usage;

// Re-export main types for convenience
pub use agent::{Agent, MAX_ITERATIONS, STEP_LIMIT_MESSAGE, TOOL_TIMEOUT};
pub use context::{PromptContext, build_system_prompt};
pub use error::ProviderError;
pub use events::AgentEvent;
pub use memory::{InMemoryMemory, Memory, MemoryHit};
pub use providers::{
    CallOutcome, ChatModel, ModelRouter, ProviderAdapter, ProviderConfig, ProviderKind,
};
pub use session::{AgentSession, SessionError};
pub use tasks::{TaskList, TaskManager};
pub use tools::{ToolExecutor, ToolHandler, ToolOutput, ToolRegistry};
pub use types::{Attachment, Message, Response, Role, ToolCall, ToolSchema};
pub use usage::SessionUsage;
