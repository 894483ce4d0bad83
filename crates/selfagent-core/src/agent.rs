//! Main agent loop - the brain of selfagent

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::{PromptContext, build_system_prompt};
use crate::events::AgentEvent;
use crate::memory::Memory;
use crate::providers::ChatModel;
use crate::tasks::TaskManager;
use crate::tools::{MAX_TOOL_OUTPUT, ToolExecutor, ToolOutput};
use crate::types::{Message, Role, ToolCall, synthesize_call_id};
use crate::usage::SessionUsage;

/// Hard bound on model calls per user turn
pub const MAX_ITERATIONS: usize = 25;

/// Budget for a single tool execution
pub const TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Past messages injected into the system prompt
const RELEVANT_MEMORIES: usize = 5;

/// Assistant reply synthesized when a turn hits [`MAX_ITERATIONS`]
pub const STEP_LIMIT_MESSAGE: &str = "I've reached the maximum number of steps for this request. \
     Here's what I've done so far, let me know if you'd like me to continue.";

/// Agent owning one conversation transcript and driving it with a chat model and tools
pub struct Agent {
    model: Arc<dyn ChatModel>,
    tools: Arc<dyn ToolExecutor>,
    memory: Arc<dyn Memory>,
    tasks: Arc<dyn TaskManager>,
    conversation: Vec<Message>,
    usage: SessionUsage,
    tool_timeout: Duration,
}

impl Agent {
    /// Create a new agent instance
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: Arc<dyn ToolExecutor>,
        memory: Arc<dyn Memory>,
        tasks: Arc<dyn TaskManager>,
    ) -> Self {
        Self {
            model,
            tools,
            memory,
            tasks,
            conversation: Vec::new(),
            usage: SessionUsage::new(),
            tool_timeout: TOOL_TIMEOUT,
        }
    }

    /// Override the per-tool timeout
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Run one user turn to completion, streaming events to `events`.
    ///
    /// Ends with exactly one `Done`, or with one `Error` when the model call
    /// fails or the model returns nothing at all.
    pub async fn process_message(&mut self, text: &str, events: &mpsc::Sender<AgentEvent>) {
        info!(
            "Processing message ({} chars) with model {}",
            text.len(),
            self.model.model()
        );

        self.conversation.push(Message::user(text));
        self.remember(Role::User, text).await;

        let schemas = self.tools.schemas();

        for iteration in 1..=MAX_ITERATIONS {
            let system = self.system_prompt(text).await;

            let response = match self.model.chat(&self.conversation, &schemas, &system).await {
                Ok(response) => response,
                Err(e) => {
                    error!("Model call failed: {}", e);
                    emit(events, AgentEvent::Error { content: e.to_string() }).await;
                    return;
                }
            };

            self.usage
                .add(response.input_tokens, response.output_tokens, &response.model_id);
            emit(
                events,
                AgentEvent::Usage {
                    input_tokens: response.input_tokens,
                    output_tokens: response.output_tokens,
                    total_input_tokens: self.usage.input_tokens,
                    total_output_tokens: self.usage.output_tokens,
                    model: response.model_id.clone(),
                },
            )
            .await;

            info!(
                "Iteration {}: text={} chars, tool_calls={:?}",
                iteration,
                response.text.len(),
                response.tool_calls.iter().map(|tc| tc.name.as_str()).collect::<Vec<_>>()
            );

            if response.is_empty() {
                error!("Model {} returned an empty response", response.model_id);
                emit(
                    events,
                    AgentEvent::Error {
                        content: "The model returned an empty response.".to_string(),
                    },
                )
                .await;
                return;
            }

            if !response.has_tool_calls() {
                self.conversation.push(Message::assistant(response.text.as_str()));
                self.remember(Role::Assistant, &response.text).await;
                emit(events, AgentEvent::Text { content: response.text }).await;
                emit(events, AgentEvent::Done).await;
                return;
            }

            let calls = self.unique_call_ids(response.tool_calls);
            self.conversation.push(Message::assistant_with_tools(
                response.text.as_str(),
                calls.clone(),
            ));
            if !response.text.is_empty() {
                emit(events, AgentEvent::Text { content: response.text }).await;
            }

            for call in &calls {
                emit(
                    events,
                    AgentEvent::ToolStart {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                )
                .await;

                let output = self.run_tool(call).await;
                self.usage.record_tool_call(&call.name);

                emit(
                    events,
                    AgentEvent::ToolResult {
                        name: call.name.clone(),
                        result: output.text.clone(),
                    },
                )
                .await;
                self.conversation
                    .push(Message::tool_result(call, output.text, output.attachment));
            }
        }

        warn!("Turn stopped after {} iterations", MAX_ITERATIONS);
        self.conversation.push(Message::assistant(STEP_LIMIT_MESSAGE));
        self.remember(Role::Assistant, STEP_LIMIT_MESSAGE).await;
        emit(
            events,
            AgentEvent::Text {
                content: STEP_LIMIT_MESSAGE.to_string(),
            },
        )
        .await;
        emit(events, AgentEvent::Done).await;
    }

    /// Replace ids already used in the transcript or earlier in this batch
    fn unique_call_ids(&self, mut calls: Vec<ToolCall>) -> Vec<ToolCall> {
        let mut seen: HashSet<String> = self
            .conversation
            .iter()
            .flat_map(|m| m.tool_calls.iter().map(|tc| tc.id.clone()))
            .collect();
        for call in &mut calls {
            while !seen.insert(call.id.clone()) {
                let fresh = synthesize_call_id();
                debug!("Tool call id {} already used, renamed to {}", call.id, fresh);
                call.id = fresh;
            }
        }
        calls
    }

    /// Execute one call under the tool timeout; failures become error text
    async fn run_tool(&self, call: &ToolCall) -> ToolOutput {
        info!("Executing tool: {}", call.name);
        let cancel = CancellationToken::new();

        let result = tokio::time::timeout(
            self.tool_timeout,
            self.tools
                .execute(&call.name, call.arguments.clone(), cancel.clone()),
        )
        .await;

        let output = match result {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Tool {} failed: {}", call.name, e);
                ToolOutput::text(format!("Error: {}", e))
            }
            Err(_) => {
                cancel.cancel();
                warn!("Tool {} timed out after {:?}", call.name, self.tool_timeout);
                ToolOutput::text(format!(
                    "Error: Tool '{}' timed out after {:?}",
                    call.name, self.tool_timeout
                ))
            }
        };

        debug!(
            "Tool {} result: {}",
            call.name,
            output.text.chars().take(200).collect::<String>()
        );
        output.truncated(MAX_TOOL_OUTPUT)
    }

    /// Assemble the system prompt; a failing collaborator only empties its section
    async fn system_prompt(&self, query: &str) -> String {
        let active_tasks = self.tasks.format_active_tasks().await.unwrap_or_else(|e| {
            warn!("Failed to load active tasks: {:#}", e);
            String::new()
        });
        let message_count = self.memory.message_count().await.unwrap_or_else(|e| {
            warn!("Failed to count messages: {:#}", e);
            0
        });
        let relevant_memories = self
            .memory
            .search_relevant(query, RELEVANT_MEMORIES + 1)
            .await
            .unwrap_or_else(|e| {
                warn!("Memory search failed: {:#}", e);
                Vec::new()
            })
            .into_iter()
            .filter(|hit| hit.content != query)
            .take(RELEVANT_MEMORIES)
            .collect();
        let user_profile = self.memory.user_profile().await.unwrap_or_else(|e| {
            warn!("Failed to load user profile: {:#}", e);
            Default::default()
        });

        build_system_prompt(&PromptContext {
            message_count,
            active_tasks,
            relevant_memories,
            user_profile,
            ..Default::default()
        })
    }

    async fn remember(&self, role: Role, content: &str) {
        self.memory.add_to_buffer(role, content);
        if let Err(e) = self.memory.persist(role, content).await {
            warn!("Failed to persist {} message: {:#}", role, e);
        }
    }

    /// Discard the whole transcript and the memory buffer
    pub fn clear_conversation(&mut self) {
        info!("Clearing conversation ({} messages)", self.conversation.len());
        self.conversation.clear();
        self.memory.clear_buffer();
    }

    pub fn conversation(&self) -> &[Message] {
        &self.conversation
    }

    pub fn usage(&self) -> &SessionUsage {
        &self.usage
    }
}

/// Send an event; a vanished receiver doesn't stop the turn
async fn emit(events: &mpsc::Sender<AgentEvent>, event: AgentEvent) {
    if events.send(event).await.is_err() {
        debug!("Event receiver dropped");
    }
}
