//! System prompt building

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

use crate::memory::MemoryHit;

/// Longest slice of one remembered message injected into the prompt
const MAX_MEMORY_SNIPPET: usize = 200;

const RULES: &str = "\
1. Complete tasks step by step. Plan multi-step tasks, then execute them one by one.
2. If a tool fails, try an alternative approach before giving up.
3. Ask for confirmation before destructive or irreversible actions (deleting files, sending email, purchases).
4. Extract only the relevant information from tool output; don't dump it verbatim.
5. Keep the user informed of progress on multi-step tasks.
6. When you create or find something, say where it is.
7. Apply the user's stored preferences and answer in their language.
8. If you're unsure about something, ask rather than assume.";

/// Everything the agent knows about its surroundings for one model call
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub now: DateTime<Utc>,
    pub os: String,
    pub home_dir: Option<PathBuf>,
    pub message_count: usize,
    pub active_tasks: String,
    pub relevant_memories: Vec<MemoryHit>,
    pub user_profile: BTreeMap<String, String>,
}

impl Default for PromptContext {
    fn default() -> Self {
        Self {
            now: Utc::now(),
            os: std::env::consts::OS.to_string(),
            home_dir: dirs::home_dir(),
            message_count: 0,
            active_tasks: String::new(),
            relevant_memories: Vec::new(),
            user_profile: BTreeMap::new(),
        }
    }
}

/// Build the complete system prompt; sections with nothing to say are left out
pub fn build_system_prompt(ctx: &PromptContext) -> String {
    let mut prompt = String::new();

    prompt.push_str(
        "You are SelfAgent, a personal AI assistant running on the user's computer. \
         Use your tools proactively to get things done.\n\n",
    );

    prompt.push_str("# ENVIRONMENT\n\n");
    prompt.push_str(&format!(
        "CURRENT DATE: {}\n",
        ctx.now.format("%Y-%m-%d %H:%M UTC")
    ));
    prompt.push_str(&format!("OPERATING SYSTEM: {}\n", ctx.os));
    if let Some(home) = &ctx.home_dir {
        prompt.push_str(&format!("HOME DIRECTORY: {}\n", home.display()));
    }
    prompt.push_str(&format!(
        "TOTAL MESSAGES IN MEMORY: {}\n\n",
        ctx.message_count
    ));

    if !ctx.active_tasks.trim().is_empty() {
        prompt.push_str("# ACTIVE TASKS\n\n");
        prompt.push_str(ctx.active_tasks.trim());
        prompt.push_str("\n\n");
    }

    if !ctx.relevant_memories.is_empty() {
        prompt.push_str("# RELEVANT CONTEXT FROM PAST CONVERSATIONS\n\n");
        for hit in &ctx.relevant_memories {
            let when = hit
                .timestamp
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "?".to_string());
            let snippet: String = hit.content.chars().take(MAX_MEMORY_SNIPPET).collect();
            prompt.push_str(&format!("- [{}] {}: {}\n", when, hit.role, snippet));
        }
        prompt.push('\n');
    }

    if !ctx.user_profile.is_empty() {
        prompt.push_str("# USER PROFILE\n\n");
        for (key, value) in &ctx.user_profile {
            prompt.push_str(&format!("- {}: {}\n", key, value));
        }
        prompt.push('\n');
    }

    prompt.push_str("# RULES\n\n");
    prompt.push_str(RULES);
    prompt.push('\n');

    debug!("Built system prompt ({} chars)", prompt.len());

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn full_context() -> PromptContext {
        let mut profile = BTreeMap::new();
        profile.insert("name".to_string(), "Sam".to_string());
        PromptContext {
            message_count: 42,
            active_tasks: "1. [HIGH] Book flights - Status: active".to_string(),
            relevant_memories: vec![MemoryHit {
                role: Role::User,
                content: "I prefer window seats".to_string(),
                timestamp: None,
            }],
            user_profile: profile,
            ..Default::default()
        }
    }

    #[test]
    fn test_build_system_prompt() {
        let prompt = build_system_prompt(&full_context());

        assert!(prompt.contains("# ENVIRONMENT"));
        assert!(prompt.contains("TOTAL MESSAGES IN MEMORY: 42"));
        assert!(prompt.contains("Book flights"));
        assert!(prompt.contains("- [?] user: I prefer window seats"));
        assert!(prompt.contains("- name: Sam"));
        assert!(prompt.contains("# RULES"));
    }

    #[test]
    fn test_build_system_prompt_empty_sections_omitted() {
        let prompt = build_system_prompt(&PromptContext::default());
        assert!(prompt.contains("# ENVIRONMENT"));
        assert!(prompt.contains("# RULES"));
        assert!(!prompt.contains("ACTIVE TASKS"));
        assert!(!prompt.contains("RELEVANT CONTEXT"));
        assert!(!prompt.contains("USER PROFILE"));
    }

    #[test]
    fn test_build_system_prompt_section_order() {
        let prompt = build_system_prompt(&full_context());
        let env_pos = prompt.find("# ENVIRONMENT").unwrap();
        let tasks_pos = prompt.find("# ACTIVE TASKS").unwrap();
        let memory_pos = prompt.find("# RELEVANT CONTEXT").unwrap();
        let profile_pos = prompt.find("# USER PROFILE").unwrap();
        let rules_pos = prompt.find("# RULES").unwrap();

        assert!(env_pos < tasks_pos);
        assert!(tasks_pos < memory_pos);
        assert!(memory_pos < profile_pos);
        assert!(profile_pos < rules_pos);
    }

    #[test]
    fn test_memories_are_clipped() {
        let ctx = PromptContext {
            relevant_memories: vec![MemoryHit {
                role: Role::Assistant,
                content: "x".repeat(500),
                timestamp: Some(Utc::now()),
            }],
            ..Default::default()
        };
        let prompt = build_system_prompt(&ctx);
        assert!(prompt.contains(&"x".repeat(200)));
        assert!(!prompt.contains(&"x".repeat(201)));
    }
}
