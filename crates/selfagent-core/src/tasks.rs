//! Active-task summary contract and a process-local task list

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Source of the task summary injected into the system prompt
#[async_trait]
pub trait TaskManager: Send + Sync {
    /// Human-readable summary of active tasks
    async fn format_active_tasks(&self) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub description: String,
    pub status: TaskStatus,
    /// 2+ is high, negative is low
    pub priority: i32,
}

impl Task {
    fn priority_label(&self) -> &'static str {
        match self.priority {
            p if p >= 2 => "HIGH",
            p if p >= 0 => "NORMAL",
            _ => "LOW",
        }
    }
}

/// In-process task list
#[derive(Debug, Default)]
pub struct TaskList {
    tasks: Mutex<Vec<Task>>,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an active task and return its id
    pub fn add(&self, description: impl Into<String>, priority: i32) -> Result<u64> {
        let mut tasks = self.tasks.lock().map_err(|_| anyhow!("task list lock poisoned"))?;
        let id = tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        tasks.push(Task {
            id,
            description: description.into(),
            status: TaskStatus::Active,
            priority,
        });
        Ok(id)
    }

    pub fn set_status(&self, id: u64, status: TaskStatus) -> Result<()> {
        let mut tasks = self.tasks.lock().map_err(|_| anyhow!("task list lock poisoned"))?;
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| anyhow!("Task {} not found", id))?;
        task.status = status;
        Ok(())
    }

    /// Tasks that are not completed, highest priority first
    pub fn active(&self) -> Result<Vec<Task>> {
        let tasks = self.tasks.lock().map_err(|_| anyhow!("task list lock poisoned"))?;
        let mut active: Vec<Task> = tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Completed)
            .cloned()
            .collect();
        active.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        Ok(active)
    }
}

#[async_trait]
impl TaskManager for TaskList {
    async fn format_active_tasks(&self) -> Result<String> {
        let active = self.active()?;
        if active.is_empty() {
            return Ok("No active tasks.".to_string());
        }
        Ok(active
            .iter()
            .map(|t| {
                format!(
                    "{}. [{}] {} - Status: {}",
                    t.id,
                    t.priority_label(),
                    t.description,
                    t.status
                )
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
