//! One agent per conversation, one turn at a time

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

use crate::agent::Agent;
use crate::events::AgentEvent;
use crate::usage::SessionUsage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A turn is already in flight for this session
    #[error("Already processing a message. Please wait.")]
    Busy,
}

/// Guard that rejects, rather than queues, a second concurrent request
#[derive(Clone)]
pub struct AgentSession {
    agent: Arc<Mutex<Agent>>,
}

impl AgentSession {
    pub fn new(agent: Agent) -> Self {
        Self {
            agent: Arc::new(Mutex::new(agent)),
        }
    }

    /// Run one turn, or fail with [`SessionError::Busy`] if one is running
    pub async fn process(
        &self,
        text: &str,
        events: mpsc::Sender<AgentEvent>,
    ) -> Result<(), SessionError> {
        let mut agent = self.agent.try_lock().map_err(|_| {
            warn!("Rejected message: session busy");
            SessionError::Busy
        })?;
        agent.process_message(text, &events).await;
        Ok(())
    }

    /// Clear the transcript, unless a turn is running
    pub fn reset(&self) -> Result<(), SessionError> {
        let mut agent = self.agent.try_lock().map_err(|_| SessionError::Busy)?;
        agent.clear_conversation();
        info!("Session reset");
        Ok(())
    }

    /// Usage so far; waits for a running turn to finish
    pub async fn usage(&self) -> SessionUsage {
        self.agent.lock().await.usage().clone()
    }
}
