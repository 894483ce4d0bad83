//! Conversation memory contract and a process-local implementation

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use tracing::debug;

use crate::types::Role;

/// Short-term buffer capacity of [`InMemoryMemory`]
const MAX_BUFFERED: usize = 50;

/// Searchable messages kept by [`InMemoryMemory`]; older ones are evicted
const MAX_STORED: usize = 1_000;

/// One remembered message returned by a relevance search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryHit {
    pub role: Role,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Store the agent reads context from and writes turns to
#[async_trait]
pub trait Memory: Send + Sync {
    /// Add to the short-term buffer of the current conversation
    fn add_to_buffer(&self, role: Role, content: &str);

    /// Save a message durably
    async fn persist(&self, role: Role, content: &str) -> Result<()>;

    /// Up to `top_k` stored messages relevant to `query`
    async fn search_relevant(&self, query: &str, top_k: usize) -> Result<Vec<MemoryHit>>;

    async fn user_profile(&self) -> Result<BTreeMap<String, String>>;

    /// Total number of persisted messages
    async fn message_count(&self) -> Result<usize>;

    /// Drop the short-term buffer; persisted messages stay
    fn clear_buffer(&self);
}

#[derive(Default)]
struct MemoryState {
    buffer: Vec<MemoryHit>,
    stored: Vec<MemoryHit>,
    /// Every persisted message, including evicted ones
    persisted: usize,
    profile: BTreeMap<String, String>,
}

/// Memory that lives only as long as the process; relevance is keyword overlap
#[derive(Default)]
pub struct InMemoryMemory {
    state: Mutex<MemoryState>,
}

impl InMemoryMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_profile(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.profile.insert(key.into(), value.into());
        }
    }

    /// Messages currently in the short-term buffer
    pub fn buffered(&self) -> Vec<MemoryHit> {
        self.state
            .lock()
            .map(|s| s.buffer.clone())
            .unwrap_or_default()
    }
}

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl Memory for InMemoryMemory {
    fn add_to_buffer(&self, role: Role, content: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.buffer.push(MemoryHit {
                role,
                content: content.to_string(),
                timestamp: Some(Utc::now()),
            });
            let overflow = state.buffer.len().saturating_sub(MAX_BUFFERED);
            state.buffer.drain(..overflow);
        }
    }

    async fn persist(&self, role: Role, content: &str) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("memory lock poisoned"))?;
        state.stored.push(MemoryHit {
            role,
            content: content.to_string(),
            timestamp: Some(Utc::now()),
        });
        state.persisted += 1;
        let overflow = state.stored.len().saturating_sub(MAX_STORED);
        state.stored.drain(..overflow);
        Ok(())
    }

    async fn search_relevant(&self, query: &str, top_k: usize) -> Result<Vec<MemoryHit>> {
        let wanted = keywords(query);
        if wanted.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("memory lock poisoned"))?;

        // Newest first so ties favour recent messages
        let mut scored: Vec<(usize, &MemoryHit)> = state
            .stored
            .iter()
            .rev()
            .filter_map(|hit| {
                let score = keywords(&hit.content).intersection(&wanted).count();
                (score > 0).then_some((score, hit))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        let hits: Vec<MemoryHit> = scored
            .into_iter()
            .take(top_k)
            .map(|(_, hit)| hit.clone())
            .collect();
        debug!("Memory search for {:?}: {} hits", query, hits.len());
        Ok(hits)
    }

    async fn user_profile(&self) -> Result<BTreeMap<String, String>> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("memory lock poisoned"))?;
        Ok(state.profile.clone())
    }

    async fn message_count(&self) -> Result<usize> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("memory lock poisoned"))?;
        Ok(state.persisted)
    }

    fn clear_buffer(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.buffer.clear();
        }
    }
}
