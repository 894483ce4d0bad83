//! Multi-provider LLM abstraction layer
//!
//! Supports OpenAI, OpenRouter, Anthropic, Google Gemini and a local Ollama server.
//! Adapters implement [`ProviderAdapter`] and are selected by [`ModelRouter`],
//! which also owns the free-tier fallback cascade.

pub mod anthropic;
pub mod google;
pub mod ollama;
pub mod openai;
pub mod router;
pub mod types;

pub use router::{DEFAULT_FALLBACK_MODELS, ModelRouter};
pub use types::{
    CallOutcome, ChatModel, HTTP_TIMEOUT, ProviderAdapter, ProviderConfig, ProviderKind,
    is_free_tier, mask_secret,
};
