//! Provider error taxonomy

use serde_json::Value;
use thiserror::Error;

/// Longest slice of a raw error body quoted back to the user
const MAX_ERROR_DETAIL: usize = 500;

/// Errors surfaced by provider adapters and the model router
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// HTTP 401, never retried
    #[error("{provider} API key is invalid ({detail}). Check your config.toml.")]
    Authentication { provider: String, detail: String },

    /// HTTP 429, surfaced so the caller can back off
    #[error("{provider} rate limit reached. Please wait and try again.")]
    RateLimit { provider: String },

    /// Any other failed or malformed response
    #[error("{0}")]
    Model(String),

    /// A local model server could not be reached at all
    #[error("Cannot connect to {provider} at {url}. Is it running? Start it with: ollama serve")]
    Unreachable { provider: String, url: String },

    /// Invalid provider configuration (e.g. unknown provider name)
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ProviderError {
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }
}

/// Map a non-success HTTP status and body onto the taxonomy
pub fn classify_status(provider: &str, status: u16, body: &str) -> ProviderError {
    match status {
        401 => ProviderError::Authentication {
            provider: provider.to_string(),
            detail: vendor_message(body).unwrap_or_else(|| "unauthorized".to_string()),
        },
        429 => ProviderError::RateLimit {
            provider: provider.to_string(),
        },
        404 if body.to_lowercase().contains("data policy") => ProviderError::Model(format!(
            "{}: Free model blocked by your data policy settings. Go to \
             https://openrouter.ai/settings/privacy and enable \
             'Allow models that may train on inputs'.",
            provider
        )),
        _ => {
            let detail = vendor_message(body).unwrap_or_else(|| clip(body, MAX_ERROR_DETAIL));
            ProviderError::Model(format!("{} API error ({}): {}", provider, status, detail))
        }
    }
}

/// Pull the vendor's own error message out of a JSON body, if there is one.
///
/// Handles `{"error": {"message": ..}}`, `{"error": ".."}` and `{"message": ..}`.
pub fn vendor_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    vendor_message_from_value(&json)
}

pub(crate) fn vendor_message_from_value(json: &Value) -> Option<String> {
    match json.get("error") {
        Some(Value::Object(err)) => err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(Value::Object(err.clone()).to_string())),
        Some(Value::String(s)) => Some(s.clone()),
        _ => json
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

/// Truncate to at most `max` bytes without splitting a character
pub(crate) fn clip(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
