//! Error types for provider operations.

use thiserror::Error;

/// Errors surfaced by LLM providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("API error from {provider} ({status}): {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;
