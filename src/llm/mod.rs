//! LLM client module for interacting with language models.
//!
//! This module provides a trait-based abstraction over LLM providers,
//! with OpenRouter as the primary implementation. The client is a thin
//! request/response layer: one prompt in, one completion out, with an
//! explicit per-request timeout. Retry and backoff are handled above the
//! client by [`crate::retry::RetryManager`].

mod error;
mod openrouter;

pub use error::{classify_http_status, LlmError, LlmErrorKind};
pub use openrouter::OpenRouterClient;

use async_trait::async_trait;
use std::time::Duration;

/// Trait for LLM completion backends.
///
/// Implementations perform exactly one network attempt per call and map
/// every failure to an [`LlmError`]; they must not retry internally.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a single-prompt completion request and return the generated text.
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, LlmError>;
}
