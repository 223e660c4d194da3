//! # Storyloom
//!
//! The generation core of an AI-assisted novel writing tool.
//!
//! This library provides:
//! - An LLM-backed generation service covering every stage from theme
//!   expansion to refined chapter prose
//! - Classification-based retries with exponential backoff around every
//!   model call
//! - Robust JSON recovery from free-form model output
//! - Concurrent batch generation with partial-failure aggregation
//!
//! ## Generation Flow
//! 1. Expand a one-line theme into a premise (or three variants)
//! 2. Break the story into a chapter outline
//! 3. Generate chapter summaries, concurrently per chapter
//! 4. Generate chapter prose through the draft-critique-refine pipeline
//! 5. Aggregate results; failed chapters can be re-run alone
//!
//! ## Modules
//! - `generate`: the service, the critique-refine pipeline, and batching
//! - `retry`: retry policy and backoff
//! - `extract`: JSON recovery from model responses
//! - `store`: per-project JSON document persistence

pub mod config;
pub mod extract;
pub mod generate;
pub mod llm;
pub mod progress;
pub mod prompts;
pub mod retry;
pub mod store;

pub use config::{GenerationConfig, RefinementMode};
pub use generate::{
    BatchResult, BlockingSession, ChapterEntry, ChapterUnit, CritiqueIssue, CritiqueReport,
    GenerationService, StageContext, SummaryEntry,
};
pub use llm::{LlmClient, LlmError, OpenRouterClient};
pub use retry::{RetryConfig, RetryManager};

/// Install a global tracing subscriber driven by `RUST_LOG`.
///
/// Convenience for binaries embedding the library; calling it more than
/// once is a no-op.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
