//! Generation settings.
//!
//! Environment variables are used as initial defaults; interactive callers
//! may mutate the config between batches through the service accessors.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the critique-refine pipeline decides whether to run the
/// refinement pass after a successful critique.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefinementMode {
    /// Always refine.
    #[default]
    Auto,
    /// Ask the operator per chapter.
    Manual,
    /// Never refine; the draft is final.
    Disabled,
}

impl RefinementMode {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "manual" => RefinementMode::Manual,
            "disabled" => RefinementMode::Disabled,
            _ => RefinementMode::Auto,
        }
    }
}

/// Settings for the generation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Model identifier passed to the LLM backend.
    pub model: String,
    /// Default per-request timeout.
    pub request_timeout: Duration,
    /// Timeout for chapter prose generation and refinement; prose is slow.
    pub chapter_timeout: Duration,
    /// Timeout for critique generation.
    pub critique_timeout: Duration,
    /// Whether the critique-refine loop runs at all.
    pub enable_refinement: bool,
    /// Decision mode for the refinement pass.
    pub refinement_mode: RefinementMode,
    /// Whether to surface critique summaries through the progress sink.
    pub show_critique: bool,
    /// Whether drafts, critiques, and refinement history are persisted.
    pub save_intermediate_data: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "google/gemini-2.5-pro".to_string(),
            request_timeout: Duration::from_secs(60),
            chapter_timeout: Duration::from_secs(120),
            critique_timeout: Duration::from_secs(90),
            enable_refinement: true,
            refinement_mode: RefinementMode::Auto,
            show_critique: true,
            save_intermediate_data: true,
        }
    }
}

impl GenerationConfig {
    /// Build a config from environment variables, falling back to the
    /// defaults for anything unset or unparsable:
    /// - `STORYLOOM_MODEL` - model identifier
    /// - `REQUEST_TIMEOUT` - default request timeout in seconds
    /// - `ENABLE_REFINEMENT` - "true"/"false"
    /// - `REFINEMENT_MODE` - "auto", "manual", or "disabled"
    /// - `SHOW_CRITIQUE` - "true"/"false"
    /// - `SAVE_INTERMEDIATE_DATA` - "true"/"false"
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            model: std::env::var("STORYLOOM_MODEL").unwrap_or(defaults.model),
            request_timeout: env_secs("REQUEST_TIMEOUT").unwrap_or(defaults.request_timeout),
            chapter_timeout: defaults.chapter_timeout,
            critique_timeout: defaults.critique_timeout,
            enable_refinement: env_bool("ENABLE_REFINEMENT").unwrap_or(defaults.enable_refinement),
            refinement_mode: std::env::var("REFINEMENT_MODE")
                .map(|v| RefinementMode::parse(&v))
                .unwrap_or(defaults.refinement_mode),
            show_critique: env_bool("SHOW_CRITIQUE").unwrap_or(defaults.show_critique),
            save_intermediate_data: env_bool("SAVE_INTERMEDIATE_DATA")
                .unwrap_or(defaults.save_intermediate_data),
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| v.to_lowercase() == "true")
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = GenerationConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.chapter_timeout, Duration::from_secs(120));
        assert!(config.enable_refinement);
        assert_eq!(config.refinement_mode, RefinementMode::Auto);
    }

    #[test]
    fn refinement_mode_parsing() {
        assert_eq!(RefinementMode::parse("auto"), RefinementMode::Auto);
        assert_eq!(RefinementMode::parse("MANUAL"), RefinementMode::Manual);
        assert_eq!(RefinementMode::parse("disabled"), RefinementMode::Disabled);
        // Unknown values fall back to auto.
        assert_eq!(RefinementMode::parse("aggressive"), RefinementMode::Auto);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = GenerationConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: GenerationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.refinement_mode, config.refinement_mode);
        assert_eq!(back.model, config.model);
    }
}
