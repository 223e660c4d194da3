//! The content request layer.
//!
//! One network completion per call, wrapped in the retry manager. The
//! contract up the stack is soft failure: exhausted retries and
//! non-retryable errors are logged and come back as `None`, and every
//! caller treats `None` as "mark this unit failed and move on".

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;

use super::GenerationService;
use crate::extract::extract_json;
use crate::prompts::pure_json_amendment;
use crate::retry::RetryError;

/// Extra attempts granted to a JSON request after an unparsable response,
/// each with an amended pure-JSON prompt.
const JSON_REPAIR_ATTEMPTS: usize = 2;

/// Shortest free-text fragment worth keeping when splitting mixed output.
const MIN_SEGMENT_LEN: usize = 50;

fn variants_tail_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)\{[^{}]*"variants"[^{}]*\[.*?\][^{}]*\}"#).expect("valid regex")
    })
}

impl GenerationService {
    /// Issue one completion request under the retry policy. Soft-failing.
    pub(crate) async fn request(
        &self,
        prompt: &str,
        timeout: Duration,
        task_name: &str,
    ) -> Option<String> {
        let retry = self.retry_manager();
        let progress = self.progress().clone();
        let result = retry
            .retry(task_name, progress.as_ref(), || {
                self.client.complete(&self.config.model, prompt, timeout)
            })
            .await;

        match result {
            Ok(text) => Some(text),
            Err(RetryError::Exhausted {
                attempts,
                last_error,
            }) => {
                let message = format!(
                    "[{}] still failing after {} attempts: {}",
                    task_name, attempts, last_error
                );
                tracing::error!("{}", message);
                progress.notify(&message);
                None
            }
            Err(RetryError::NotRetryable(error)) => {
                let message = format!("[{}] non-retryable error: {}", task_name, error);
                tracing::error!("{}", message);
                progress.notify(&message);
                None
            }
        }
    }

    /// Issue a request whose response must contain a JSON structure.
    ///
    /// On extraction failure the request is re-issued up to twice more,
    /// each time with an explicit pure-JSON demand prepended to the
    /// prompt. Soft-failing.
    pub(crate) async fn request_json(
        &self,
        prompt: &str,
        timeout: Duration,
        task_name: &str,
    ) -> Option<Value> {
        let mut current = prompt.to_string();
        for attempt in 0..=JSON_REPAIR_ATTEMPTS {
            let text = self.request(&current, timeout, task_name).await?;
            if let Some(parsed) = extract_json(&text) {
                return Some(parsed);
            }
            if attempt < JSON_REPAIR_ATTEMPTS {
                let message = format!(
                    "[{}] response was not valid JSON, re-requesting ({}/{})",
                    task_name,
                    attempt + 1,
                    JSON_REPAIR_ATTEMPTS
                );
                tracing::warn!("{}", message);
                self.progress().notify(&message);
                current = pure_json_amendment(prompt);
            } else {
                let message = format!("[{}] response was not valid JSON after repair attempts", task_name);
                tracing::error!("{}", message);
                self.progress().notify(&message);
            }
        }
        None
    }

    /// Issue a request whose response interleaves free-text content with a
    /// trailing JSON metadata block (the three-variant format).
    ///
    /// The JSON tail is parsed, the preceding text is split into segments
    /// on blank lines (dropping fragments under 50 characters), and each
    /// segment is attached positionally as its variant's `content` field.
    pub(crate) async fn request_mixed(&self, prompt: &str, task_name: &str) -> Option<Value> {
        let text = self
            .request(prompt, self.config.request_timeout, task_name)
            .await?;

        let Some(found) = variants_tail_re().find(&text) else {
            // No metadata tail; the whole response may already be JSON.
            return match serde_json::from_str(&text) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::error!("[{}] mixed response had no variants block: {}", task_name, e);
                    None
                }
            };
        };

        let mut parsed: Value = match serde_json::from_str(found.as_str()) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("[{}] variants block failed to parse: {}", task_name, e);
                return None;
            }
        };

        let segments = split_segments(&text[..found.start()]);
        if let Some(variants) = parsed
            .get_mut("variants")
            .and_then(|v| v.as_array_mut())
        {
            for (variant, segment) in variants.iter_mut().zip(segments.iter()) {
                if let Some(obj) = variant.as_object_mut() {
                    obj.insert("content".to_string(), Value::String(segment.clone()));
                }
            }
        }
        Some(parsed)
    }
}

/// Split free text into paragraph segments on blank-line boundaries,
/// discarding fragments too short to be real content.
fn split_segments(text: &str) -> Vec<String> {
    static BLANK: OnceLock<Regex> = OnceLock::new();
    let blank = BLANK.get_or_init(|| Regex::new(r"\n\s*\n").expect("valid regex"));
    blank
        .split(text.trim())
        .map(str::trim)
        .filter(|segment| segment.len() > MIN_SEGMENT_LEN)
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::testing::ScriptedClient;
    use super::super::GenerationService;
    use super::*;
    use crate::config::GenerationConfig;
    use crate::llm::LlmError;
    use crate::retry::RetryConfig;
    use serde_json::json;
    use std::sync::Arc;

    fn service(client: ScriptedClient) -> (GenerationService, Arc<ScriptedClient>) {
        let client = Arc::new(client);
        let svc = GenerationService::new(client.clone(), GenerationConfig::default());
        // Keep test retries fast.
        svc.set_retry_config(RetryConfig {
            base_delay: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        });
        (svc, client)
    }

    #[tokio::test]
    async fn request_soft_fails_on_non_retryable_error() {
        let (svc, _client) = service(ScriptedClient::new(vec![Err(LlmError::client_error(
            401, "bad key",
        ))]));
        let result = svc
            .request("p", Duration::from_secs(1), "test")
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn request_retries_transient_errors_then_succeeds() {
        let client = ScriptedClient::new(vec![
            Err(LlmError::server_error(503, "unavailable")),
            Err(LlmError::timeout("Request timeout")),
            Ok("recovered".to_string()),
        ]);
        let (svc, client) = service(client);
        let result = svc.request("p", Duration::from_secs(1), "test").await;
        assert_eq!(result.as_deref(), Some("recovered"));
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn request_json_extracts_fenced_output() {
        let (svc, _client) = service(ScriptedClient::always_ok(
            "Sure!\n```json\n{\"chapters\": []}\n```",
        ));
        let result = svc
            .request_json("p", Duration::from_secs(1), "test")
            .await;
        assert_eq!(result, Some(json!({"chapters": []})));
    }

    #[tokio::test]
    async fn request_json_reissues_with_amended_prompt() {
        let client = ScriptedClient::new(vec![
            Ok("definitely not json".to_string()),
            Ok("{\"ok\": true}".to_string()),
        ]);
        let (svc, client) = service(client);
        let result = svc
            .request_json("original prompt", Duration::from_secs(1), "test")
            .await;
        assert_eq!(result, Some(json!({"ok": true})));

        let prompts = client.prompts.lock().unwrap().clone();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0], "original prompt");
        assert!(prompts[1].starts_with("Regenerate"));
        assert!(prompts[1].ends_with("original prompt"));
    }

    #[tokio::test]
    async fn request_json_gives_up_after_two_repairs() {
        let client = ScriptedClient::new(vec![
            Ok("noise".to_string()),
            Ok("more noise".to_string()),
            Ok("still noise".to_string()),
            Ok("{\"too\": \"late\"}".to_string()),
        ]);
        let (svc, client) = service(client);
        let result = svc
            .request_json("p", Duration::from_secs(1), "test")
            .await;
        assert!(result.is_none());
        // Initial attempt plus exactly two repair reissues.
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn mixed_response_attaches_segments_to_variants() {
        let body = format!(
            "{}\n\n{}\n\n{}\n\n{}",
            "First premise paragraph, long enough to clear the minimum fragment length filter.",
            "Second premise paragraph, also long enough to clear the minimum fragment filter.",
            "Third premise paragraph, padded out well past the minimum fragment length too.",
            r#"{"variants": [{"label": "A"}, {"label": "B"}, {"label": "C"}]}"#
        );
        let (svc, _client) = service(ScriptedClient::always_ok(&body));
        let result = svc.request_mixed("p", "variants").await.unwrap();

        let variants = result["variants"].as_array().unwrap();
        assert_eq!(variants.len(), 3);
        assert!(variants[0]["content"]
            .as_str()
            .unwrap()
            .starts_with("First premise"));
        assert!(variants[2]["content"]
            .as_str()
            .unwrap()
            .starts_with("Third premise"));
    }

    #[tokio::test]
    async fn mixed_response_without_tail_falls_back_to_plain_json() {
        let (svc, _client) = service(ScriptedClient::always_ok(r#"{"plain": 1}"#));
        let result = svc.request_mixed("p", "variants").await;
        assert_eq!(result, Some(json!({"plain": 1})));
    }

    #[test]
    fn segment_splitting_drops_short_fragments() {
        let text = "short\n\nA real paragraph that is comfortably longer than fifty characters in total.\n\nok";
        let segments = split_segments(text);
        assert_eq!(segments.len(), 1);
        assert!(segments[0].starts_with("A real paragraph"));
    }
}
