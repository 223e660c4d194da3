//! The critique-refine pipeline for one chapter.
//!
//! Draft, critique, then conditionally refine. The pipeline is biased
//! toward keeping content: only a failed draft fails the unit; a failed
//! critique or refinement falls back to the draft. Intermediate artifacts
//! (drafts, critiques, refinement history) are appended to the project
//! store when enabled, purely as an audit trail.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{word_count, ChapterUnit, GenerationService, StageContext};
use crate::config::RefinementMode;
use crate::prompts;
use crate::store;

/// One problem found by the critique pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CritiqueIssue {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub problem: String,
    #[serde(default)]
    pub suggestion: String,
}

/// Structured self-assessment of a generated chapter.
///
/// When the model's critique cannot be parsed into this shape, the raw
/// text is preserved in `raw_critique` and the structured fields stay
/// empty; the refinement prompt then embeds the raw text instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CritiqueReport {
    #[serde(default)]
    pub issues: Vec<CritiqueIssue>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub priority_fixes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_critique: Option<String>,
}

impl CritiqueReport {
    /// Build a report from extracted JSON, falling back to a raw wrapper
    /// when the structure does not match.
    pub fn from_value(value: Value) -> Self {
        match serde_json::from_value::<CritiqueReport>(value.clone()) {
            Ok(report) if !report.is_empty() => report,
            _ => CritiqueReport {
                raw_critique: Some(value.to_string()),
                ..Default::default()
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
            && self.strengths.is_empty()
            && self.priority_fixes.is_empty()
            && self.raw_critique.is_none()
    }

    /// The text embedded into the refinement prompt.
    pub fn as_prompt_text(&self) -> String {
        if let Some(raw) = &self.raw_critique {
            return raw.clone();
        }
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Compact summary persisted in the refinement history log.
    fn summary(&self) -> Value {
        if let Some(raw) = &self.raw_critique {
            let truncated: String = raw.chars().take(200).collect();
            return json!({ "raw_critique": truncated });
        }
        json!({
            "issues_count": self.issues.len(),
            "strengths": self.strengths,
            "priority_fixes": self.priority_fixes,
            "issue_categories": self.issues.iter().map(|i| i.category.clone()).collect::<Vec<_>>(),
        })
    }
}

impl GenerationService {
    /// Generate a structured critique of one chapter's prose.
    ///
    /// Returns `None` only when the underlying JSON request soft-fails;
    /// a parsable-but-misshapen critique becomes a raw-text report.
    pub async fn generate_critique(
        &self,
        unit: &ChapterUnit,
        content: &str,
        _ctx: &StageContext,
    ) -> Option<CritiqueReport> {
        let chapter_num = unit.number.to_string();
        let prompt = self.prompts.render(
            prompts::NOVEL_CRITIQUE,
            &[
                ("chapter_num", chapter_num.as_str()),
                ("title", unit.title.as_str()),
                ("content", content),
            ],
        )?;
        let task = format!("chapter {} critique", unit.number);
        let value = self
            .request_json(&prompt, self.config.critique_timeout, &task)
            .await?;
        Some(CritiqueReport::from_value(value))
    }

    /// Rewrite one chapter's prose according to a critique. Long timeout.
    pub async fn generate_refinement(
        &self,
        unit: &ChapterUnit,
        content: &str,
        critique: &CritiqueReport,
        ctx: &StageContext,
    ) -> Option<String> {
        let chapter_num = unit.number.to_string();
        let critique_text = critique.as_prompt_text();
        let prompt = self.prompts.render_with_user_prompt(
            prompts::NOVEL_REFINEMENT,
            &[
                ("chapter_num", chapter_num.as_str()),
                ("title", unit.title.as_str()),
                ("content", content),
                ("critique", critique_text.as_str()),
                ("context_info", ctx.context_info.as_str()),
            ],
            &ctx.user_prompt,
        )?;
        let task = format!("chapter {} refinement", unit.number);
        self.request(&prompt, self.config.chapter_timeout, &task)
            .await
    }

    /// Generate one chapter's prose through the full draft-critique-refine
    /// flow. Returns the refined prose when refinement ran and succeeded,
    /// otherwise the draft; `None` only when drafting itself failed.
    pub async fn generate_chapter_with_refinement(
        &self,
        unit: &ChapterUnit,
        summary: &str,
        ctx: &StageContext,
    ) -> Option<String> {
        let timestamp = chrono::Utc::now().to_rfc3339();

        self.progress()
            .notify(&format!("[chapter {}] drafting", unit.number));
        let draft = self.generate_chapter(unit, summary, ctx).await?;

        self.save_intermediate(
            store::INITIAL_DRAFTS,
            unit,
            json!({
                "timestamp": timestamp,
                "chapter_title": unit.title,
                "content": draft,
                "word_count": word_count(&draft),
            }),
        )
        .await;

        if !self.config.enable_refinement {
            self.progress()
                .notify(&format!("[chapter {}] done (refinement off)", unit.number));
            return Some(draft);
        }

        self.progress()
            .notify(&format!("[chapter {}] critiquing", unit.number));
        let Some(critique) = self.generate_critique(unit, &draft, ctx).await else {
            // A missing critique is not fatal; the draft stands.
            self.progress().notify(&format!(
                "[chapter {}] critique failed, keeping draft",
                unit.number
            ));
            self.progress()
                .notify(&format!("[chapter {}] done", unit.number));
            return Some(draft);
        };

        self.save_intermediate(
            store::CRITIQUES,
            unit,
            json!({
                "timestamp": timestamp,
                "chapter_title": unit.title,
                "critique_data": critique,
            }),
        )
        .await;

        if self.config.show_critique {
            let mut message = format!(
                "[chapter {}] critique: {} issues",
                unit.number,
                critique.issues.len()
            );
            if let Some(first) = critique.priority_fixes.first() {
                message.push_str(&format!(", priority fix: {}", first));
            }
            self.progress().notify(&message);
        }

        match self.config.refinement_mode {
            RefinementMode::Disabled => {
                self.progress()
                    .notify(&format!("[chapter {}] done", unit.number));
                return Some(draft);
            }
            RefinementMode::Manual => {
                let question = format!(
                    "Refine chapter {} based on the critique?",
                    unit.number
                );
                if !self.confirm_gate().confirm(&question) {
                    self.progress()
                        .notify(&format!("[chapter {}] done", unit.number));
                    return Some(draft);
                }
            }
            RefinementMode::Auto => {}
        }

        self.progress()
            .notify(&format!("[chapter {}] refining", unit.number));
        let Some(refined) = self.generate_refinement(unit, &draft, &critique, ctx).await else {
            self.progress().notify(&format!(
                "[chapter {}] refinement failed, keeping draft",
                unit.number
            ));
            self.progress()
                .notify(&format!("[chapter {}] done", unit.number));
            return Some(draft);
        };

        self.save_intermediate(
            store::REFINED_DRAFTS,
            unit,
            json!({
                "timestamp": timestamp,
                "chapter_title": unit.title,
                "content": refined,
                "word_count": word_count(&refined),
            }),
        )
        .await;
        self.save_intermediate(
            store::REFINEMENT_HISTORY,
            unit,
            json!({
                "timestamp": timestamp,
                "chapter_title": unit.title,
                "initial_word_count": word_count(&draft),
                "refined_word_count": word_count(&refined),
                "word_count_change": word_count(&refined) as i64 - word_count(&draft) as i64,
                "critique_summary": critique.summary(),
            }),
        )
        .await;

        self.progress()
            .notify(&format!("[chapter {}] done", unit.number));
        Some(refined)
    }

    /// Append an entry to an intermediate-data log. Persistence failures
    /// are logged and never fail the pipeline.
    async fn save_intermediate(&self, key: &str, unit: &ChapterUnit, entry: Value) {
        if !self.config.save_intermediate_data {
            return;
        }
        let Some(project_store) = self.store() else {
            return;
        };
        if let Err(e) = project_store.append_entry(key, &unit.key(), entry).await {
            tracing::warn!("failed to persist {} for {}: {}", key, unit.key(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::ScriptedClient;
    use super::*;
    use crate::config::GenerationConfig;
    use crate::llm::LlmError;
    use crate::progress::{CollectingProgress, NeverConfirm};
    use crate::retry::RetryConfig;
    use crate::store::ProjectStore;
    use std::sync::Arc;
    use std::time::Duration;

    const CRITIQUE_JSON: &str = r#"{"issues": [{"category": "plot", "problem": "rushed", "suggestion": "slow down"}], "strengths": ["voice"], "priority_fixes": ["pacing"]}"#;

    fn unit() -> ChapterUnit {
        ChapterUnit {
            number: 1,
            title: "Ashfall".to_string(),
            outline: "the city burns".to_string(),
        }
    }

    fn service_with(
        script: Vec<Result<String, LlmError>>,
        config: GenerationConfig,
    ) -> (GenerationService, Arc<ScriptedClient>) {
        let client = Arc::new(ScriptedClient::new(script));
        let svc = GenerationService::new(client.clone(), config);
        svc.set_retry_config(RetryConfig {
            base_delay: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        });
        (svc, client)
    }

    #[tokio::test]
    async fn auto_mode_returns_refined_content() {
        let (svc, client) = service_with(
            vec![
                Ok("the draft".to_string()),
                Ok(CRITIQUE_JSON.to_string()),
                Ok("the refined draft".to_string()),
            ],
            GenerationConfig::default(),
        );
        let result = svc
            .generate_chapter_with_refinement(&unit(), "summary", &StageContext::default())
            .await;
        assert_eq!(result.as_deref(), Some("the refined draft"));
        assert_eq!(client.call_count(), 3);
    }

    #[tokio::test]
    async fn failed_draft_fails_the_unit() {
        let (svc, _client) = service_with(
            vec![Err(LlmError::client_error(400, "malformed"))],
            GenerationConfig::default(),
        );
        let result = svc
            .generate_chapter_with_refinement(&unit(), "summary", &StageContext::default())
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn failed_critique_keeps_draft_as_success() {
        let (svc, _client) = service_with(
            vec![
                Ok("the draft".to_string()),
                Err(LlmError::client_error(400, "bad critique request")),
            ],
            GenerationConfig::default(),
        );
        let result = svc
            .generate_chapter_with_refinement(&unit(), "summary", &StageContext::default())
            .await;
        assert_eq!(result.as_deref(), Some("the draft"));
    }

    #[tokio::test]
    async fn disabled_mode_never_invokes_refinement() {
        let config = GenerationConfig {
            refinement_mode: crate::config::RefinementMode::Disabled,
            ..Default::default()
        };
        let (svc, client) = service_with(
            vec![
                Ok("the draft".to_string()),
                Ok(CRITIQUE_JSON.to_string()),
                Ok("should never be requested".to_string()),
            ],
            config,
        );
        let result = svc
            .generate_chapter_with_refinement(&unit(), "summary", &StageContext::default())
            .await;
        assert_eq!(result.as_deref(), Some("the draft"));
        // Draft and critique only.
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn refinement_off_skips_critique_entirely() {
        let config = GenerationConfig {
            enable_refinement: false,
            ..Default::default()
        };
        let (svc, client) = service_with(vec![Ok("the draft".to_string())], config);
        let result = svc
            .generate_chapter_with_refinement(&unit(), "summary", &StageContext::default())
            .await;
        assert_eq!(result.as_deref(), Some("the draft"));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn manual_mode_honors_declined_confirmation() {
        let (svc, client) = service_with(
            vec![
                Ok("the draft".to_string()),
                Ok(CRITIQUE_JSON.to_string()),
            ],
            GenerationConfig {
                refinement_mode: crate::config::RefinementMode::Manual,
                ..Default::default()
            },
        );
        let svc = svc.with_confirm(Arc::new(NeverConfirm));
        let result = svc
            .generate_chapter_with_refinement(&unit(), "summary", &StageContext::default())
            .await;
        assert_eq!(result.as_deref(), Some("the draft"));
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn failed_refinement_falls_back_to_draft() {
        let (svc, _client) = service_with(
            vec![
                Ok("the draft".to_string()),
                Ok(CRITIQUE_JSON.to_string()),
                Err(LlmError::client_error(400, "refinement rejected")),
            ],
            GenerationConfig::default(),
        );
        let result = svc
            .generate_chapter_with_refinement(&unit(), "summary", &StageContext::default())
            .await;
        assert_eq!(result.as_deref(), Some("the draft"));
    }

    #[tokio::test]
    async fn pipeline_emits_step_progress() {
        let progress = Arc::new(CollectingProgress::new());
        let (svc, _client) = service_with(
            vec![
                Ok("the draft".to_string()),
                Ok(CRITIQUE_JSON.to_string()),
                Ok("refined".to_string()),
            ],
            GenerationConfig::default(),
        );
        let svc = svc.with_progress(progress.clone());
        svc.generate_chapter_with_refinement(&unit(), "summary", &StageContext::default())
            .await;

        let messages = progress.messages().join("\n");
        for step in ["drafting", "critiquing", "refining", "done"] {
            assert!(messages.contains(step), "missing step {}", step);
        }
    }

    #[tokio::test]
    async fn fallback_paths_still_report_done() {
        // Critique failure path.
        let progress = Arc::new(CollectingProgress::new());
        let (svc, _client) = service_with(
            vec![
                Ok("the draft".to_string()),
                Err(LlmError::client_error(400, "bad critique request")),
            ],
            GenerationConfig::default(),
        );
        let svc = svc.with_progress(progress.clone());
        svc.generate_chapter_with_refinement(&unit(), "summary", &StageContext::default())
            .await;
        assert!(progress.messages().last().unwrap().contains("done"));

        // Refinement failure path.
        let progress = Arc::new(CollectingProgress::new());
        let (svc, _client) = service_with(
            vec![
                Ok("the draft".to_string()),
                Ok(CRITIQUE_JSON.to_string()),
                Err(LlmError::client_error(400, "refinement rejected")),
            ],
            GenerationConfig::default(),
        );
        let svc = svc.with_progress(progress.clone());
        svc.generate_chapter_with_refinement(&unit(), "summary", &StageContext::default())
            .await;
        assert!(progress.messages().last().unwrap().contains("done"));
    }

    #[tokio::test]
    async fn intermediate_data_lands_in_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let project_store = Arc::new(ProjectStore::open(dir.path()).unwrap());
        let (svc, _client) = service_with(
            vec![
                Ok("the draft".to_string()),
                Ok(CRITIQUE_JSON.to_string()),
                Ok("refined".to_string()),
            ],
            GenerationConfig::default(),
        );
        let svc = svc.with_store(project_store.clone());
        svc.generate_chapter_with_refinement(&unit(), "summary", &StageContext::default())
            .await;

        assert_eq!(
            project_store.read(store::INITIAL_DRAFTS)["chapter_1"][0]["content"],
            "the draft"
        );
        assert_eq!(
            project_store.read(store::CRITIQUES)["chapter_1"][0]["critique_data"]["priority_fixes"]
                [0],
            "pacing"
        );
        let history = project_store.read(store::REFINEMENT_HISTORY);
        assert_eq!(history["chapter_1"][0]["critique_summary"]["issues_count"], 1);
    }

    #[tokio::test]
    async fn saving_is_skipped_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let project_store = Arc::new(ProjectStore::open(dir.path()).unwrap());
        let (svc, _client) = service_with(
            vec![
                Ok("the draft".to_string()),
                Ok(CRITIQUE_JSON.to_string()),
                Ok("refined".to_string()),
            ],
            GenerationConfig {
                save_intermediate_data: false,
                ..Default::default()
            },
        );
        let svc = svc.with_store(project_store.clone());
        svc.generate_chapter_with_refinement(&unit(), "summary", &StageContext::default())
            .await;
        assert_eq!(project_store.read(store::INITIAL_DRAFTS), serde_json::json!({}));
    }

    #[test]
    fn misshapen_critique_becomes_raw_report() {
        let report = CritiqueReport::from_value(serde_json::json!(["not", "a", "report"]));
        assert!(report.issues.is_empty());
        assert!(report.raw_critique.is_some());
        assert!(report.as_prompt_text().contains("not"));
    }

    #[test]
    fn structured_critique_parses() {
        let value: Value = serde_json::from_str(CRITIQUE_JSON).unwrap();
        let report = CritiqueReport::from_value(value);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].category, "plot");
        assert_eq!(report.priority_fixes, vec!["pacing"]);
        assert!(report.raw_critique.is_none());
    }
}
