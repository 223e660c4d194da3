//! The generation service: every LLM-backed stage of novel production.
//!
//! Layering, top down:
//! - batch orchestration ([`batch`]) fans independent chapter units out
//!   concurrently and aggregates partial failures;
//! - the critique-refine pipeline ([`pipeline`]) runs draft, critique, and
//!   conditional refinement for one chapter;
//! - the request layer ([`request`]) issues single completions under the
//!   retry manager and recovers structured output from free text.
//!
//! Every public operation is soft-failing: a chapter that cannot be
//! generated comes back as `None` (or a failed batch key), never as a
//! crash of the surrounding session.

mod batch;
mod blocking;
mod pipeline;
mod request;

pub use batch::BatchResult;
pub use blocking::BlockingSession;
pub use pipeline::{CritiqueIssue, CritiqueReport};

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

use crate::config::GenerationConfig;
use crate::llm::LlmClient;
use crate::progress::{AlwaysConfirm, Confirm, NoopProgress, ProgressSink};
use crate::prompts::{self, PromptLibrary};
use crate::retry::{RetryConfig, RetryManager};
use crate::store::ProjectStore;

/// One independent unit of generation work: a chapter identified by its
/// 1-based number, with the outline fragment it is generated from.
/// Immutable once dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterUnit {
    pub number: u32,
    pub title: String,
    pub outline: String,
}

impl ChapterUnit {
    /// Stable key used in batch results and persisted documents.
    pub fn key(&self) -> String {
        format!("chapter_{}", self.number)
    }
}

/// Prompt-building inputs shared by every unit of one stage: surrounding
/// story context, canon constraints, and the operator's extra instructions.
#[derive(Debug, Clone, Default)]
pub struct StageContext {
    pub context_info: String,
    pub canon: String,
    pub user_prompt: String,
}

/// A generated chapter summary as stored in batch results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub title: String,
    pub summary: String,
}

/// A generated chapter's prose as stored in batch results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterEntry {
    pub title: String,
    pub content: String,
    pub word_count: usize,
}

/// Service owning the LLM client, retry policy, prompt library, and the
/// optional intermediate-data store.
pub struct GenerationService {
    client: Arc<dyn LlmClient>,
    config: GenerationConfig,
    // Mutated only from the interactive operator between batches.
    retry: RwLock<RetryManager>,
    prompts: PromptLibrary,
    store: Option<Arc<ProjectStore>>,
    progress: Arc<dyn ProgressSink>,
    confirm: Arc<dyn Confirm>,
}

impl GenerationService {
    pub fn new(client: Arc<dyn LlmClient>, config: GenerationConfig) -> Self {
        Self {
            client,
            config,
            retry: RwLock::new(RetryManager::default()),
            prompts: PromptLibrary::builtin(),
            store: None,
            progress: Arc::new(NoopProgress),
            confirm: Arc::new(AlwaysConfirm),
        }
    }

    /// Attach the project store used for intermediate-data persistence.
    pub fn with_store(mut self, store: Arc<ProjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Install the operator confirmation used by manual refinement mode.
    pub fn with_confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_prompts(mut self, prompts: PromptLibrary) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Replace the retry configuration. Intended for the interactive
    /// operator between batches; never called from worker tasks.
    pub fn set_retry_config(&self, config: RetryConfig) {
        let mut retry = self.retry.write().expect("retry lock poisoned");
        *retry = retry.with_config(config);
    }

    pub fn get_retry_config(&self) -> RetryConfig {
        self.retry
            .read()
            .expect("retry lock poisoned")
            .config()
            .clone()
    }

    pub fn reset_retry_config(&self) {
        self.set_retry_config(RetryConfig::default());
    }

    pub(crate) fn retry_manager(&self) -> RetryManager {
        self.retry.read().expect("retry lock poisoned").clone()
    }

    pub(crate) fn progress(&self) -> &Arc<dyn ProgressSink> {
        &self.progress
    }

    pub(crate) fn confirm_gate(&self) -> &Arc<dyn Confirm> {
        &self.confirm
    }

    pub(crate) fn store(&self) -> Option<&Arc<ProjectStore>> {
        self.store.as_ref()
    }

    /// Expand a one-line theme into a paragraph-length premise.
    pub async fn generate_theme_paragraph(
        &self,
        one_line_theme: &str,
        genre: &str,
        canon: &str,
        user_prompt: &str,
    ) -> Option<String> {
        let prompt = self.prompts.render_with_user_prompt(
            prompts::THEME_PARAGRAPH,
            &[
                ("one_line_theme", one_line_theme),
                ("genre", genre),
                ("canon", canon),
            ],
            user_prompt,
        )?;
        self.request(&prompt, self.config.request_timeout, "theme paragraph")
            .await
    }

    /// Generate three premise variants: free-text paragraphs plus a JSON
    /// metadata tail, merged positionally.
    pub async fn generate_theme_variants(
        &self,
        one_line_theme: &str,
        genre: &str,
        intent: &str,
        user_prompt: &str,
    ) -> Option<serde_json::Value> {
        let prompt = self.prompts.render_with_user_prompt(
            prompts::THEME_VARIANTS,
            &[
                ("one_line_theme", one_line_theme),
                ("genre", genre),
                ("intent", intent),
            ],
            user_prompt,
        )?;
        self.request_mixed(&prompt, "theme variants").await
    }

    /// Generate the story canon: tone, point-of-view rules, thematic
    /// structure, world constraints, and style rules.
    ///
    /// Unlike the other stages this never comes back empty: when the
    /// model's answer cannot be recovered, a skeleton canon is returned
    /// so downstream stages always have one to render into prompts.
    pub async fn generate_canon_bible(
        &self,
        one_line_theme: &str,
        genre: &str,
        audience_and_tone: &str,
        user_prompt: &str,
    ) -> serde_json::Value {
        let prompt = self.prompts.render_with_user_prompt(
            prompts::CANON_BIBLE,
            &[
                ("one_line_theme", one_line_theme),
                ("genre", genre),
                ("audience_and_tone", audience_and_tone),
            ],
            user_prompt,
        );
        let Some(prompt) = prompt else {
            return default_canon_bible(one_line_theme);
        };
        match self
            .request_json(&prompt, self.config.request_timeout, "canon bible")
            .await
        {
            Some(value) => value,
            None => {
                tracing::warn!("[canon bible] falling back to the skeleton canon");
                default_canon_bible(one_line_theme)
            }
        }
    }

    /// Expand the premise into a full story outline.
    pub async fn generate_story_outline(
        &self,
        one_line_theme: &str,
        theme_paragraph: &str,
        canon: &str,
        user_prompt: &str,
    ) -> Option<String> {
        let prompt = self.prompts.render_with_user_prompt(
            prompts::STORY_OUTLINE,
            &[
                ("one_line_theme", one_line_theme),
                ("theme_paragraph", theme_paragraph),
                ("canon", canon),
            ],
            user_prompt,
        )?;
        self.request(&prompt, self.config.request_timeout, "story outline")
            .await
    }

    /// Break a story outline into chapter cards. Structured JSON response.
    pub async fn generate_chapter_outline(
        &self,
        one_line_theme: &str,
        story_outline: &str,
        canon: &str,
        user_prompt: &str,
    ) -> Option<serde_json::Value> {
        let prompt = self.prompts.render_with_user_prompt(
            prompts::CHAPTER_OUTLINE,
            &[
                ("one_line_theme", one_line_theme),
                ("story_outline", story_outline),
                ("canon", canon),
            ],
            user_prompt,
        )?;
        self.request_json(&prompt, self.config.request_timeout, "chapter outline")
            .await
    }

    /// Generate the summary for one chapter.
    pub async fn generate_summary(
        &self,
        unit: &ChapterUnit,
        ctx: &StageContext,
    ) -> Option<String> {
        let chapter_num = unit.number.to_string();
        let prompt = self.prompts.render_with_user_prompt(
            prompts::CHAPTER_SUMMARY,
            &[
                ("chapter_num", chapter_num.as_str()),
                ("title", unit.title.as_str()),
                ("outline", unit.outline.as_str()),
                ("context_info", ctx.context_info.as_str()),
                ("canon", ctx.canon.as_str()),
            ],
            &ctx.user_prompt,
        )?;
        let task = format!("chapter {} summary", unit.number);
        self.request(&prompt, self.config.request_timeout, &task)
            .await
    }

    /// Generate the prose for one chapter from its summary. Long timeout;
    /// prose generation is slow.
    pub async fn generate_chapter(
        &self,
        unit: &ChapterUnit,
        summary: &str,
        ctx: &StageContext,
    ) -> Option<String> {
        let chapter_num = unit.number.to_string();
        let prompt = self.prompts.render_with_user_prompt(
            prompts::NOVEL_CHAPTER,
            &[
                ("chapter_num", chapter_num.as_str()),
                ("title", unit.title.as_str()),
                ("outline", unit.outline.as_str()),
                ("summary", summary),
                ("context_info", ctx.context_info.as_str()),
                ("canon", ctx.canon.as_str()),
            ],
            &ctx.user_prompt,
        )?;
        let task = format!("chapter {} prose", unit.number);
        self.request(&prompt, self.config.chapter_timeout, &task)
            .await
    }
}

pub(crate) fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Skeleton canon used when canon generation fails outright.
fn default_canon_bible(one_line_theme: &str) -> serde_json::Value {
    serde_json::json!({
        "tone": {
            "register": "matched to the theme",
            "rhythm": "matched to the genre"
        },
        "pov_rules": {
            "default": "close-third",
            "allowed": ["first", "close-third"],
            "distance": "close"
        },
        "genre_addendum": {},
        "theme": {
            "thesis": one_line_theme,
            "antithesis": "to be developed",
            "synthesis": "to be developed"
        },
        "world": {
            "time_place": "implied by the theme",
            "constraints": []
        },
        "style_do": ["concrete nouns over adjectives", "action carrying interiority"],
        "style_dont": ["empty emotional statements", "overworked metaphor"]
    })
}
