//! Blocking facade over the generation service.
//!
//! For callers without an async runtime of their own (synchronous CLIs,
//! scripts). The session owns a private current-thread runtime and drives
//! each operation to completion on it. Must not be used from inside an
//! existing tokio runtime.

use std::collections::HashMap;
use std::sync::Arc;

use super::{BatchResult, ChapterEntry, ChapterUnit, GenerationService, StageContext, SummaryEntry};

pub struct BlockingSession {
    service: Arc<GenerationService>,
    runtime: tokio::runtime::Runtime,
}

impl BlockingSession {
    pub fn new(service: Arc<GenerationService>) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self { service, runtime })
    }

    pub fn service(&self) -> &Arc<GenerationService> {
        &self.service
    }

    pub fn generate_theme_paragraph(
        &self,
        one_line_theme: &str,
        genre: &str,
        canon: &str,
        user_prompt: &str,
    ) -> Option<String> {
        self.runtime.block_on(self.service.generate_theme_paragraph(
            one_line_theme,
            genre,
            canon,
            user_prompt,
        ))
    }

    pub fn generate_theme_variants(
        &self,
        one_line_theme: &str,
        genre: &str,
        intent: &str,
        user_prompt: &str,
    ) -> Option<serde_json::Value> {
        self.runtime.block_on(self.service.generate_theme_variants(
            one_line_theme,
            genre,
            intent,
            user_prompt,
        ))
    }

    pub fn generate_chapter_outline(
        &self,
        one_line_theme: &str,
        story_outline: &str,
        canon: &str,
        user_prompt: &str,
    ) -> Option<serde_json::Value> {
        self.runtime.block_on(self.service.generate_chapter_outline(
            one_line_theme,
            story_outline,
            canon,
            user_prompt,
        ))
    }

    pub fn generate_summary(&self, unit: &ChapterUnit, ctx: &StageContext) -> Option<String> {
        self.runtime.block_on(self.service.generate_summary(unit, ctx))
    }

    pub fn generate_chapter(
        &self,
        unit: &ChapterUnit,
        summary: &str,
        ctx: &StageContext,
    ) -> Option<String> {
        self.runtime
            .block_on(self.service.generate_chapter(unit, summary, ctx))
    }

    pub fn generate_chapter_with_refinement(
        &self,
        unit: &ChapterUnit,
        summary: &str,
        ctx: &StageContext,
    ) -> Option<String> {
        self.runtime
            .block_on(self.service.generate_chapter_with_refinement(unit, summary, ctx))
    }

    pub fn generate_batch_summaries(
        &self,
        units: &[ChapterUnit],
        ctx: &StageContext,
    ) -> BatchResult<SummaryEntry> {
        self.runtime
            .block_on(self.service.generate_batch_summaries(units, ctx))
    }

    pub fn generate_batch_chapters_with_refinement(
        &self,
        units: &[ChapterUnit],
        summaries: &HashMap<String, String>,
        ctx: &StageContext,
    ) -> BatchResult<ChapterEntry> {
        self.runtime.block_on(
            self.service
                .generate_batch_chapters_with_refinement(units, summaries, ctx),
        )
    }
}
