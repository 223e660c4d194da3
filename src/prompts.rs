//! Prompt templates for every generation stage.
//!
//! Templates are plain strings with `{name}` placeholders. A project may
//! override any built-in by shipping a `prompts.json` document (an object
//! of template name to template string) in its root; missing or corrupt
//! files silently fall back to the built-ins so generation never blocks
//! on prompt configuration.

use std::collections::HashMap;
use std::path::Path;

/// Template name for theme paragraph expansion.
pub const THEME_PARAGRAPH: &str = "theme_paragraph";
/// Template name for three-variant theme generation (mixed output).
pub const THEME_VARIANTS: &str = "theme_variants";
/// Template name for the story canon (JSON output).
pub const CANON_BIBLE: &str = "canon_bible";
/// Template name for the full story outline.
pub const STORY_OUTLINE: &str = "story_outline";
/// Template name for the chapter-by-chapter outline (JSON output).
pub const CHAPTER_OUTLINE: &str = "chapter_outline";
/// Template name for a single chapter summary.
pub const CHAPTER_SUMMARY: &str = "chapter_summary";
/// Template name for chapter prose.
pub const NOVEL_CHAPTER: &str = "novel_chapter";
/// Template name for the chapter critique (JSON output).
pub const NOVEL_CRITIQUE: &str = "novel_critique";
/// Template name for critique-driven refinement.
pub const NOVEL_REFINEMENT: &str = "novel_refinement";

/// Library of prompt templates with per-project overrides.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    templates: HashMap<String, String>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self {
            templates: builtin_templates(),
        }
    }
}

impl PromptLibrary {
    /// Built-in templates only.
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Built-ins overlaid with any templates found in
    /// `<project_dir>/prompts.json`.
    pub fn for_project(project_dir: &Path) -> Self {
        let mut library = Self::default();
        let path = project_dir.join("prompts.json");
        let Ok(contents) = std::fs::read_to_string(&path) else {
            return library;
        };
        match serde_json::from_str::<HashMap<String, String>>(&contents) {
            Ok(overrides) => {
                tracing::info!(
                    "loaded {} prompt overrides from {}",
                    overrides.len(),
                    path.display()
                );
                library.templates.extend(overrides);
            }
            Err(e) => {
                tracing::warn!("ignoring corrupt {}: {}", path.display(), e);
            }
        }
        library
    }

    /// Render a template, substituting `{key}` placeholders. Unknown
    /// placeholders are left verbatim; unknown template names yield `None`.
    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> Option<String> {
        let template = self.templates.get(name)?;
        let mut rendered = template.clone();
        for (key, value) in vars {
            rendered = rendered.replace(&format!("{{{}}}", key), value);
        }
        Some(rendered)
    }

    /// Render and append the operator's extra instructions, if any.
    pub fn render_with_user_prompt(
        &self,
        name: &str,
        vars: &[(&str, &str)],
        user_prompt: &str,
    ) -> Option<String> {
        let base = self.render(name, vars)?;
        let trimmed = user_prompt.trim();
        if trimmed.is_empty() {
            Some(base)
        } else {
            Some(format!("{}\n\nAdditional instructions:\n{}", base, trimmed))
        }
    }
}

/// Prefix a prompt with an explicit pure-JSON demand. Used when a JSON
/// response could not be parsed and the request is re-issued.
pub fn pure_json_amendment(prompt: &str) -> String {
    format!(
        "Regenerate the previous answer strictly as JSON. Return pure JSON only, \
         with no explanations, comments, or code fences:\n\n{}",
        prompt
    )
}

fn builtin_templates() -> HashMap<String, String> {
    let mut templates = HashMap::new();

    templates.insert(
        THEME_PARAGRAPH.to_string(),
        "Expand the following one-line novel theme into a concrete paragraph-length \
         premise of roughly 200 words, rich in plot potential. Output the paragraph \
         only, with no headings or commentary.\n\nOne-line theme: {one_line_theme}\n\
         Genre: {genre}\nStory canon:\n{canon}"
            .to_string(),
    );

    templates.insert(
        THEME_VARIANTS.to_string(),
        "Write three distinct paragraph-length story premises (about 200 words each) \
         for the theme below, separated by blank lines. After the three paragraphs, \
         append a JSON object of the form \
         {\"variants\": [{\"label\": \"...\", \"angle\": \"...\"}, ...]} with one \
         entry per premise, in order.\n\nOne-line theme: {one_line_theme}\n\
         Genre: {genre}\nIntent: {intent}"
            .to_string(),
    );

    templates.insert(
        CANON_BIBLE.to_string(),
        "Create a creative canon for the story below: register and rhythm of the \
         prose, point-of-view rules, thematic thesis/antithesis/synthesis, world \
         constraints, and style dos and don'ts. Respond with valid JSON only, in \
         the form {\"tone\": {\"register\": \"...\", \"rhythm\": \"...\"}, \
         \"pov_rules\": {\"default\": \"...\", \"allowed\": [\"...\"]}, \
         \"theme\": {\"thesis\": \"...\", \"antithesis\": \"...\", \
         \"synthesis\": \"...\"}, \"world\": {\"time_place\": \"...\", \
         \"constraints\": [\"...\"]}, \"style_do\": [\"...\"], \
         \"style_dont\": [\"...\"]}.\n\nOne-line theme: {one_line_theme}\n\
         Genre: {genre}\nAudience and tone: {audience_and_tone}"
            .to_string(),
    );

    templates.insert(
        STORY_OUTLINE.to_string(),
        "Create a detailed story outline (800-1200 words) from the material below, \
         covering the setting, the main plot threads, the key turning points, the \
         central conflict and climax, and the direction of the ending. Output the \
         outline only, with no headings or commentary.\n\n\
         One-line theme: {one_line_theme}\n\nPremise:\n{theme_paragraph}\n\n\
         Story canon:\n{canon}"
            .to_string(),
    );

    templates.insert(
        CHAPTER_OUTLINE.to_string(),
        "Break the story below into 5-10 chapters. Respond with valid JSON only, in \
         the form {\"chapters\": [{\"title\": \"...\", \"outline\": \"...\"}]}, \
         where each outline runs 150-200 words.\n\nTheme: {one_line_theme}\n\n\
         Story outline:\n{story_outline}\n\nStory canon:\n{canon}"
            .to_string(),
    );

    templates.insert(
        CHAPTER_SUMMARY.to_string(),
        "Write a detailed summary (300-500 words) for chapter {chapter_num}, covering \
         scene setting, the principal characters and their actions, key plot \
         developments, dialogue beats, emotional register, and how the chapter \
         connects to the whole. Output the summary only.\n\n{context_info}\n\n\
         Chapter title: {title}\nChapter outline: {outline}\n\nStory canon:\n{canon}"
            .to_string(),
    );

    templates.insert(
        NOVEL_CHAPTER.to_string(),
        "Write the full prose for chapter {chapter_num} (2000-4000 words): vivid \
         scene work, dialogue and interiority, controlled pacing, and natural \
         continuity with the surrounding chapters. Output the prose only, without \
         the chapter title or commentary.\n\n{context_info}\n\nChapter title: {title}\n\
         Chapter outline: {outline}\n\nChapter summary:\n{summary}\n\n\
         Story canon:\n{canon}"
            .to_string(),
    );

    templates.insert(
        NOVEL_CRITIQUE.to_string(),
        "Critique the chapter below. Respond with valid JSON only, in the form \
         {\"issues\": [{\"category\": \"character|plot|language|experience\", \
         \"problem\": \"...\", \"suggestion\": \"...\"}], \"strengths\": [\"...\"], \
         \"priority_fixes\": [\"...\"]}. Keep the whole critique under 300 words.\n\n\
         Chapter {chapter_num}: {title}\n\n{content}"
            .to_string(),
    );

    templates.insert(
        NOVEL_REFINEMENT.to_string(),
        "Revise chapter {chapter_num} (\"{title}\") according to the critique below. \
         Fix the criticized problems while preserving the noted strengths; keep the \
         revision within 2000-4000 words. Output the complete revised prose only.\n\n\
         Original prose:\n{content}\n\nCritique:\n{critique}\n\n{context_info}"
            .to_string(),
    );

    templates
}
