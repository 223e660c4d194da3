//! Concurrent batch orchestration over independent chapter units.
//!
//! Each unit runs as its own task; one unit failing (or panicking) never
//! cancels its siblings. The aggregate keeps successes and failures
//! strictly disjoint so a caller can re-run exactly the failed subset.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;

use super::{word_count, ChapterEntry, ChapterUnit, GenerationService, StageContext, SummaryEntry};

/// Aggregated outcome of one batch run.
///
/// Every dispatched unit lands in exactly one of the two sides: its
/// chapter key in `results`, or its chapter number in `failed`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult<T> {
    pub results: BTreeMap<String, T>,
    pub failed: Vec<u32>,
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        Self {
            results: BTreeMap::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> BatchResult<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, key: String, value: T) {
        self.results.insert(key, value);
    }

    pub fn record_failure(&mut self, number: u32) {
        self.failed.push(number);
    }

    /// True when every dispatched unit succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GenerationService {
    /// Generate summaries for a set of chapters concurrently.
    pub async fn generate_batch_summaries(
        self: &Arc<Self>,
        units: &[ChapterUnit],
        ctx: &StageContext,
    ) -> BatchResult<SummaryEntry> {
        let ctx = ctx.clone();
        self.run_batch("summaries", units, move |svc, unit| {
            let ctx = ctx.clone();
            async move {
                let summary = svc.generate_summary(&unit, &ctx).await?;
                Some(SummaryEntry {
                    title: unit.title.clone(),
                    summary,
                })
            }
        })
        .await
    }

    /// Generate prose for a set of chapters concurrently, each through the
    /// full draft-critique-refine pipeline. `summaries` is keyed by
    /// chapter key; a unit with no summary drafts from its outline alone.
    pub async fn generate_batch_chapters_with_refinement(
        self: &Arc<Self>,
        units: &[ChapterUnit],
        summaries: &HashMap<String, String>,
        ctx: &StageContext,
    ) -> BatchResult<ChapterEntry> {
        let ctx = ctx.clone();
        let summaries = summaries.clone();
        self.run_batch("chapters", units, move |svc, unit| {
            let ctx = ctx.clone();
            let summary = summaries.get(&unit.key()).cloned().unwrap_or_default();
            async move {
                let content = svc
                    .generate_chapter_with_refinement(&unit, &summary, &ctx)
                    .await?;
                Some(ChapterEntry {
                    title: unit.title.clone(),
                    word_count: word_count(&content),
                    content,
                })
            }
        })
        .await
    }

    /// Fan `units` out as concurrent tasks and aggregate their outcomes.
    ///
    /// A task that returns `None` or panics records its unit as failed;
    /// the remaining units keep running.
    async fn run_batch<T, F, Fut>(
        self: &Arc<Self>,
        stage: &str,
        units: &[ChapterUnit],
        run_unit: F,
    ) -> BatchResult<T>
    where
        T: Send + 'static,
        F: Fn(Arc<Self>, ChapterUnit) -> Fut,
        Fut: Future<Output = Option<T>> + Send + 'static,
    {
        let mut batch = BatchResult::new();
        if units.is_empty() {
            return batch;
        }

        self.progress()
            .notify(&format!("[{}] dispatching {} units", stage, units.len()));

        let mut set = JoinSet::new();
        let mut numbers: HashMap<tokio::task::Id, u32> = HashMap::new();
        for unit in units {
            let key = unit.key();
            let number = unit.number;
            let fut = run_unit(Arc::clone(self), unit.clone());
            let handle = set.spawn(async move { (key, number, fut.await) });
            numbers.insert(handle.id(), number);
        }

        while let Some(joined) = set.join_next_with_id().await {
            match joined {
                Ok((_id, (key, _number, Some(value)))) => batch.record_success(key, value),
                Ok((_id, (_key, number, None))) => batch.record_failure(number),
                Err(e) => {
                    tracing::error!("[{}] batch worker crashed: {}", stage, e);
                    if let Some(number) = numbers.get(&e.id()) {
                        batch.record_failure(*number);
                    }
                }
            }
        }
        batch.failed.sort_unstable();

        self.progress().notify(&format!(
            "[{}] batch finished: {} succeeded, {} failed",
            stage,
            batch.results.len(),
            batch.failed.len()
        ));
        batch
    }
}
