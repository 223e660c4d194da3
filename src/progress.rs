//! Progress notification and operator confirmation capabilities.
//!
//! The batch paths run many chapters concurrently, so step-level progress
//! is reported through an explicit sink threaded down every layer instead
//! of optional callbacks. The default sink is a no-op; interactive callers
//! install their own.

use std::sync::Arc;
use std::sync::Mutex;

/// Fire-and-forget progress reporting.
///
/// Implementations must be infallible and cheap; they are called from
/// inside retry loops and between pipeline steps.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, message: &str);
}

/// Sink that discards all messages.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn notify(&self, _message: &str) {}
}

/// Sink that forwards messages to the tracing subscriber at info level.
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn notify(&self, message: &str) {
        tracing::info!("{}", message);
    }
}

/// Sink that collects messages in memory. Used by tests and by UIs that
/// render progress after the fact.
#[derive(Default)]
pub struct CollectingProgress {
    messages: Mutex<Vec<String>>,
}

impl CollectingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("progress lock poisoned").clone()
    }
}

impl ProgressSink for CollectingProgress {
    fn notify(&self, message: &str) {
        self.messages
            .lock()
            .expect("progress lock poisoned")
            .push(message.to_string());
    }
}

/// Shared progress sink handle.
pub type SharedProgress = Arc<dyn ProgressSink>;

/// Blocking operator confirmation, used only in manual refinement mode.
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Confirmation that always answers yes. The default for non-interactive use.
pub struct AlwaysConfirm;

impl Confirm for AlwaysConfirm {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

/// Confirmation that always answers no.
pub struct NeverConfirm;

impl Confirm for NeverConfirm {
    fn confirm(&self, _prompt: &str) -> bool {
        false
    }
}
