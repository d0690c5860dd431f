//! Instrumentation hook.
//!
//! A [`PipelineObserver`] sees every event, state change, effect, lifecycle
//! transition and reported failure of one pipeline. Callbacks run inline on
//! the pipeline's tasks, so they must be cheap and must not block. A panic
//! inside a callback is caught and logged; it never reaches the pipeline.

use crate::error::{ErrorContext, PipelineError};
use std::fmt::Debug;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Optional callbacks fired by a pipeline. Every method defaults to a no-op.
#[allow(unused_variables)]
pub trait PipelineObserver<E, S, F>: Send + Sync {
    /// An event was taken from the ingress and is about to be processed.
    fn on_event(&self, pipeline: &str, event: &E) {}

    /// The state changed to a new, distinct value.
    fn on_state_updated(&self, pipeline: &str, state: &S) {}

    /// An effect was emitted.
    fn on_effect(&self, pipeline: &str, effect: &F) {}

    /// The pipeline became active.
    fn on_pipeline_started(&self, pipeline: &str) {}

    /// The pipeline was torn down after its grace period.
    fn on_pipeline_stopped(&self, pipeline: &str) {}

    /// A handler or adapter failed. The pipeline keeps running.
    fn on_error(&self, pipeline: &str, error: &PipelineError, context: &ErrorContext) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl<E, S, F> PipelineObserver<E, S, F> for NoopObserver {}

/// Observer that turns every callback into a structured `tracing` event.
///
/// Events, state and effects are logged at `TRACE`/`DEBUG` with their `Debug`
/// rendering; lifecycle transitions at `INFO`; failures at `ERROR`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl<E, S, F> PipelineObserver<E, S, F> for TracingObserver
where
    E: Debug,
    S: Debug,
    F: Debug,
{
    fn on_event(&self, pipeline: &str, event: &E) {
        tracing::trace!(pipeline, ?event, "Event received");
    }

    fn on_state_updated(&self, pipeline: &str, state: &S) {
        tracing::debug!(pipeline, ?state, "State updated");
    }

    fn on_effect(&self, pipeline: &str, effect: &F) {
        tracing::debug!(pipeline, ?effect, "Effect emitted");
    }

    fn on_pipeline_started(&self, pipeline: &str) {
        tracing::info!(pipeline, "Pipeline started");
    }

    fn on_pipeline_stopped(&self, pipeline: &str) {
        tracing::info!(pipeline, "Pipeline stopped");
    }

    fn on_error(&self, pipeline: &str, error: &PipelineError, context: &ErrorContext) {
        tracing::error!(pipeline, %context, error = %error, "Pipeline failure");
    }
}

/// Run an observer callback, swallowing any panic it raises.
pub fn invoke_hook<F>(hook: F)
where
    F: FnOnce(),
{
    if catch_unwind(AssertUnwindSafe(hook)).is_err() {
        tracing::warn!("Pipeline observer panicked, ignoring");
    }
}
