//! The capability object handed to processor hooks.
//!
//! A [`ResultContext`] is the only way a handler touches its pipeline: it
//! updates state, emits effects, pushes follow-up events, hands blocking work
//! to the blocking pool and starts background tasks. Every context is tied to
//! one activation scope; when the pipeline is torn down the scope is
//! cancelled and everything started through the context stops with it.

use crate::effect::EffectQueue;
use crate::error::{ErrorContext, PipelineError};
use crate::ingress::EventIngress;
use crate::observer::{PipelineObserver, invoke_hook};
use crate::state::StateCell;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Handle given to `Processor::process` and `Processor::on_subscribed`.
pub struct ResultContext<E, S, F> {
    name: Arc<str>,
    state: StateCell<S>,
    effects: EffectQueue<F>,
    ingress: EventIngress<E>,
    observer: Arc<dyn PipelineObserver<E, S, F>>,
    scope: CancellationToken,
}

impl<E, S, F> Clone for ResultContext<E, S, F> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            state: self.state.clone(),
            effects: self.effects.clone(),
            ingress: self.ingress.clone(),
            observer: Arc::clone(&self.observer),
            scope: self.scope.clone(),
        }
    }
}

impl<E, S, F> std::fmt::Debug for ResultContext<E, S, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultContext")
            .field("pipeline", &self.name)
            .field("cancelled", &self.scope.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl<E, S, F> ResultContext<E, S, F>
where
    E: Send + 'static,
    S: Clone + PartialEq + Send + Sync + 'static,
    F: Send + 'static,
{
    /// Assemble a context from a pipeline's parts and an activation scope.
    #[must_use]
    pub fn new(
        name: Arc<str>,
        state: StateCell<S>,
        effects: EffectQueue<F>,
        ingress: EventIngress<E>,
        observer: Arc<dyn PipelineObserver<E, S, F>>,
        scope: CancellationToken,
    ) -> Self {
        Self {
            name,
            state,
            effects,
            ingress,
            observer,
            scope,
        }
    }

    /// Same pipeline, different scope.
    #[must_use]
    pub fn with_scope(&self, scope: CancellationToken) -> Self {
        Self {
            scope,
            ..self.clone()
        }
    }

    /// Name of the owning pipeline.
    #[must_use]
    pub fn pipeline_name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn current_state(&self) -> S {
        self.state.current()
    }

    /// Atomically replace the state with `f(current)`.
    ///
    /// Returns the value this call stored, or `None` if it equalled the
    /// current one; then nothing is stored and readers are not woken.
    pub fn update_state<U>(&self, f: U) -> Option<S>
    where
        U: FnOnce(&S) -> S,
    {
        let updated = self.state.update(f)?;
        invoke_hook(|| self.observer.on_state_updated(&self.name, &updated));
        Some(updated)
    }

    /// Emit a one-shot effect.
    ///
    /// Waits only if the effect buffer is full and nobody is receiving.
    pub async fn emit_effect(&self, effect: F) {
        invoke_hook(|| self.observer.on_effect(&self.name, &effect));
        self.effects.send(effect).await;
    }

    /// Submit a follow-up event into this pipeline's own ingress.
    pub fn submit(&self, event: E) {
        self.ingress.submit(event);
    }

    /// Run blocking or expensive work on the blocking pool.
    ///
    /// The caller's task resumes with the result; plain state updates never
    /// leave the caller's task.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Cancelled`] if the pipeline scope ends first.
    /// - [`PipelineError::Offload`] if `work` panics.
    pub async fn offload<T, W>(&self, work: W) -> Result<T, PipelineError>
    where
        W: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let handle = tokio::task::spawn_blocking(work);
        tokio::select! {
            biased;
            () = self.scope.cancelled() => Err(PipelineError::Cancelled),
            joined = handle => joined.map_err(PipelineError::Offload),
        }
    }

    /// Start background work bound to the current activation.
    ///
    /// The task is cancelled when the pipeline is torn down. Errors and
    /// panics are reported with [`ErrorContext::Background`].
    pub fn launch<W>(&self, work: W)
    where
        W: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let ctx = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = ctx.scope.cancelled() => {
                    tracing::trace!(pipeline = %ctx.name, "Background task cancelled");
                },
                outcome = AssertUnwindSafe(work).catch_unwind() => {
                    ctx.report_outcome(outcome, &ErrorContext::Background);
                },
            }
        });
    }

    /// Whether the activation this context belongs to has ended.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.scope.is_cancelled()
    }

    /// Resolves when the activation this context belongs to ends.
    pub async fn cancelled(&self) {
        self.scope.cancelled().await;
    }

    /// The activation scope token.
    #[must_use]
    pub const fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    /// Report a failure to the instrumentation hook.
    ///
    /// Cancellation is logged at `TRACE` and otherwise ignored.
    pub fn report_error(&self, error: &PipelineError, context: &ErrorContext) {
        if error.is_cancelled() {
            tracing::trace!(pipeline = %self.name, %context, "Cancelled, not reported");
            return;
        }
        tracing::warn!(pipeline = %self.name, %context, error = %error, "Pipeline handler failed");
        invoke_hook(|| self.observer.on_error(&self.name, error, context));
    }

    /// Classify and report the outcome of a guarded handler call.
    ///
    /// Returns `true` when the handler succeeded.
    pub fn report_outcome(
        &self,
        outcome: Result<anyhow::Result<()>, Box<dyn std::any::Any + Send>>,
        context: &ErrorContext,
    ) -> bool {
        match outcome {
            Ok(Ok(())) => true,
            Ok(Err(error)) => {
                self.report_error(&PipelineError::from_handler(error), context);
                false
            },
            Err(payload) => {
                self.report_error(&PipelineError::from_panic(payload.as_ref()), context);
                false
            },
        }
    }

    /// The instrumentation hook of the owning pipeline.
    #[must_use]
    pub fn observer(&self) -> &Arc<dyn PipelineObserver<E, S, F>> {
        &self.observer
    }
}
