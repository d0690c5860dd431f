//! The per-activation event loop.
//!
//! One [`EventProcessor`] runs for each activation of a pipeline. It takes
//! exclusive hold of the ingress, then pulls events and handles each one in
//! its own task, so a slow event never blocks the ones behind it. At most
//! `max_concurrency` events are in flight; beyond that the loop stops pulling
//! and events wait in the ingress.
//!
//! Completion order is not submission order: handlers finish whenever their
//! own work finishes.

use crate::metrics::EventMetrics;
use crate::plugin::PluginRegistrar;
use statepipe_core::observer::invoke_hook;
use statepipe_core::{ContextOf, ErrorContext, EventIngress, PipelineError, Processor};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::task::{JoinError, JoinSet};

/// Guard that decrements an `AtomicUsize` on drop
struct AtomicCounterGuard(Arc<AtomicUsize>);

impl Drop for AtomicCounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct EventProcessor<P: Processor> {
    processor: Arc<P>,
    ctx: ContextOf<P>,
    ingress: EventIngress<P::Event>,
    plugins: Arc<PluginRegistrar<P::Event, P::State, P::Effect>>,
    max_concurrency: usize,
    in_flight: Arc<AtomicUsize>,
}

impl<P: Processor> EventProcessor<P> {
    pub(crate) fn new(
        processor: Arc<P>,
        ctx: ContextOf<P>,
        ingress: EventIngress<P::Event>,
        plugins: Arc<PluginRegistrar<P::Event, P::State, P::Effect>>,
        max_concurrency: usize,
        in_flight: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            processor,
            ctx,
            ingress,
            plugins,
            max_concurrency: max_concurrency.max(1),
            in_flight,
        }
    }

    /// Run until the activation scope is cancelled.
    ///
    /// In-flight handlers are aborted when the loop exits; events still in
    /// the ingress stay there for the next activation.
    pub(crate) async fn run(self) {
        let scope = self.ctx.scope().clone();

        // A previous activation's loop may still be winding down
        let mut drain = tokio::select! {
            biased;
            () = scope.cancelled() => return,
            drain = self.ingress.drain() => drain,
        };

        tracing::debug!(
            queued = self.ingress.queued(),
            max_concurrency = self.max_concurrency,
            "Event processor started"
        );

        let mut tasks = JoinSet::new();
        loop {
            let saturated = tasks.len() >= self.max_concurrency;
            tokio::select! {
                biased;
                () = scope.cancelled() => break,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => self.reap(joined),
                event = drain.recv(), if !saturated => match event {
                    Some(event) => self.dispatch(&mut tasks, event),
                    None => break,
                },
            }
        }

        let aborted = tasks.len();
        tasks.abort_all();
        tracing::debug!(aborted, "Event processor stopped");
    }

    fn dispatch(&self, tasks: &mut JoinSet<()>, event: P::Event) {
        invoke_hook(|| self.ctx.observer().on_event(self.ctx.pipeline_name(), &event));
        self.plugins.offer_event(&event);

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let in_flight = AtomicCounterGuard(Arc::clone(&self.in_flight));
        let processor = Arc::clone(&self.processor);
        let ctx = self.ctx.clone();

        tasks.spawn(async move {
            let _in_flight = in_flight;
            let start = Instant::now();
            let outcome = AssertUnwindSafe(processor.process(&ctx, event))
                .catch_unwind()
                .await;

            if ctx.report_outcome(outcome, &ErrorContext::Process) {
                EventMetrics::record_processed(ctx.pipeline_name(), start.elapsed());
            } else if !ctx.is_cancelled() {
                EventMetrics::record_failure(ctx.pipeline_name());
            }
        });
    }

    fn reap(&self, joined: Result<(), JoinError>) {
        // Handlers run under catch_unwind; only the wrapper itself can fail here
        if let Some(error) = joined.err().and_then(join_failure) {
            self.ctx.report_error(&error, &ErrorContext::Process);
        }
    }
}

/// Classify a failed event task. Aborted tasks are not failures.
fn join_failure(error: JoinError) -> Option<PipelineError> {
    if error.is_cancelled() {
        None
    } else if error.is_panic() {
        Some(PipelineError::from_panic(&*error.into_panic()))
    } else {
        Some(PipelineError::Offload(error))
    }
}
