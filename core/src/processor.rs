//! The user-supplied business logic of a pipeline.

use crate::context::ResultContext;
use std::future::Future;

/// Context type handed to a [`Processor`]'s hooks.
pub type ContextOf<P> =
    ResultContext<<P as Processor>::Event, <P as Processor>::State, <P as Processor>::Effect>;

/// Business logic of one pipeline.
///
/// `process` runs once per submitted event, possibly concurrently with other
/// events of the same pipeline. It reports its outcome only through the
/// context (state updates and effects); a returned error or a panic is
/// caught, reported to the instrumentation hook, and leaves the pipeline
/// running.
///
/// # Example
///
/// ```
/// use statepipe_core::processor::{ContextOf, Processor};
///
/// #[derive(Debug)]
/// enum CounterEvent {
///     Increment,
/// }
///
/// #[derive(Debug)]
/// enum CounterEffect {
///     Announce(u32),
/// }
///
/// struct Counter;
///
/// impl Processor for Counter {
///     type Event = CounterEvent;
///     type State = u32;
///     type Effect = CounterEffect;
///
///     async fn process(&self, ctx: &ContextOf<Self>, event: CounterEvent) -> anyhow::Result<()> {
///         match event {
///             CounterEvent::Increment => {
///                 ctx.update_state(|n| n + 1);
///                 ctx.emit_effect(CounterEffect::Announce(ctx.current_state())).await;
///             },
///         }
///         Ok(())
///     }
/// }
/// ```
pub trait Processor: Send + Sync + 'static {
    /// Inputs to the pipeline
    type Event: Send + 'static;

    /// The single observable value; compared structurally for deduplication
    type State: Clone + PartialEq + Send + Sync + 'static;

    /// One-shot outputs
    type Effect: Send + 'static;

    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Any error is reported with `ErrorContext::Process`; the event then
    /// has no further consequence.
    fn process(
        &self,
        ctx: &ContextOf<Self>,
        event: Self::Event,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Runs every time the pipeline becomes active (first subscriber after
    /// dormancy). Work started here with `ctx.launch` lives until teardown.
    ///
    /// # Errors
    ///
    /// Any error is reported with `ErrorContext::OnSubscribed`.
    fn on_subscribed(&self, ctx: &ContextOf<Self>) -> impl Future<Output = anyhow::Result<()>> + Send {
        let _ = ctx;
        async { Ok(()) }
    }
}
