//! The pipeline: ingress, processor, state, effects and lifecycle in one handle.

use crate::config::PipelineConfig;
use crate::health::{HealthCheck, HealthReport};
use crate::lifecycle::{LifecycleHooks, LifecycleManager, LifecyclePhase};
use crate::metrics::EffectMetrics;
use crate::plugin::{PluginRegistrar, PluginRegistration};
use crate::processor::EventProcessor;
use crate::stream::{EffectStream, StateStream};
use futures::FutureExt;
use statepipe_core::observer::invoke_hook;
use statepipe_core::{
    ContextOf, EffectQueue, ErrorContext, EventIngress, NoopObserver, PipelineError, PipelineId,
    PipelineObserver, Processor, ResultContext, StateCell,
};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

type ObserverOf<P> = Arc<
    dyn PipelineObserver<<P as Processor>::Event, <P as Processor>::State, <P as Processor>::Effect>,
>;

/// A reactive event-processing pipeline.
///
/// Cloning is cheap; every clone is a handle to the same pipeline.
///
/// A pipeline is dormant until something subscribes to its state or effects.
/// The first subscriber starts the processor and runs
/// [`Processor::on_subscribed`]; when the last one leaves, the pipeline
/// stays up for the configured grace period and then tears down. Events
/// submitted while dormant are kept and processed on the next activation.
///
/// # Example
///
/// ```ignore
/// let pipeline = Pipeline::builder(CounterProcessor, || 0)
///     .with_name("counter")
///     .build()?;
///
/// let mut state = pipeline.state();
/// assert_eq!(state.next().await, Some(0));
///
/// pipeline.submit(CounterEvent::Increment);
/// assert_eq!(state.next().await, Some(1));
/// ```
pub struct Pipeline<P: Processor> {
    inner: Arc<PipelineInner<P>>,
}

impl<P: Processor> Clone for Pipeline<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Processor> std::fmt::Debug for Pipeline<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("phase", &self.inner.lifecycle.phase())
            .finish_non_exhaustive()
    }
}

struct PipelineInner<P: Processor> {
    id: PipelineId,
    name: Arc<str>,
    processor: Arc<P>,
    state: StateCell<P::State>,
    effects: EffectQueue<P::Effect>,
    ingress: EventIngress<P::Event>,
    observer: ObserverOf<P>,
    config: PipelineConfig,
    runtime: Handle,
    lifecycle: Arc<LifecycleManager>,
    plugins: Arc<PluginRegistrar<P::Event, P::State, P::Effect>>,
    /// Scope of the current activation
    scope: Mutex<Option<CancellationToken>>,
    in_flight: Arc<AtomicUsize>,
}

impl<P: Processor> PipelineInner<P> {
    fn context(&self, scope: CancellationToken) -> ContextOf<P> {
        ResultContext::new(
            Arc::clone(&self.name),
            self.state.clone(),
            self.effects.clone(),
            self.ingress.clone(),
            Arc::clone(&self.observer),
            scope,
        )
    }

    fn spawn_on_subscribed(&self, ctx: ContextOf<P>) {
        let processor = Arc::clone(&self.processor);
        self.runtime.spawn(async move {
            tokio::select! {
                biased;
                () = ctx.cancelled() => {},
                outcome = AssertUnwindSafe(processor.on_subscribed(&ctx)).catch_unwind() => {
                    ctx.report_outcome(outcome, &ErrorContext::OnSubscribed);
                },
            }
        });
    }
}

impl<P: Processor> LifecycleHooks for PipelineInner<P> {
    fn activate(&self) {
        let scope = CancellationToken::new();
        let stale = self
            .scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(scope.clone());
        if let Some(stale) = stale {
            stale.cancel();
        }

        let ctx = self.context(scope);
        self.plugins.activate(&ctx, &self.runtime);

        let processor = EventProcessor::new(
            Arc::clone(&self.processor),
            ctx.clone(),
            self.ingress.clone(),
            Arc::clone(&self.plugins),
            self.config.max_concurrency,
            Arc::clone(&self.in_flight),
        );
        let span = tracing::info_span!("event_processor", pipeline = %self.name);
        self.runtime.spawn(processor.run().instrument(span));

        self.spawn_on_subscribed(ctx);
        invoke_hook(|| self.observer.on_pipeline_started(&self.name));
    }

    fn deactivate(&self) {
        let scope = self
            .scope
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(scope) = scope {
            scope.cancel();
        }

        self.plugins.deactivate();

        let discarded = self.effects.discard_buffered();
        if discarded > 0 {
            tracing::debug!(pipeline = %self.name, discarded, "Discarded undelivered effects at teardown");
            EffectMetrics::record_discarded(&self.name, discarded);
        }

        invoke_hook(|| self.observer.on_pipeline_stopped(&self.name));
    }
}

impl<P: Processor> Drop for PipelineInner<P> {
    fn drop(&mut self) {
        let scope = self
            .scope
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(scope) = scope {
            scope.cancel();
        }
    }
}

impl<P: Processor> Pipeline<P> {
    /// Start building a pipeline around `processor`.
    ///
    /// `initial_state` is called once, at build time.
    pub fn builder<I>(processor: P, initial_state: I) -> PipelineBuilder<P>
    where
        I: FnOnce() -> P::State + Send + 'static,
    {
        PipelineBuilder {
            processor,
            initial_state: Box::new(initial_state),
            config: PipelineConfig::default(),
            observer: None,
            runtime: None,
            name: None,
        }
    }

    /// Build a pipeline with default configuration on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoRuntime`] outside a Tokio runtime.
    pub fn new<I>(processor: P, initial_state: I) -> Result<Self, PipelineError>
    where
        I: FnOnce() -> P::State + Send + 'static,
    {
        Self::builder(processor, initial_state).build()
    }

    /// Queue an event. Never blocks and never fails.
    ///
    /// Events submitted while the pipeline is dormant are processed after the
    /// next activation.
    pub fn submit(&self, event: P::Event) {
        self.inner.ingress.submit(event);
        tracing::trace!(pipeline = %self.inner.name, queued = self.inner.ingress.queued(), "Event submitted");
    }

    /// Subscribe to the state.
    ///
    /// The returned stream starts with the current state and counts as a
    /// subscriber until dropped.
    #[must_use]
    pub fn state(&self) -> StateStream<P::State> {
        let guard = self.inner.lifecycle.acquire();
        StateStream::new(self.inner.state.watch(), guard)
    }

    /// Subscribe to effects.
    ///
    /// Effects are not replayed: each is delivered to exactly one effect
    /// subscriber, buffered ones first.
    #[must_use]
    pub fn effects(&self) -> EffectStream<P::Effect> {
        let guard = self.inner.lifecycle.acquire();
        EffectStream::new(self.inner.effects.receiver(), guard)
    }

    /// Snapshot of the current state without subscribing.
    #[must_use]
    pub fn current_state(&self) -> P::State {
        self.inner.state.current()
    }

    /// Register a plugin pipeline.
    ///
    /// If this pipeline is active the plugin is wired immediately; otherwise
    /// on the next activation. Registering the same plugin again replaces
    /// the previous registration.
    #[tracing::instrument(skip_all, fields(pipeline = %self.inner.name))]
    pub fn register<C>(
        &self,
        registration: PluginRegistration<P::Event, P::State, P::Effect, C>,
    ) -> PipelineId
    where
        C: Processor,
    {
        let plugin_name = registration.plugin().name().to_string();
        let plugin_id = self.inner.plugins.register(registration);
        tracing::info!(plugin = %plugin_name, "Plugin registered");
        plugin_id
    }

    /// Unregister a plugin. Returns `false` if it was not registered.
    #[tracing::instrument(skip(self), fields(pipeline = %self.inner.name))]
    pub fn unregister(&self, plugin: PipelineId) -> bool {
        let removed = self.inner.plugins.unregister(plugin);
        if removed {
            tracing::info!("Plugin unregistered");
        }
        removed
    }

    /// Ids of the registered plugins, in registration order.
    #[must_use]
    pub fn plugins(&self) -> Vec<PipelineId> {
        self.inner.plugins.plugin_ids()
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> LifecyclePhase {
        self.inner.lifecycle.phase()
    }

    /// Live state and effect subscribers, plugin wiring included.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.lifecycle.subscriber_count()
    }

    /// Events submitted but not yet taken by the processor.
    #[must_use]
    pub fn queued_events(&self) -> usize {
        self.inner.ingress.queued()
    }

    /// Events whose handler is currently running.
    #[must_use]
    pub fn in_flight_events(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Process-unique id.
    #[must_use]
    pub fn id(&self) -> PipelineId {
        self.inner.id
    }

    /// Name used in logs, metrics and observer callbacks.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Health of this pipeline alone.
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        HealthCheck::for_effect_buffer(
            self.name(),
            self.inner.effects.buffered(),
            self.inner.effects.capacity(),
        )
        .with_metadata("phase", self.phase().to_string())
        .with_metadata("subscribers", self.subscriber_count().to_string())
        .with_metadata("queued_events", self.queued_events().to_string())
        .with_metadata("in_flight_events", self.in_flight_events().to_string())
    }

    /// Health of this pipeline and every registered plugin.
    #[must_use]
    pub fn health_report(&self) -> HealthReport {
        let mut checks = vec![self.health()];
        checks.extend(self.inner.plugins.health());
        HealthReport::new(checks)
    }
}

/// Builder for [`Pipeline`].
#[must_use = "a builder does nothing until build() is called"]
pub struct PipelineBuilder<P: Processor> {
    processor: P,
    initial_state: Box<dyn FnOnce() -> P::State + Send>,
    config: PipelineConfig,
    observer: Option<ObserverOf<P>>,
    runtime: Option<Handle>,
    name: Option<String>,
}

impl<P: Processor> PipelineBuilder<P> {
    /// Replace the whole configuration.
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach an instrumentation hook.
    pub fn with_observer(mut self, observer: ObserverOf<P>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Run on `runtime` instead of the runtime current at build time.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Name for logs and metrics. Defaults to the pipeline id.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Build the pipeline. It starts dormant.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::InvalidConfig`] if the configuration is unusable.
    /// - [`PipelineError::NoRuntime`] if no runtime was given and none is current.
    pub fn build(self) -> Result<Pipeline<P>, PipelineError> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| PipelineError::NoRuntime)?,
        };

        let id = PipelineId::next();
        let name: Arc<str> = Arc::from(self.name.unwrap_or_else(|| id.to_string()));
        let observer = self.observer.unwrap_or_else(|| Arc::new(NoopObserver));
        let state = StateCell::new((self.initial_state)());
        let effects = EffectQueue::bounded(self.config.effect_buffer);
        let config = self.config;
        let processor = Arc::new(self.processor);

        let inner = Arc::new_cyclic(|weak: &Weak<PipelineInner<P>>| {
            let hooks: Weak<dyn LifecycleHooks> = weak.clone();
            PipelineInner {
                id,
                lifecycle: Arc::new(LifecycleManager::new(
                    Arc::clone(&name),
                    config.grace_period,
                    runtime.clone(),
                    hooks,
                )),
                name,
                processor,
                state,
                effects,
                ingress: EventIngress::new(),
                observer,
                config,
                runtime,
                plugins: Arc::new(PluginRegistrar::new()),
                scope: Mutex::new(None),
                in_flight: Arc::new(AtomicUsize::new(0)),
            }
        });

        tracing::debug!(pipeline = %inner.name, id = %inner.id, "Pipeline built");
        Ok(Pipeline { inner })
    }
}
