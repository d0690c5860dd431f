//! Plugin composition: child pipelines wired into a parent through adapters.
//!
//! A plugin is an ordinary [`Pipeline`] registered into a parent with up to
//! four adapter closures:
//!
//! | Adapter | Signature | Effect |
//! |---|---|---|
//! | event | `&ParentEvent -> Option<PluginEvent>` | parent events fan out to the plugin |
//! | state | `(&ParentState, &PluginState) -> ParentState` | plugin state folds into the parent |
//! | effect | `&PluginEffect -> Option<ParentEffect>` | plugin effects surface as parent effects |
//! | effect→event | `&PluginEffect -> Option<ParentEvent>` | plugin effects re-enter the parent as events |
//!
//! While the parent is active every registered plugin is attached: the parent
//! holds a subscription to the plugin's state and effects, which keeps the
//! plugin active too. Effects no adapter maps are dropped. Parent teardown
//! detaches everything; reactivation attaches again.
//!
//! The effect→event path can form a loop (a plugin effect triggers a parent
//! event that makes the same plugin emit again). Termination of such loops is
//! up to the caller; the runtime does not detect cycles.

use crate::health::HealthCheck;
use crate::metrics::AdapterMetrics;
use crate::pipeline::Pipeline;
use statepipe_core::observer::invoke_hook;
use statepipe_core::{
    AdapterKind, ErrorContext, PipelineError, PipelineId, Processor, ResultContext, panic_message,
};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Parent event → plugin event
pub type EventAdapter<E, PE> = Arc<dyn Fn(&E) -> Option<PE> + Send + Sync>;

/// (parent state, plugin state) → parent state
pub type StateAdapter<S, PS> = Arc<dyn Fn(&S, &PS) -> S + Send + Sync>;

/// Plugin effect → parent effect
pub type EffectAdapter<PF, F> = Arc<dyn Fn(&PF) -> Option<F> + Send + Sync>;

/// Plugin effect → parent event
pub type EffectToEventAdapter<PF, E> = Arc<dyn Fn(&PF) -> Option<E> + Send + Sync>;

type UnregisterHook = Arc<dyn Fn() + Send + Sync>;

/// A plugin pipeline together with its adapters.
///
/// # Example
///
/// ```ignore
/// let registration = PluginRegistration::new(toasts.clone())
///     .map_events(|event: &AppEvent| match event {
///         AppEvent::Saved => Some(ToastEvent::Show("Saved".into())),
///         _ => None,
///     })
///     .merge_state(|app: &AppState, toast: &ToastState| AppState {
///         toast: toast.visible.clone(),
///         ..app.clone()
///     })
///     .effects_to_events(|effect: &ToastEffect| match effect {
///         ToastEffect::Tapped => Some(AppEvent::OpenInbox),
///     });
///
/// app.register(registration);
/// ```
pub struct PluginRegistration<E, S, F, P>
where
    P: Processor,
{
    plugin: Pipeline<P>,
    event_adapter: Option<EventAdapter<E, P::Event>>,
    state_adapter: Option<StateAdapter<S, P::State>>,
    effect_adapter: Option<EffectAdapter<P::Effect, F>>,
    effect_to_event_adapter: Option<EffectToEventAdapter<P::Effect, E>>,
    on_unregister: Option<UnregisterHook>,
}

impl<E, S, F, P> PluginRegistration<E, S, F, P>
where
    P: Processor,
{
    /// Start a registration for `plugin` with no adapters.
    #[must_use]
    pub const fn new(plugin: Pipeline<P>) -> Self {
        Self {
            plugin,
            event_adapter: None,
            state_adapter: None,
            effect_adapter: None,
            effect_to_event_adapter: None,
            on_unregister: None,
        }
    }

    /// Offer every parent event to the plugin; `None` skips it.
    #[must_use]
    pub fn map_events<A>(mut self, adapter: A) -> Self
    where
        A: Fn(&E) -> Option<P::Event> + Send + Sync + 'static,
    {
        self.event_adapter = Some(Arc::new(adapter));
        self
    }

    /// Fold each new plugin state into the parent state.
    #[must_use]
    pub fn merge_state<A>(mut self, adapter: A) -> Self
    where
        A: Fn(&S, &P::State) -> S + Send + Sync + 'static,
    {
        self.state_adapter = Some(Arc::new(adapter));
        self
    }

    /// Forward plugin effects as parent effects; `None` drops them.
    #[must_use]
    pub fn map_effects<A>(mut self, adapter: A) -> Self
    where
        A: Fn(&P::Effect) -> Option<F> + Send + Sync + 'static,
    {
        self.effect_adapter = Some(Arc::new(adapter));
        self
    }

    /// Turn plugin effects into parent events; `None` drops them.
    #[must_use]
    pub fn effects_to_events<A>(mut self, adapter: A) -> Self
    where
        A: Fn(&P::Effect) -> Option<E> + Send + Sync + 'static,
    {
        self.effect_to_event_adapter = Some(Arc::new(adapter));
        self
    }

    /// Called whenever the plugin is unwired: explicit unregistration,
    /// replacement, or parent teardown.
    #[must_use]
    pub fn on_unregister<H>(mut self, hook: H) -> Self
    where
        H: Fn() + Send + Sync + 'static,
    {
        self.on_unregister = Some(Arc::new(hook));
        self
    }

    /// The plugin pipeline.
    #[must_use]
    pub const fn plugin(&self) -> &Pipeline<P> {
        &self.plugin
    }
}

/// Type-erased view of a registration, independent of the plugin's types.
pub(crate) trait PluginBinding<E, S, F>: Send + Sync {
    fn plugin_id(&self) -> PipelineId;

    /// Run the event adapter and submit the result to the plugin.
    fn offer_event(&self, event: &E, parent: &ResultContext<E, S, F>);

    /// Subscribe to the plugin and start forwarding into `parent`.
    fn attach(&self, parent: &ResultContext<E, S, F>, runtime: &Handle);

    /// Stop forwarding, release the plugin, fire the unregister hook.
    fn detach(&self);

    fn health(&self) -> HealthCheck;
}

struct Binding<E, S, F, P>
where
    P: Processor,
{
    registration: PluginRegistration<E, S, F, P>,
    attached: Mutex<Option<CancellationToken>>,
}

impl<E, S, F, P> Binding<E, S, F, P>
where
    E: Send + 'static,
    S: Clone + PartialEq + Send + Sync + 'static,
    F: Send + 'static,
    P: Processor,
{
    fn spawn_state_forwarding(&self, parent: ResultContext<E, S, F>, runtime: &Handle) {
        let plugin_id = self.registration.plugin.id();
        let adapter = self.registration.state_adapter.clone();
        let mut states = self.registration.plugin.state();

        runtime.spawn(async move {
            loop {
                let plugin_state = tokio::select! {
                    biased;
                    () = parent.cancelled() => break,
                    next = states.next() => match next {
                        Some(plugin_state) => plugin_state,
                        None => break,
                    },
                };
                if let Some(adapter) = &adapter {
                    fold_plugin_state(&parent, plugin_id, adapter, &plugin_state);
                }
            }
            tracing::trace!(pipeline = %parent.pipeline_name(), plugin = %plugin_id, "Plugin state forwarding stopped");
        });
    }

    fn spawn_effect_forwarding(&self, parent: ResultContext<E, S, F>, runtime: &Handle) {
        let effect_adapter = self.registration.effect_adapter.clone();
        let feedback_adapter = self.registration.effect_to_event_adapter.clone();
        let plugin_id = self.registration.plugin.id();
        let mut effects = self.registration.plugin.effects();

        runtime.spawn(async move {
            loop {
                let effect = tokio::select! {
                    biased;
                    () = parent.cancelled() => break,
                    next = effects.next() => match next {
                        Some(effect) => effect,
                        None => break,
                    },
                };
                // The plugin's effects are drained while attached; unmapped ones are dropped

                if let Some(adapter) = &effect_adapter {
                    let mapped = guard_adapter(&parent, plugin_id, AdapterKind::Effect, || adapter(&effect));
                    if let Some(mapped) = mapped.flatten() {
                        tokio::select! {
                            biased;
                            () = parent.cancelled() => break,
                            () = parent.emit_effect(mapped) => {},
                        }
                    }
                }

                if let Some(adapter) = &feedback_adapter {
                    let event = guard_adapter(&parent, plugin_id, AdapterKind::EffectToEvent, || adapter(&effect));
                    if let Some(event) = event.flatten() {
                        tracing::debug!(pipeline = %parent.pipeline_name(), plugin = %plugin_id, "Plugin effect fed back as parent event");
                        parent.submit(event);
                    }
                }
            }
            tracing::trace!(pipeline = %parent.pipeline_name(), plugin = %plugin_id, "Plugin effect forwarding stopped");
        });
    }
}

impl<E, S, F, P> PluginBinding<E, S, F> for Binding<E, S, F, P>
where
    E: Send + 'static,
    S: Clone + PartialEq + Send + Sync + 'static,
    F: Send + 'static,
    P: Processor,
{
    fn plugin_id(&self) -> PipelineId {
        self.registration.plugin.id()
    }

    fn offer_event(&self, event: &E, parent: &ResultContext<E, S, F>) {
        let Some(adapter) = &self.registration.event_adapter else {
            return;
        };
        let mapped = guard_adapter(parent, self.plugin_id(), AdapterKind::Event, || adapter(event));
        if let Some(plugin_event) = mapped.flatten() {
            self.registration.plugin.submit(plugin_event);
        }
    }

    fn attach(&self, parent: &ResultContext<E, S, F>, runtime: &Handle) {
        let scope = parent.scope().child_token();
        let previous = self
            .attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(scope.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let wired = parent.with_scope(scope);
        self.spawn_state_forwarding(wired.clone(), runtime);
        self.spawn_effect_forwarding(wired, runtime);

        tracing::debug!(
            pipeline = %parent.pipeline_name(),
            plugin = %self.registration.plugin.name(),
            "Plugin attached"
        );
    }

    fn detach(&self) {
        let attached = self
            .attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(scope) = attached {
            scope.cancel();
            tracing::debug!(plugin = %self.registration.plugin.name(), "Plugin detached");
        }
        if let Some(hook) = &self.registration.on_unregister {
            invoke_hook(|| hook());
        }
    }

    fn health(&self) -> HealthCheck {
        self.registration.plugin.health()
    }
}

/// Run one adapter call, turning a panic into a reported adapter failure.
fn guard_adapter<T, E, S, F, C>(
    parent: &ResultContext<E, S, F>,
    plugin: PipelineId,
    kind: AdapterKind,
    call: C,
) -> Option<T>
where
    E: Send + 'static,
    S: Clone + PartialEq + Send + Sync + 'static,
    F: Send + 'static,
    C: FnOnce() -> T,
{
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(value) => Some(value),
        Err(payload) => {
            report_adapter_panic(parent, plugin, kind, panic_message(payload.as_ref()));
            None
        },
    }
}

fn fold_plugin_state<E, S, F, PS>(
    parent: &ResultContext<E, S, F>,
    plugin: PipelineId,
    adapter: &StateAdapter<S, PS>,
    plugin_state: &PS,
) where
    E: Send + 'static,
    S: Clone + PartialEq + Send + Sync + 'static,
    F: Send + 'static,
{
    let mut failure = None;
    parent.update_state(|current| {
        match catch_unwind(AssertUnwindSafe(|| adapter(current, plugin_state))) {
            Ok(next) => next,
            Err(payload) => {
                failure = Some(panic_message(payload.as_ref()));
                current.clone()
            },
        }
    });
    if let Some(message) = failure {
        report_adapter_panic(parent, plugin, AdapterKind::State, message);
    }
}

fn report_adapter_panic<E, S, F>(
    parent: &ResultContext<E, S, F>,
    plugin: PipelineId,
    kind: AdapterKind,
    message: String,
) where
    E: Send + 'static,
    S: Clone + PartialEq + Send + Sync + 'static,
    F: Send + 'static,
{
    AdapterMetrics::record_failure(parent.pipeline_name(), kind);
    let error = PipelineError::AdapterPanicked {
        plugin,
        kind,
        message,
    };
    parent.report_error(&error, &ErrorContext::Adapter { plugin, kind });
}

struct RegistrarState<E, S, F> {
    /// Context of the parent's current activation; `None` while dormant
    active: Option<(ResultContext<E, S, F>, Handle)>,
    bindings: Vec<Arc<dyn PluginBinding<E, S, F>>>,
}

/// The set of plugins registered into one parent pipeline.
///
/// A single lock covers both the binding list and the parent's activation
/// context, so registration racing with (de)activation never leaves a plugin
/// unwired or wired twice.
pub(crate) struct PluginRegistrar<E, S, F> {
    state: Mutex<RegistrarState<E, S, F>>,
}

impl<E, S, F> PluginRegistrar<E, S, F>
where
    E: Send + 'static,
    S: Clone + PartialEq + Send + Sync + 'static,
    F: Send + 'static,
{
    pub(crate) const fn new() -> Self {
        Self {
            state: Mutex::new(RegistrarState {
                active: None,
                bindings: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistrarState<E, S, F>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add (or replace) a plugin, wiring it at once if the parent is active.
    pub(crate) fn register<P>(&self, registration: PluginRegistration<E, S, F, P>) -> PipelineId
    where
        P: Processor,
    {
        let binding: Arc<dyn PluginBinding<E, S, F>> = Arc::new(Binding {
            registration,
            attached: Mutex::new(None),
        });
        let plugin_id = binding.plugin_id();

        let mut state = self.lock();
        if let Some(index) = state.bindings.iter().position(|b| b.plugin_id() == plugin_id) {
            let replaced = state.bindings.remove(index);
            replaced.detach();
            tracing::debug!(plugin = %plugin_id, "Replacing existing plugin registration");
        }
        if let Some((ctx, runtime)) = &state.active {
            binding.attach(ctx, runtime);
        }
        state.bindings.push(binding);
        plugin_id
    }

    /// Remove a plugin. Returns `false` if it was not registered.
    pub(crate) fn unregister(&self, plugin_id: PipelineId) -> bool {
        let mut state = self.lock();
        let Some(index) = state.bindings.iter().position(|b| b.plugin_id() == plugin_id) else {
            return false;
        };
        let binding = state.bindings.remove(index);
        binding.detach();
        true
    }

    /// Parent became active: wire every known plugin into `ctx`.
    pub(crate) fn activate(&self, ctx: &ResultContext<E, S, F>, runtime: &Handle) {
        let mut state = self.lock();
        for binding in &state.bindings {
            binding.attach(ctx, runtime);
        }
        state.active = Some((ctx.clone(), runtime.clone()));
    }

    /// Parent torn down: unwire every plugin but keep them registered.
    pub(crate) fn deactivate(&self) {
        let mut state = self.lock();
        state.active = None;
        for binding in &state.bindings {
            binding.detach();
        }
    }

    /// Offer a parent event to every plugin's event adapter.
    pub(crate) fn offer_event(&self, event: &E) {
        let (bindings, ctx) = {
            let state = self.lock();
            let Some((ctx, _)) = &state.active else {
                return;
            };
            (state.bindings.clone(), ctx.clone())
        };
        for binding in &bindings {
            binding.offer_event(event, &ctx);
        }
    }

    pub(crate) fn plugin_ids(&self) -> Vec<PipelineId> {
        self.lock().bindings.iter().map(|b| b.plugin_id()).collect()
    }

    pub(crate) fn health(&self) -> Vec<HealthCheck> {
        let bindings = self.lock().bindings.clone();
        bindings.iter().map(|b| b.health()).collect()
    }
}
