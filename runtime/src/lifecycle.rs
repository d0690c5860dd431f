//! Subscriber-driven activation with a teardown grace period.
//!
//! ```text
//!            first subscriber                 last subscriber leaves
//!  Dormant ───────────────────▶ Active ─────────────────────────────▶ PendingTeardown
//!     ▲                           ▲                                        │    │
//!     │                           └──────── resubscribe (timer cancelled) ─┘    │
//!     └──────────────────────── grace period expires, still 0 subscribers ─────┘
//! ```
//!
//! State and effect subscribers share one refcount. Every transition is
//! decided under a single mutex, and each armed timer carries a generation
//! number, so a timer that fires just as a subscriber arrives can never tear
//! down a pipeline that is in use again.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Lifecycle phase of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// No processor running, no subscribers, no timer
    Dormant,
    /// Processor running with at least one subscriber
    Active,
    /// Processor still running, no subscribers, teardown timer armed
    PendingTeardown,
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dormant => write!(f, "dormant"),
            Self::Active => write!(f, "active"),
            Self::PendingTeardown => write!(f, "pending_teardown"),
        }
    }
}

/// What the lifecycle manager drives.
///
/// Both methods are called with the lifecycle lock held and must not
/// subscribe to or release the same pipeline.
pub(crate) trait LifecycleHooks: Send + Sync {
    /// Spin up the processor, wire plugins, run `on_subscribed`.
    fn activate(&self);

    /// Cancel the processor and unwire plugins.
    fn deactivate(&self);
}

#[derive(Debug)]
struct LifecycleState {
    subscribers: usize,
    phase: LifecyclePhase,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

/// Refcounts subscribers and drives activation/teardown.
pub(crate) struct LifecycleManager {
    name: Arc<str>,
    state: Mutex<LifecycleState>,
    grace_period: Duration,
    runtime: Handle,
    hooks: Weak<dyn LifecycleHooks>,
}

impl LifecycleManager {
    pub(crate) fn new(
        name: Arc<str>,
        grace_period: Duration,
        runtime: Handle,
        hooks: Weak<dyn LifecycleHooks>,
    ) -> Self {
        Self {
            name,
            state: Mutex::new(LifecycleState {
                subscribers: 0,
                phase: LifecyclePhase::Dormant,
                generation: 0,
                timer: None,
            }),
            grace_period,
            runtime,
            hooks,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn phase(&self) -> LifecyclePhase {
        self.lock().phase
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.lock().subscribers
    }

    /// Register one subscriber, activating or cancelling teardown as needed.
    pub(crate) fn acquire(self: &Arc<Self>) -> SubscriberGuard {
        let mut state = self.lock();
        state.subscribers += 1;
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("pipeline_subscribers", "pipeline" => self.name.to_string())
            .set(state.subscribers as f64);

        if state.subscribers == 1 {
            match state.phase {
                LifecyclePhase::Dormant => {
                    state.phase = LifecyclePhase::Active;
                    tracing::info!(pipeline = %self.name, "Activating pipeline");
                    crate::metrics::LifecycleMetrics::record_activation(&self.name);
                    if let Some(hooks) = self.hooks.upgrade() {
                        hooks.activate();
                    }
                },
                LifecyclePhase::PendingTeardown => {
                    // Invalidate the armed timer even if it already woke up
                    state.generation += 1;
                    if let Some(timer) = state.timer.take() {
                        timer.abort();
                    }
                    state.phase = LifecyclePhase::Active;
                    tracing::debug!(pipeline = %self.name, "Resubscribed within grace period, teardown cancelled");
                },
                LifecyclePhase::Active => {},
            }
        }

        SubscriberGuard {
            manager: Arc::clone(self),
        }
    }

    /// Drop one subscriber, arming the teardown timer on the last one.
    fn release(self: &Arc<Self>) {
        let mut state = self.lock();
        state.subscribers = state.subscribers.saturating_sub(1);
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("pipeline_subscribers", "pipeline" => self.name.to_string())
            .set(state.subscribers as f64);

        if state.subscribers > 0 || state.phase != LifecyclePhase::Active {
            return;
        }

        state.generation += 1;
        if self.grace_period.is_zero() {
            self.teardown(&mut state);
            return;
        }

        state.phase = LifecyclePhase::PendingTeardown;
        let generation = state.generation;
        let grace_period = self.grace_period;
        let manager = Arc::downgrade(self);

        tracing::debug!(
            pipeline = %self.name,
            grace_ms = grace_period.as_millis(),
            "Last subscriber left, teardown scheduled"
        );

        state.timer = Some(self.runtime.spawn(async move {
            tokio::time::sleep(grace_period).await;
            if let Some(manager) = manager.upgrade() {
                manager.expire(generation);
            }
        }));
    }

    /// Grace timer fired: tear down unless something changed meanwhile.
    fn expire(&self, generation: u64) {
        let mut state = self.lock();
        if state.phase != LifecyclePhase::PendingTeardown
            || state.subscribers > 0
            || state.generation != generation
        {
            tracing::trace!(pipeline = %self.name, "Stale teardown timer ignored");
            return;
        }
        state.timer = None;
        self.teardown(&mut state);
    }

    fn teardown(&self, state: &mut LifecycleState) {
        state.phase = LifecyclePhase::Dormant;
        tracing::info!(pipeline = %self.name, "Grace period over, tearing down pipeline");
        crate::metrics::LifecycleMetrics::record_teardown(&self.name);
        if let Some(hooks) = self.hooks.upgrade() {
            hooks.deactivate();
        }
    }
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("pipeline", &self.name)
            .field("state", &*self.lock())
            .field("grace_period", &self.grace_period)
            .finish_non_exhaustive()
    }
}

/// One counted subscriber. Dropping it releases the subscription.
pub struct SubscriberGuard {
    manager: Arc<LifecycleManager>,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.manager.release();
    }
}

impl std::fmt::Debug for SubscriberGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberGuard")
            .field("pipeline", &self.manager.name)
            .finish()
    }
}
