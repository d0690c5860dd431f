//! # Counter Demo
//!
//! A simple counter demonstrating statepipe pipelines.
//!
//! This demo showcases:
//! - A `Processor` with state updates and effects
//! - Background work tied to the pipeline lifetime (`on_subscribed` ticker)
//! - A plugin pipeline ([`notifier`]) wired in through all four adapters
//!
//! ## Architecture
//!
//! ```text
//!   CounterEvent ──▶ CounterProcessor ──▶ CounterState ──▶ state subscribers
//!        │                  │
//!        │ event adapter    └──▶ CounterEffect ──▶ effect subscribers
//!        ▼                                ▲
//!   NotifierProcessor ──state adapter─────┤ (notice folded into CounterState)
//!        │                                │
//!        └── Delivered ──effect adapter───┘
//!                  └──effect→event──▶ CounterEvent::NoticeAcknowledged
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use counter::{CounterEvent, CounterProcessor, CounterState};
//! use statepipe_runtime::Pipeline;
//!
//! # async fn example() -> Result<(), statepipe_runtime::PipelineError> {
//! let counter = Pipeline::new(CounterProcessor::new(), CounterState::default)?;
//!
//! let mut state = counter.state();
//! counter.submit(CounterEvent::Increment);
//! while let Some(state) = state.next().await {
//!     if state.count == 1 {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use statepipe_core::{ContextOf, Processor};
use std::time::Duration;

pub mod notifier;

/// Every this many counts the counter announces a milestone
pub const MILESTONE_EVERY: i64 = 10;

/// Counter state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterState {
    /// Current count value
    pub count: i64,
    /// Pending notice from the notifier plugin
    pub notice: Option<String>,
    /// Notices the user acknowledged
    pub acknowledged: u32,
}

/// Counter events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterEvent {
    /// Increment the counter by 1
    Increment,
    /// Decrement the counter by 1
    Decrement,
    /// Reset the counter to 0
    Reset,
    /// Acknowledge the pending notice
    Acknowledge,
    /// Fed back by the notifier once a notice was delivered
    NoticeAcknowledged,
}

/// Counter effects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterEffect {
    /// The count reached a multiple of [`MILESTONE_EVERY`]
    Milestone(i64),
    /// A notice was acknowledged and delivered
    Notified(String),
}

/// Counter processor
///
/// Optionally runs a ticker that submits `Increment` at a fixed period while
/// the pipeline is active.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterProcessor {
    tick: Option<Duration>,
}

impl CounterProcessor {
    /// Create a counter processor without a ticker
    #[must_use]
    pub const fn new() -> Self {
        Self { tick: None }
    }

    /// Auto-increment every `period` while subscribed
    #[must_use]
    pub const fn with_ticker(period: Duration) -> Self {
        Self { tick: Some(period) }
    }
}

impl Processor for CounterProcessor {
    type Event = CounterEvent;
    type State = CounterState;
    type Effect = CounterEffect;

    async fn process(&self, ctx: &ContextOf<Self>, event: CounterEvent) -> anyhow::Result<()> {
        match event {
            CounterEvent::Increment => {
                let Some(updated) = ctx.update_state(|s| CounterState {
                    count: s.count + 1,
                    ..s.clone()
                }) else {
                    return Ok(());
                };
                let count = updated.count;
                if count > 0 && count % MILESTONE_EVERY == 0 {
                    tracing::info!(count, "Milestone reached");
                    ctx.emit_effect(CounterEffect::Milestone(count)).await;
                }
            },
            CounterEvent::Decrement => {
                ctx.update_state(|s| CounterState {
                    count: s.count - 1,
                    ..s.clone()
                });
            },
            CounterEvent::Reset => {
                ctx.update_state(|s| CounterState {
                    count: 0,
                    ..s.clone()
                });
            },
            CounterEvent::NoticeAcknowledged => {
                ctx.update_state(|s| CounterState {
                    acknowledged: s.acknowledged + 1,
                    ..s.clone()
                });
            },
            // Handled by the notifier plugin
            CounterEvent::Acknowledge => {},
        }
        Ok(())
    }

    async fn on_subscribed(&self, ctx: &ContextOf<Self>) -> anyhow::Result<()> {
        if let Some(period) = self.tick {
            let ticker = ctx.clone();
            ctx.launch(async move {
                let mut interval = tokio::time::interval(period);
                interval.tick().await;
                while !ticker.is_cancelled() {
                    interval.tick().await;
                    ticker.submit(CounterEvent::Increment);
                }
                Ok(())
            });
        }
        Ok(())
    }
}
