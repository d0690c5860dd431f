//! # Statepipe Core
//!
//! Core primitives for the statepipe reactive state-pipeline runtime.
//!
//! A pipeline turns a stream of discrete input events into a single current,
//! deduplicated state value and a stream of one-shot effects. This crate holds
//! the building blocks; the `statepipe-runtime` crate wires them into a
//! pipeline with a subscriber-driven lifecycle and plugin composition.
//!
//! ## Core Concepts
//!
//! - **Event**: An input to a pipeline (closed enum in user code)
//! - **State**: The single observable value, compared structurally
//! - **Effect**: A one-shot output, delivered to at most one reader
//! - **Processor**: User logic `process(ctx, event)` reporting through the context
//! - **`ResultContext`**: Capabilities handed to the processor (`update_state`,
//!   `emit_effect`, `offload`, `launch`)
//!
//! ## Building Blocks
//!
//! - [`state::StateCell`]: atomic read-modify-write, replay-latest watchers
//! - [`effect::EffectQueue`]: bounded, at-most-once fan-out queue
//! - [`ingress::EventIngress`]: unbounded MPSC intake that never drops events
//! - [`observer::PipelineObserver`]: fire-and-forget instrumentation hook
//!
//! ## Example
//!
//! ```ignore
//! use statepipe_core::{ContextOf, Processor};
//!
//! impl Processor for SearchProcessor {
//!     type Event = SearchEvent;
//!     type State = SearchState;
//!     type Effect = SearchEffect;
//!
//!     async fn process(&self, ctx: &ContextOf<Self>, event: SearchEvent) -> anyhow::Result<()> {
//!         match event {
//!             SearchEvent::QueryChanged(query) => {
//!                 ctx.update_state(|s| SearchState { query: query.clone(), ..s.clone() });
//!                 let index = self.index.clone();
//!                 let hits = ctx.offload(move || index.lookup(&query)).await?;
//!                 ctx.update_state(|s| SearchState { hits: hits.clone(), ..s.clone() });
//!             },
//!             SearchEvent::HitSelected(id) => {
//!                 ctx.emit_effect(SearchEffect::Open(id)).await;
//!             },
//!         }
//!         Ok(())
//!     }
//! }
//! ```

/// Execution context handed to processor hooks
pub mod context;

/// One-shot effect delivery
pub mod effect;

/// Error types and failure classification
pub mod error;

/// Pipeline identity
pub mod id;

/// Event intake queue
pub mod ingress;

/// Instrumentation hook
pub mod observer;

/// The `Processor` trait
pub mod processor;

/// Deduplicating state holder
pub mod state;

pub use context::ResultContext;
pub use effect::{EffectQueue, EffectReceiver};
pub use error::{AdapterKind, ErrorContext, PipelineError, panic_message};
pub use id::PipelineId;
pub use ingress::{EventIngress, IngressDrain};
pub use observer::{NoopObserver, PipelineObserver, TracingObserver};
pub use processor::{ContextOf, Processor};
pub use state::{StateCell, StateWatcher};

// Re-exported so downstream crates name the same token type
pub use tokio_util::sync::CancellationToken;
