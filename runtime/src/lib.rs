//! # Statepipe Runtime
//!
//! Runtime for reactive, subscriber-driven event pipelines.
//!
//! This crate turns a [`Processor`](statepipe_core::Processor) into a running
//! [`Pipeline`]: it owns the event loop, the subscriber lifecycle and plugin
//! composition.
//!
//! ## Core Components
//!
//! - **Pipeline**: Handle to submit events and subscribe to state and effects
//! - **Event Processor**: Pulls events and runs handlers concurrently, bounded
//! - **Lifecycle**: Activates on the first subscriber, tears down after a grace period
//! - **Plugins**: Child pipelines wired in through event/state/effect adapters
//!
//! ## Example
//!
//! ```ignore
//! use statepipe_runtime::Pipeline;
//!
//! let pipeline = Pipeline::builder(SearchProcessor::new(client), SearchState::default)
//!     .with_name("search")
//!     .build()?;
//!
//! // Subscribing activates the pipeline
//! let mut state = pipeline.state();
//! let mut effects = pipeline.effects();
//!
//! pipeline.submit(SearchEvent::Query("rust".into()));
//!
//! while let Some(state) = state.next().await {
//!     render(&state);
//! }
//! ```

/// Pipeline configuration (grace period, concurrency, effect buffer)
pub mod config;

/// Health checks over effect buffers and lifecycle state
pub mod health;

/// Subscriber refcounting and the activation state machine
pub mod lifecycle;

/// Prometheus metrics for observability
pub mod metrics;

/// The pipeline handle and its builder
pub mod pipeline;

/// Plugin registration and adapter wiring
pub mod plugin;

mod processor;

/// State and effect subscriptions
pub mod stream;

pub use config::{ConfigError, PipelineConfig};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use lifecycle::{LifecyclePhase, SubscriberGuard};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use plugin::PluginRegistration;
pub use stream::{EffectStream, StateStream};

pub use statepipe_core::{
    AdapterKind, ContextOf, ErrorContext, NoopObserver, PipelineError, PipelineId,
    PipelineObserver, Processor, ResultContext, TracingObserver,
};
