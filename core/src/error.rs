//! Error types shared by every pipeline component.
//!
//! Handler and adapter failures never escape the pipeline: they are caught at
//! the narrowest boundary (one event, one adapter call), wrapped in a
//! [`PipelineError`] and handed to the instrumentation hook together with an
//! [`ErrorContext`] describing where they happened.

use crate::id::PipelineId;
use std::any::Any;
use thiserror::Error;

/// Errors produced or reported by a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A `process`/`on_subscribed` handler or background task returned an error.
    #[error("handler failed: {0:#}")]
    Handler(anyhow::Error),

    /// A handler or background task panicked.
    #[error("handler panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text
        message: String,
    },

    /// A plugin adapter panicked. The offending input is skipped.
    #[error("{kind} adapter of plugin {plugin} panicked: {message}")]
    AdapterPanicked {
        /// Plugin whose adapter failed
        plugin: PipelineId,
        /// Which of the four adapters failed
        kind: AdapterKind,
        /// Panic payload rendered as text
        message: String,
    },

    /// Work handed to the blocking pool via `offload` failed.
    #[error("offloaded work failed: {0}")]
    Offload(#[source] tokio::task::JoinError),

    /// The owning pipeline scope was cancelled.
    ///
    /// Cancellation is not a failure: the runtime never reports it to the
    /// instrumentation hook. Handlers should propagate it with `?`.
    #[error("pipeline scope cancelled")]
    Cancelled,

    /// No tokio runtime handle was supplied and none is current.
    #[error("no tokio runtime available to drive the pipeline")]
    NoRuntime,

    /// Pipeline configuration was rejected.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Build a [`PipelineError::Panicked`] from a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Self::Panicked {
            message: panic_message(payload),
        }
    }

    /// Whether this error represents cancellation rather than a failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Offload(join) => join.is_cancelled(),
            _ => false,
        }
    }

    /// Classify an error returned by a user handler.
    ///
    /// Errors that wrap a [`PipelineError`] keep their identity so that
    /// cancellation propagated with `?` is still recognised; everything else
    /// becomes [`PipelineError::Handler`].
    #[must_use]
    pub fn from_handler(error: anyhow::Error) -> Self {
        match error.downcast::<Self>() {
            Ok(pipeline_error) => pipeline_error,
            Err(other) => Self::Handler(other),
        }
    }
}

/// Render a panic payload as text.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The four adapter slots of a plugin registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    /// Parent event → plugin event
    Event,
    /// (parent state, plugin state) → parent state
    State,
    /// Plugin effect → parent effect
    Effect,
    /// Plugin effect → parent event (feedback path)
    EffectToEvent,
}

impl AdapterKind {
    /// Stable lowercase name, used as a metrics label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::State => "state",
            Self::Effect => "effect",
            Self::EffectToEvent => "effect_to_event",
        }
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a reported error happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorContext {
    /// Inside `Processor::process` for one event
    Process,
    /// Inside `Processor::on_subscribed`
    OnSubscribed,
    /// Inside a task started with `ResultContext::launch`
    Background,
    /// Inside a plugin adapter
    Adapter {
        /// Plugin whose adapter failed
        plugin: PipelineId,
        /// Which adapter failed
        kind: AdapterKind,
    },
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Process => write!(f, "process"),
            Self::OnSubscribed => write!(f, "on_subscribed"),
            Self::Background => write!(f, "background"),
            Self::Adapter { plugin, kind } => write!(f, "{kind} adapter of plugin {plugin}"),
        }
    }
}
