//! Prometheus metrics for pipeline observability.
//!
//! This module provides metric collection for the runtime:
//! - Event processing (throughput, failures, latency)
//! - Lifecycle transitions (activations, teardowns, subscribers)
//! - Effect delivery (discarded backlog)
//! - Plugin adapters (failures)
//!
//! Every metric carries a `pipeline` label with the pipeline name.
//!
//! # Example
//!
//! ```rust,no_run
//! use statepipe_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//!
//! if let Some(text) = recorder.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder.
///
/// Installs the global recorder and renders the scrape payload. Serving it
/// over HTTP is up to the host application.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create a recorder that is not installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe all pipeline metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests) this logs a warning
    /// and succeeds without a handle.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Pipeline metrics recorder installed");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` unless this recorder installed the exporter.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Event Metrics
    describe_counter!(
        "pipeline_events_processed_total",
        "Total number of events whose process handler succeeded"
    );
    describe_counter!(
        "pipeline_event_failures_total",
        "Total number of events whose process handler failed or panicked"
    );
    describe_histogram!(
        "pipeline_event_duration_seconds",
        "Time spent in the process handler per event"
    );

    // Lifecycle Metrics
    describe_counter!(
        "pipeline_activations_total",
        "Total number of Dormant to Active transitions"
    );
    describe_counter!(
        "pipeline_teardowns_total",
        "Total number of teardowns after the grace period"
    );
    describe_gauge!("pipeline_subscribers", "Current state and effect subscribers");

    // Effect Metrics
    describe_counter!(
        "pipeline_effects_discarded_total",
        "Buffered effects dropped at teardown without a reader"
    );

    // Plugin Metrics
    describe_counter!(
        "pipeline_adapter_failures_total",
        "Total number of plugin adapter invocations that panicked"
    );
}

/// Event processing metrics recorder.
pub struct EventMetrics;

impl EventMetrics {
    /// Record a successfully processed event.
    pub fn record_processed(pipeline: &str, duration: Duration) {
        counter!("pipeline_events_processed_total", "pipeline" => pipeline.to_string()).increment(1);
        histogram!("pipeline_event_duration_seconds", "pipeline" => pipeline.to_string())
            .record(duration.as_secs_f64());
    }

    /// Record a failed event.
    pub fn record_failure(pipeline: &str) {
        counter!("pipeline_event_failures_total", "pipeline" => pipeline.to_string()).increment(1);
    }
}

/// Lifecycle metrics recorder.
pub struct LifecycleMetrics;

impl LifecycleMetrics {
    /// Record an activation.
    pub fn record_activation(pipeline: &str) {
        counter!("pipeline_activations_total", "pipeline" => pipeline.to_string()).increment(1);
    }

    /// Record a teardown.
    pub fn record_teardown(pipeline: &str) {
        counter!("pipeline_teardowns_total", "pipeline" => pipeline.to_string()).increment(1);
    }
}

/// Effect metrics recorder.
pub struct EffectMetrics;

impl EffectMetrics {
    /// Record effects discarded at teardown.
    pub fn record_discarded(pipeline: &str, count: usize) {
        counter!("pipeline_effects_discarded_total", "pipeline" => pipeline.to_string())
            .increment(count as u64);
    }
}

/// Plugin adapter metrics recorder.
pub struct AdapterMetrics;

impl AdapterMetrics {
    /// Record a failed adapter invocation.
    pub fn record_failure(pipeline: &str, kind: statepipe_core::AdapterKind) {
        counter!(
            "pipeline_adapter_failures_total",
            "pipeline" => pipeline.to_string(),
            "adapter" => kind.as_str()
        )
        .increment(1);
    }
}
