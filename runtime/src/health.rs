//! Health reporting for pipelines and their plugins.
//!
//! A pipeline's health is read off its effect buffer: effects pile up there
//! when nobody receives them, and once the buffer is full every emitting
//! handler stalls. Lifecycle phase and queue depths ride along as metadata.

/// How close a pipeline is to stalling on undelivered effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthStatus {
    /// Effects are being received
    Healthy,

    /// Effect buffer is over half full
    Degraded,

    /// Effect buffer is full; emitters wait for a reader
    Unhealthy,
}

impl HealthStatus {
    /// Share of the buffer above which a pipeline counts as degraded
    pub const DEGRADED_ABOVE: f64 = 0.5;

    /// Classify `buffered` undelivered effects against the buffer `capacity`.
    #[must_use]
    pub fn from_backlog(buffered: usize, capacity: usize) -> Self {
        if buffered >= capacity {
            return Self::Unhealthy;
        }
        #[allow(clippy::cast_precision_loss)]
        let usage = buffered as f64 / capacity as f64;
        if usage > Self::DEGRADED_ABOVE {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }

    /// `true` only for [`HealthStatus::Healthy`]
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// `true` only for [`HealthStatus::Unhealthy`]
    #[must_use]
    pub const fn is_unhealthy(self) -> bool {
        matches!(self, Self::Unhealthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        })
    }
}

/// Health of one pipeline.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Pipeline name
    pub component: String,

    /// Status derived from the effect backlog
    pub status: HealthStatus,

    /// Why the pipeline is not healthy
    pub message: Option<String>,

    /// Phase, subscriber count and queue depths
    pub metadata: Vec<(String, String)>,
}

impl HealthCheck {
    /// Check a pipeline holding `buffered` of `capacity` undelivered effects.
    #[must_use]
    pub fn for_effect_buffer(component: impl Into<String>, buffered: usize, capacity: usize) -> Self {
        let status = HealthStatus::from_backlog(buffered, capacity);
        let message = match status {
            HealthStatus::Healthy => None,
            HealthStatus::Degraded => Some(format!("{buffered} of {capacity} effects undelivered")),
            HealthStatus::Unhealthy => Some("Effect buffer is full".to_string()),
        };

        Self {
            component: component.into(),
            status,
            message,
            metadata: vec![
                ("buffered_effects".to_string(), buffered.to_string()),
                ("effect_capacity".to_string(), capacity.to_string()),
            ],
        }
    }

    /// Attach a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// Look up a metadata value
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A pipeline's check followed by one per registered plugin.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Worst status among the checks
    pub status: HealthStatus,

    /// The pipeline first, then its plugins
    pub checks: Vec<HealthCheck>,

    /// When the report was taken
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    /// Aggregate `checks` into one report
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        Self {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Every check is healthy
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }

    /// At least one check is unhealthy
    #[must_use]
    pub const fn is_unhealthy(&self) -> bool {
        self.status.is_unhealthy()
    }
}
