//! External collaborator trait: metrics reporting.
//!
//! `TracingMetricsProvider` is the in-process default: it routes
//! observability data through structured `tracing` events rather than a
//! real metrics backend (Prometheus, StatsD, etc. remain external).

use std::time::Duration;

use async_trait::async_trait;

/// A single delivery attempt's observability data.
#[derive(Debug, Clone)]
pub struct DeliveryAttemptMetric {
    pub domain: String,
    pub attempt: u32,
    pub duration: Duration,
    pub status: &'static str,
}

/// External metrics collaborator.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn record_delivery_attempt(&self, metric: DeliveryAttemptMetric);

    async fn record_backpressure_rejection(&self, domain: Option<&str>);

    async fn record_discovery_lookup(&self, domain: &str, cache_hit: bool);
}

/// Default implementation: emits structured `tracing` events.
#[derive(Debug, Default)]
pub struct TracingMetricsProvider;

impl TracingMetricsProvider {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetricsProvider for TracingMetricsProvider {
    async fn record_delivery_attempt(&self, metric: DeliveryAttemptMetric) {
        tracing::info!(
            domain = %metric.domain,
            attempt = metric.attempt,
            duration_ms = metric.duration.as_millis() as u64,
            status = metric.status,
            "delivery attempt"
        );
    }

    async fn record_backpressure_rejection(&self, domain: Option<&str>) {
        tracing::warn!(domain = domain.unwrap_or("<global>"), "backpressure rejection");
    }

    async fn record_discovery_lookup(&self, domain: &str, cache_hit: bool) {
        tracing::debug!(domain, cache_hit, "discovery lookup");
    }
}
