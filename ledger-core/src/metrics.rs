//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring ledger operations. The registry is owned
//! by the metrics instance, so several ledgers can live in one process.
//!
//! # Metrics
//!
//! - `ledger_operations_total{operation,outcome}` - Completed operations by outcome
//! - `ledger_operation_duration_seconds{operation}` - Operation latency

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Instant;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Operations by name and outcome (`ok` or an error kind)
    pub operations_total: IntCounterVec,

    /// Operation duration histogram
    pub operation_duration: HistogramVec,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total = IntCounterVec::new(
            Opts::new("ledger_operations_total", "Completed ledger operations"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "ledger_operation_duration_seconds",
                "Ledger operation latency",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            operations_total,
            operation_duration,
            registry,
        })
    }

    /// Record a finished ledger operation
    pub fn record<T>(&self, operation: &str, started: Instant, result: &crate::Result<T>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(e) => e.kind().as_str(),
        };
        self.record_outcome(operation, started, outcome);
    }

    /// Record a finished operation with an explicit outcome label
    pub fn record_outcome(&self, operation: &str, started: Instant, outcome: &str) {
        self.operations_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.operation_duration
            .with_label_values(&[operation])
            .observe(started.elapsed().as_secs_f64());
    }

    /// Count for one operation/outcome pair
    pub fn count(&self, operation: &str, outcome: &str) -> u64 {
        self.operations_total
            .with_label_values(&[operation, outcome])
            .get()
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format
    pub fn render(&self) -> crate::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| crate::Error::Storage(format!("metrics encoding failed: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| crate::Error::Storage(format!("metrics encoding failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.count("deposit", "ok"), 0);
        // Independent registries
        let _second = Metrics::new().unwrap();
    }

    #[test]
    fn test_record_outcomes() {
        let metrics = Metrics::new().unwrap();
        let ok: crate::Result<()> = Ok(());
        let failed: crate::Result<()> = Err(Error::InvalidAmount("zero".to_string()));

        metrics.record("deposit", Instant::now(), &ok);
        metrics.record("deposit", Instant::now(), &ok);
        metrics.record("deposit", Instant::now(), &failed);

        assert_eq!(metrics.count("deposit", "ok"), 2);
        assert_eq!(metrics.count("deposit", "validation"), 1);
    }

    #[test]
    fn test_render() {
        let metrics = Metrics::new().unwrap();
        let ok: crate::Result<()> = Ok(());
        metrics.record("transfer", Instant::now(), &ok);

        let text = metrics.render().unwrap();
        assert!(text.contains("ledger_operations_total"));
        assert!(text.contains("operation=\"transfer\""));
    }
}
