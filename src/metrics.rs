//! Prometheus metrics for the control plane
//!
//! Counters live in a registry owned by [`Metrics`] so independent control
//! planes (and tests) never collide on the process-global registry.

use crate::error::{Error, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Control plane metrics
pub struct Metrics {
    registry: Registry,
    operations: IntCounterVec,
    operation_duration: HistogramVec,
    poll_probes: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new(
                "storage_ops_operations_total",
                "Dispatched storage operations by driver and outcome",
            ),
            &["driver", "operation", "outcome"],
        )
        .map_err(metrics_error)?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "storage_ops_operation_duration_seconds",
                "Duration of dispatched storage operations",
            )
            .buckets(vec![0.01, 0.1, 1.0, 10.0, 60.0, 300.0, 900.0, 2700.0]),
            &["driver", "operation"],
        )
        .map_err(metrics_error)?;

        let poll_probes = IntCounterVec::new(
            Opts::new(
                "storage_ops_poll_probes_total",
                "Probes issued by provisioning waits",
            ),
            &["action"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(operations.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(operation_duration.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(poll_probes.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            operations,
            operation_duration,
            poll_probes,
        })
    }

    /// Record one dispatched operation
    pub fn record_operation(
        &self,
        driver: &str,
        operation: &str,
        outcome: &str,
        elapsed: Duration,
    ) {
        self.operations
            .with_label_values(&[driver, operation, outcome])
            .inc();
        self.operation_duration
            .with_label_values(&[driver, operation])
            .observe(elapsed.as_secs_f64());
    }

    /// Record one state machine probe
    pub fn record_probe(&self, action: &str) {
        self.poll_probes.with_label_values(&[action]).inc();
    }

    pub fn operation_count(&self, driver: &str, operation: &str, outcome: &str) -> u64 {
        self.operations
            .with_label_values(&[driver, operation, outcome])
            .get()
    }

    pub fn probe_count(&self, action: &str) -> u64 {
        self.poll_probes.with_label_values(&[action]).get()
    }

    /// Render all metrics in the text exposition format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics encoding: {}", e)))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}
