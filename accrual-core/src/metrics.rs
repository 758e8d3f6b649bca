//! Metrics collection for observability
//!
//! Prometheus counters for the accrual core. Everything is registered in a
//! registry owned by [`Metrics`], so several instances can coexist (tests,
//! embedded use) without clashing in the process-wide default registry.
//!
//! # Metrics
//!
//! - `accrual_orders_registered_total{outcome}` - registration attempts
//! - `accrual_reconciliations_total{outcome}` - per-order reconciliation results
//! - `accrual_poll_ticks_total` - completed poller ticks
//! - `accrual_withdrawals_total{outcome}` - withdrawal admission decisions

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    pub orders_registered: IntCounterVec,
    pub reconciliations: IntCounterVec,
    pub poll_ticks: IntCounter,
    pub withdrawals: IntCounterVec,
    registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let orders_registered = IntCounterVec::new(
            Opts::new(
                "accrual_orders_registered_total",
                "Order registration attempts by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(orders_registered.clone()))?;

        let reconciliations = IntCounterVec::new(
            Opts::new(
                "accrual_reconciliations_total",
                "Per-order reconciliation results by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(reconciliations.clone()))?;

        let poll_ticks = IntCounter::new("accrual_poll_ticks_total", "Completed poller ticks")?;
        registry.register(Box::new(poll_ticks.clone()))?;

        let withdrawals = IntCounterVec::new(
            Opts::new(
                "accrual_withdrawals_total",
                "Withdrawal admission decisions by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(withdrawals.clone()))?;

        Ok(Self {
            orders_registered,
            reconciliations,
            poll_ticks,
            withdrawals,
            registry,
        })
    }

    pub fn record_registration(&self, outcome: &str) {
        self.orders_registered.with_label_values(&[outcome]).inc();
    }

    pub fn record_reconciliation(&self, outcome: &str) {
        self.reconciliations.with_label_values(&[outcome]).inc();
    }

    pub fn record_tick(&self) {
        self.poll_ticks.inc();
    }

    pub fn record_withdrawal(&self, outcome: &str) {
        self.withdrawals.with_label_values(&[outcome]).inc();
    }

    /// Render all metrics in the Prometheus text format
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.poll_ticks.get(), 0);
        // Independent registries do not collide
        let _other = Metrics::new().unwrap();
    }

    #[test]
    fn test_record_registration() {
        let metrics = Metrics::new().unwrap();
        metrics.record_registration("created");
        metrics.record_registration("created");
        metrics.record_registration("conflict");
        assert_eq!(
            metrics.orders_registered.with_label_values(&["created"]).get(),
            2
        );
        assert_eq!(
            metrics.orders_registered.with_label_values(&["conflict"]).get(),
            1
        );
    }

    #[test]
    fn test_gather_text_contains_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_tick();
        metrics.record_withdrawal("accepted");
        let text = metrics.gather_text();
        assert!(text.contains("accrual_poll_ticks_total 1"));
        assert!(text.contains("accrual_withdrawals_total{outcome=\"accepted\"} 1"));
    }
}
