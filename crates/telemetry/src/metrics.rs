//! Prometheus metrics for the pump and the supply process.

use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntGauge, Registry, TextEncoder,
};

use crate::timing::Timing;

/// Metrics collector shared by the pump components.
///
/// Every instance owns its registry, so several collectors can live in one
/// process (one per test, for instance) without name clashes.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    blocks_pumped: IntCounter,
    transactions_pumped: IntCounter,
    rpc_errors: IntCounter,
    publish_failures: IntCounter,
    pump_height: IntGauge,
    supply_height: IntGauge,
    rpc_latency: HistogramVec,
}

impl Metrics {
    /// Create a new metrics instance with all collectors registered.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let blocks_pumped = IntCounter::new(
            "chainpump_blocks_pumped_total",
            "Total number of blocks published to the bus",
        )?;
        let transactions_pumped = IntCounter::new(
            "chainpump_transactions_pumped_total",
            "Total number of transactions published to the bus",
        )?;
        let rpc_errors = IntCounter::new(
            "chainpump_rpc_errors_total",
            "Total number of failed node RPC calls",
        )?;
        let publish_failures = IntCounter::new(
            "chainpump_publish_failures_total",
            "Total number of failed publish attempts",
        )?;
        let pump_height = IntGauge::new(
            "chainpump_pump_height",
            "Height of the last published block",
        )?;
        let supply_height = IntGauge::new(
            "chainpump_supply_height",
            "Block height of the last committed supply checkpoint",
        )?;
        let rpc_latency = HistogramVec::new(
            HistogramOpts::new(
                "chainpump_rpc_latency_seconds",
                "Node RPC call latency in seconds",
            ),
            &["operation"],
        )?;

        registry.register(Box::new(blocks_pumped.clone()))?;
        registry.register(Box::new(transactions_pumped.clone()))?;
        registry.register(Box::new(rpc_errors.clone()))?;
        registry.register(Box::new(publish_failures.clone()))?;
        registry.register(Box::new(pump_height.clone()))?;
        registry.register(Box::new(supply_height.clone()))?;
        registry.register(Box::new(rpc_latency.clone()))?;

        Ok(Self {
            registry,
            blocks_pumped,
            transactions_pumped,
            rpc_errors,
            publish_failures,
            pump_height,
            supply_height,
            rpc_latency,
        })
    }

    pub fn inc_blocks_pumped(&self) {
        self.blocks_pumped.inc();
    }

    pub fn inc_transactions_pumped(&self, count: u64) {
        self.transactions_pumped.inc_by(count);
    }

    pub fn inc_rpc_errors(&self) {
        self.rpc_errors.inc();
    }

    pub fn inc_publish_failures(&self) {
        self.publish_failures.inc();
    }

    pub fn set_pump_height(&self, height: u64) {
        self.pump_height.set(height as i64);
    }

    pub fn set_supply_height(&self, height: u64) {
        self.supply_height.set(height as i64);
    }

    /// Record RPC latency for one operation.
    pub fn observe_rpc_latency(&self, operation: &str, duration_secs: f64) {
        self.rpc_latency
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    /// Render all collectors in the Prometheus text format.
    pub fn gather(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Timing for Metrics {
    fn record(&self, name: &str, elapsed: Duration) {
        self.observe_rpc_latency(name, elapsed.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instances_do_not_share_registries() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();

        first.inc_blocks_pumped();
        first.set_pump_height(42);

        let rendered = first.gather().unwrap();
        assert!(rendered.contains("chainpump_blocks_pumped_total 1"));
        assert!(rendered.contains("chainpump_pump_height 42"));

        let rendered = second.gather().unwrap();
        assert!(rendered.contains("chainpump_blocks_pumped_total 0"));
    }

    #[test]
    fn timing_lands_in_latency_histogram() {
        let metrics = Metrics::new().unwrap();
        metrics.record("getblockhash", Duration::from_millis(15));

        let rendered = metrics.gather().unwrap();
        assert!(rendered.contains("chainpump_rpc_latency_seconds_count{operation=\"getblockhash\"} 1"));
    }
}
