use std::time::Duration;

use anyhow::Result;

use super::Metrics;

/// Emits counters, gauges, and timers as `tracing` events rather than
/// to a real metrics backend. Used whenever the environment doesn't
/// name a `metrics` stage (§4.1): "never run without a sink".
#[derive(Debug, Default)]
pub struct LoggingMetrics;

impl Metrics for LoggingMetrics {
    fn exit(&mut self) {
        tracing::debug!(target: "gator::metrics", "metrics sink flushed");
    }

    fn counter(&self, name: &str, value: i64) {
        tracing::info!(target: "gator::metrics", metric = "counter", name, value);
    }

    fn gauge(&self, name: &str, value: f64) {
        tracing::info!(target: "gator::metrics", metric = "gauge", name, value);
    }

    fn timer(&self, name: &str, duration: Duration) {
        tracing::info!(target: "gator::metrics", metric = "timer", name, ms = duration.as_millis() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_counts_success_and_failure() {
        let metrics = LoggingMetrics;
        let ok: Result<i32> = metrics.time("op", || Ok(1));
        assert_eq!(ok.unwrap(), 1);
        let err: Result<i32> = metrics.time("op", || anyhow::bail!("boom"));
        assert!(err.is_err());
    }
}
