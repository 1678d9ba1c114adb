//! The metrics stage (§4.2/§9): counters, gauges, and timers around
//! each provisioning sub-step. The source stacks decorators around
//! each instrumented method; here a stage calls [`Metrics::time`]
//! directly around the closure it wants timed, which is the "small
//! helper that takes a closure" alternative named in the design notes.

mod logger;

pub use logger::LoggingMetrics;

use std::fmt;
use std::time::Duration;

use anyhow::Result;

/// A metrics sink, entered outermost and exited last (§2). The
/// built-in [`LoggingMetrics`] is used whenever the environment does
/// not name a `metrics` stage (§4.1 tie-break).
pub trait Metrics: fmt::Debug {
    fn enter(&mut self) -> Result<()> {
        Ok(())
    }

    /// Flush any buffered metrics. Never raises; failures are logged
    /// by the implementation itself.
    fn exit(&mut self);

    fn counter(&self, name: &str, value: i64);

    fn gauge(&self, name: &str, value: f64);

    fn timer(&self, name: &str, duration: Duration);

    /// Run `f`, recording a success/failure counter and a timer named
    /// from `name`. Mirrors the source's success/failure/duration
    /// decorator trio without the stacked-wrapper shape.
    fn time<T>(&self, name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let start = std::time::Instant::now();
        let result = f();
        self.timer(&format!("{name}.duration"), start.elapsed());
        match &result {
            Ok(_) => self.counter(&format!("{name}.success"), 1),
            Err(_) => self.counter(&format!("{name}.failure"), 1),
        }
        result
    }
}
