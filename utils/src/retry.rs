//! Bounded exponential-backoff retry, used for transient cloud API
//! errors and transient HTTP operations (e.g. a provisioning-helper
//! asset download).

use std::thread::sleep;
use std::time::Duration;

/// Retry policy: sleep `delay`, multiplying by `backoff` after each
/// failure (capped at `maxdelay`), for up to `tries` retries beyond the
/// first attempt. `backoff` should be `> 1.0` or the delay never grows.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub tries: u32,
    pub delay: Duration,
    pub backoff: f64,
    pub maxdelay: Option<Duration>,
}

impl RetryPolicy {
    pub const fn new(tries: u32, delay: Duration, backoff: f64) -> Self {
        Self {
            tries,
            delay,
            backoff,
            maxdelay: None,
        }
    }

    pub const fn with_maxdelay(mut self, maxdelay: Duration) -> Self {
        self.maxdelay = Some(maxdelay);
        self
    }

    /// Call `f` until it returns `Ok`, `should_retry` says to give up, or
    /// the retry budget is exhausted. On exhaustion, the final attempt's
    /// result (success or failure) is returned uncaught, per the
    /// "one final attempt without catching" contract.
    pub fn call<T, E>(
        &self,
        should_retry: impl Fn(&E) -> bool,
        mut f: impl FnMut() -> Result<T, E>,
    ) -> Result<T, E> {
        let mut tries_left = self.tries;
        let mut delay = self.delay;
        loop {
            match f() {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if tries_left == 0 || !should_retry(&e) {
                        return Err(e);
                    }
                    tracing::debug!(target: "gator::retry", "retrying after error, {tries_left} tries left");
                    sleep(delay);
                    tries_left -= 1;
                    delay = scale(delay, self.backoff);
                    if let Some(maxdelay) = self.maxdelay {
                        delay = delay.min(maxdelay);
                    }
                }
            }
        }
    }
}

fn scale(delay: Duration, factor: f64) -> Duration {
    Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn succeeds_without_retry() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), 1.0);
        let result: Result<i32, &str> = policy.call(|_| true, || Ok(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn retries_up_to_bound_then_gives_up() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), 1.0);
        let calls = Cell::new(0);
        let result: Result<i32, &str> = policy.call(
            |_| true,
            || {
                calls.set(calls.get() + 1);
                Err("transient")
            },
        );
        assert!(result.is_err());
        // tries=2 retries means at most tries+1 invocations.
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn non_retryable_error_short_circuits() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1), 1.0);
        let calls = Cell::new(0);
        let result: Result<i32, &str> = policy.call(
            |_| false,
            || {
                calls.set(calls.get() + 1);
                Err("terminal")
            },
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn backoff_is_capped_at_maxdelay() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100), 4.0)
            .with_maxdelay(Duration::from_millis(250));
        // Not directly observable from `call`, but the scaling helper
        // itself must respect the bound used internally.
        let mut delay = policy.delay;
        for _ in 0..5 {
            delay = scale(delay, policy.backoff).min(policy.maxdelay.unwrap());
        }
        assert_eq!(delay, Duration::from_millis(250));
    }
}
