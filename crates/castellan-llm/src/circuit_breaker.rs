use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through normally.
    Closed,
    /// Calls short-circuit without reaching the inner client.
    Open,
    /// A single probe call is allowed through to test recovery.
    HalfOpen,
}

struct Sample {
    at: Instant,
    success: bool,
}

struct Inner {
    samples: VecDeque<Sample>,
    state: BreakerState,
    opened_at: Option<Instant>,
}

/// Tracks recent call outcomes in a sliding window and opens when the
/// failure ratio exceeds a threshold with sufficient throughput, exactly
/// the threshold-tracking shape used elsewhere in this workspace for
/// adaptive system-health policies, generalized into an explicit
/// open/half-open/closed state machine.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    window: Duration,
    failure_ratio_threshold: f64,
    min_throughput: usize,
    break_duration: Duration,
}

impl CircuitBreaker {
    /// Construct a breaker with a `window`-second sampling window, opening
    /// once `failure_ratio_threshold` is reached with at least
    /// `min_throughput` samples, staying open for `break_duration`.
    pub fn new(
        window: Duration,
        failure_ratio_threshold: f64,
        min_throughput: usize,
        break_duration: Duration,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                samples: VecDeque::new(),
                state: BreakerState::Closed,
                opened_at: None,
            }),
            window,
            failure_ratio_threshold,
            min_throughput,
            break_duration,
        }
    }

    /// Returns true if a call should be allowed through right now. Moves
    /// `Open` -> `HalfOpen` once `break_duration` has elapsed.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.break_duration {
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record the outcome of an allowed call and update the state machine.
    pub fn record(&self, success: bool) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        inner.samples.push_back(Sample { at: now, success });
        while let Some(front) = inner.samples.front() {
            if now.duration_since(front.at) > self.window {
                inner.samples.pop_front();
            } else {
                break;
            }
        }

        if inner.state == BreakerState::HalfOpen {
            if success {
                inner.state = BreakerState::Closed;
                inner.opened_at = None;
                inner.samples.clear();
                return;
            } else {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                return;
            }
        }

        if inner.samples.len() >= self.min_throughput {
            let failures = inner.samples.iter().filter(|s| !s.success).count();
            let ratio = failures as f64 / inner.samples.len() as f64;
            if ratio >= self.failure_ratio_threshold {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
            }
        }
    }

    /// Current state, for statistics reporting.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_failure_ratio_exceeded_with_min_throughput() {
        let breaker = CircuitBreaker::new(Duration::from_secs(30), 0.5, 5, Duration::from_millis(50));
        for _ in 0..3 {
            breaker.record(true);
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        for _ in 0..3 {
            breaker.record(false);
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn half_open_probe_after_break_duration() {
        let breaker = CircuitBreaker::new(Duration::from_secs(30), 0.5, 2, Duration::from_millis(10));
        breaker.record(false);
        breaker.record(false);
        assert_eq!(breaker.state(), BreakerState::Open);
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.allow());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn successful_probe_closes_breaker() {
        let breaker = CircuitBreaker::new(Duration::from_secs(30), 0.5, 2, Duration::from_millis(10));
        breaker.record(false);
        breaker.record(false);
        std::thread::sleep(Duration::from_millis(20));
        breaker.allow();
        breaker.record(true);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
