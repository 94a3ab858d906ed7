use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Tracks the last time a (channel, key) pair fired, enforcing "at most one
/// notification per window" independent of the global per-channel rate
/// limit. `key` is a severity, correlation type, or the fixed attack-chain
/// marker depending on which `send_*` path is calling in.
#[derive(Debug, Default)]
pub struct ThrottleTracker {
    last_sent: DashMap<(String, String), DateTime<Utc>>,
}

impl ThrottleTracker {
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` and records `now` if `(channel, key)` may fire:
    /// either it never has, `window` is zero, or `window` has elapsed since
    /// its last recorded fire.
    pub fn check_and_record(
        &self,
        channel: &str,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> bool {
        let map_key = (channel.to_string(), key.to_string());
        if window.is_zero() {
            self.last_sent.insert(map_key, now);
            return true;
        }
        let allowed = match self.last_sent.get(&map_key) {
            Some(last) => now.signed_duration_since(*last) >= chrono::Duration::from_std(window).unwrap_or(chrono::Duration::zero()),
            None => true,
        };
        if allowed {
            self.last_sent.insert(map_key, now);
        }
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// A second call to the same (channel, key) at `offset_secs` after
        /// the first is allowed iff it lands at or past the window edge.
        #[test]
        fn at_most_one_per_window(
            window_secs in 1u64..86_400,
            offset_secs in 0i64..172_800,
        ) {
            let tracker = ThrottleTracker::new();
            let window = Duration::from_secs(window_secs);
            let first = Utc::now();
            let second = first + chrono::Duration::seconds(offset_secs);

            prop_assert!(tracker.check_and_record("teams", "high", first, window));
            let allowed_again = tracker.check_and_record("teams", "high", second, window);
            prop_assert_eq!(allowed_again, offset_secs >= window_secs as i64);
        }

        /// Throttle state is keyed independently per (channel, key) pair;
        /// recording one never consumes another's window.
        #[test]
        fn keys_are_independent(window_secs in 1u64..86_400) {
            let tracker = ThrottleTracker::new();
            let window = Duration::from_secs(window_secs);
            let now = Utc::now();

            prop_assert!(tracker.check_and_record("teams", "high", now, window));
            prop_assert!(tracker.check_and_record("teams", "low", now, window));
            prop_assert!(tracker.check_and_record("slack", "high", now, window));
        }
    }

    #[test]
    fn zero_window_never_throttles() {
        let tracker = ThrottleTracker::new();
        let now = Utc::now();
        assert!(tracker.check_and_record("teams", "critical", now, Duration::ZERO));
        assert!(tracker.check_and_record("teams", "critical", now, Duration::ZERO));
    }

    #[test]
    fn second_call_within_window_is_throttled() {
        let tracker = ThrottleTracker::new();
        let now = Utc::now();
        assert!(tracker.check_and_record("teams", "high", now, Duration::from_secs(300)));
        assert!(!tracker.check_and_record(
            "teams",
            "high",
            now + chrono::Duration::seconds(10),
            Duration::from_secs(300)
        ));
    }

    #[test]
    fn call_after_window_elapses_is_allowed() {
        let tracker = ThrottleTracker::new();
        let now = Utc::now();
        assert!(tracker.check_and_record("teams", "high", now, Duration::from_secs(300)));
        assert!(tracker.check_and_record(
            "teams",
            "high",
            now + chrono::Duration::seconds(301),
            Duration::from_secs(300)
        ));
    }

    #[test]
    fn distinct_channels_throttle_independently() {
        let tracker = ThrottleTracker::new();
        let now = Utc::now();
        assert!(tracker.check_and_record("teams", "high", now, Duration::from_secs(300)));
        assert!(tracker.check_and_record("slack", "high", now, Duration::from_secs(300)));
    }
}
