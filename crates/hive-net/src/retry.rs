//! Bounded retry policy for connection attempts.
//!
//! The defaults give a fixed schedule: three attempts, two seconds apart.
//! A multiplier above 1.0 turns it into exponential backoff capped at
//! `max_delay`, and `jitter` spreads reconnect storms when many clients lose
//! the same server at once.

use std::time::Duration;

use rand::Rng;

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Default: 3.
    pub max_attempts: u32,
    /// Delay before the second attempt. Default: 2 s.
    pub delay: Duration,
    /// Factor applied to the delay after each failure. Default: 1.0 (fixed).
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay. Default: 30 s.
    pub max_delay: Duration,
    /// Jitter factor (0.0–1.0), applied as ±jitter. Default: 0.0.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Fixed-delay policy.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            ..Default::default()
        }
    }
}

/// Counts failed attempts and hands out the wait before the next one.
#[derive(Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    failures: u32,
    current_delay: Duration,
}

impl RetryState {
    /// Fresh state for `policy`.
    pub fn new(policy: RetryPolicy) -> Self {
        let current_delay = policy.delay;
        Self {
            policy,
            failures: 0,
            current_delay,
        }
    }

    /// Record a failed attempt and return the delay before the next one, or
    /// `None` when the policy is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.policy.max_attempts {
            return None;
        }

        let base = self.current_delay.min(self.policy.max_delay);
        let jittered = if self.policy.jitter > 0.0 {
            let spread = self.policy.jitter.min(1.0);
            let factor = rand::rng().random_range((1.0 - spread)..=(1.0 + spread));
            base.mul_f64(factor)
        } else {
            base
        };

        self.current_delay = self
            .current_delay
            .mul_f64(self.policy.backoff_multiplier.max(1.0))
            .min(self.policy.max_delay);

        Some(jittered.min(self.policy.max_delay))
    }

    /// Failed attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_three_attempts_two_seconds_apart() {
        let mut state = RetryState::new(RetryPolicy::default());
        assert_eq!(state.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(state.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(state.next_delay(), None);
        assert_eq!(state.attempts(), 3);
    }

    #[test]
    fn test_single_attempt_policy_never_waits() {
        let mut state = RetryState::new(RetryPolicy::fixed(1, Duration::from_secs(2)));
        assert_eq!(state.next_delay(), None);
    }

    #[test]
    fn test_backoff_sequence_is_exponential() {
        let mut state = RetryState::new(RetryPolicy {
            max_attempts: 10,
            delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            ..Default::default()
        });
        let delays: Vec<_> = (0..4).filter_map(|_| state.next_delay()).collect();
        assert_eq!(
            delays,
            [1, 2, 4, 8].map(Duration::from_secs).to_vec(),
        );
    }

    #[test]
    fn test_max_delay_is_capped() {
        let mut state = RetryState::new(RetryPolicy {
            max_attempts: 20,
            delay: Duration::from_secs(1),
            backoff_multiplier: 3.0,
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
        });
        while let Some(d) = state.next_delay() {
            assert!(d <= Duration::from_secs(10), "delay {d:?} exceeds cap");
        }
    }

    #[test]
    fn test_jitter_stays_within_bounds_and_varies() {
        let policy = RetryPolicy {
            max_attempts: 100,
            jitter: 0.25,
            ..Default::default()
        };
        let delays: Vec<_> = (0..16)
            .map(|_| RetryState::new(policy.clone()).next_delay().unwrap())
            .collect();
        for d in &delays {
            assert!(*d >= Duration::from_millis(1500) && *d <= Duration::from_millis(2500));
        }
        assert!(
            !delays.windows(2).all(|w| w[0] == w[1]),
            "jitter should vary delays: {delays:?}"
        );
    }
}
