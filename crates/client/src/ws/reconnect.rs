//! Bounded exponential backoff for abnormal socket closures.

use std::time::Duration;

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub base_interval: Duration,
    /// Growth factor applied per attempt
    pub multiplier: f64,
    /// Retries allowed before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(3000),
            multiplier: 1.5,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Delay for the given 1-indexed attempt: `base * multiplier^(attempt - 1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        self.base_interval.mul_f64(self.multiplier.powi(exponent))
    }
}

/// Where an entity sits in the reconnect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPhase {
    Idle,
    Scheduled { attempt: u32, delay: Duration },
    Connecting { attempt: u32 },
    Abandoned,
}

/// Outcome reported to observers when a socket closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// A retry timer is pending.
    Scheduled { attempt: u32, delay: Duration },
    /// The attempt budget is spent; only a manual reconnect helps now.
    Abandoned,
    /// The close was graceful or terminal.
    NotRetrying,
}

/// Per-entity reconnect state machine. Pure: timers live in the registry.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    attempts: u32,
    phase: ReconnectPhase,
}

impl ReconnectPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
            phase: ReconnectPhase::Idle,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn phase(&self) -> ReconnectPhase {
        self.phase
    }

    /// Count a failure and decide whether to retry.
    pub fn on_abnormal_close(&mut self) -> RetryDecision {
        if self.phase == ReconnectPhase::Abandoned {
            return RetryDecision::Abandoned;
        }

        self.attempts += 1;
        if self.attempts > self.config.max_attempts {
            self.phase = ReconnectPhase::Abandoned;
            return RetryDecision::Abandoned;
        }

        let delay = self.config.delay_for_attempt(self.attempts);
        self.phase = ReconnectPhase::Scheduled {
            attempt: self.attempts,
            delay,
        };
        RetryDecision::Scheduled {
            attempt: self.attempts,
            delay,
        }
    }

    /// The pending timer fired. Returns the attempt number to run, if any.
    pub fn on_timer_fired(&mut self) -> Option<u32> {
        match self.phase {
            ReconnectPhase::Scheduled { attempt, .. } => {
                self.phase = ReconnectPhase::Connecting { attempt };
                Some(attempt)
            }
            _ => None,
        }
    }

    /// A connect started outside the timer (it supersedes any pending retry).
    pub fn on_connect_started(&mut self) {
        if self.phase != ReconnectPhase::Abandoned {
            self.phase = ReconnectPhase::Connecting {
                attempt: self.attempts,
            };
        }
    }

    /// The socket opened: back to normal operation.
    pub fn on_open(&mut self) {
        self.reset();
    }

    /// Manual override, also leaves the abandoned state.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.phase = ReconnectPhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_by_half() {
        let config = ReconnectConfig::default();
        let delays: Vec<u128> = (1..=5)
            .map(|n| config.delay_for_attempt(n).as_micros())
            .collect();
        assert_eq!(delays, vec![3_000_000, 4_500_000, 6_750_000, 10_125_000, 15_187_500]);
    }

    #[test]
    fn abandons_after_max_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        for expected in 1..=5 {
            match policy.on_abnormal_close() {
                RetryDecision::Scheduled { attempt, .. } => assert_eq!(attempt, expected),
                other => panic!("unexpected decision {other:?}"),
            }
            assert_eq!(policy.on_timer_fired(), Some(expected));
        }

        assert_eq!(policy.on_abnormal_close(), RetryDecision::Abandoned);
        assert_eq!(policy.phase(), ReconnectPhase::Abandoned);
        assert_eq!(policy.on_abnormal_close(), RetryDecision::Abandoned);
        assert_eq!(policy.on_timer_fired(), None);
        assert_eq!(policy.attempts(), 6);
    }

    #[test]
    fn open_resets_counter() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        policy.on_abnormal_close();
        policy.on_abnormal_close();
        assert_eq!(policy.attempts(), 2);

        policy.on_timer_fired();
        policy.on_open();
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.phase(), ReconnectPhase::Idle);

        assert_eq!(
            policy.on_abnormal_close(),
            RetryDecision::Scheduled {
                attempt: 1,
                delay: Duration::from_millis(3000)
            }
        );
    }

    #[test]
    fn manual_reset_leaves_abandoned() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 0,
            ..ReconnectConfig::default()
        });
        assert_eq!(policy.on_abnormal_close(), RetryDecision::Abandoned);

        policy.reset();
        policy.on_connect_started();
        assert_eq!(policy.phase(), ReconnectPhase::Connecting { attempt: 0 });
    }

    #[test]
    fn timer_without_schedule_is_ignored() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        assert_eq!(policy.on_timer_fired(), None);
        assert_eq!(policy.phase(), ReconnectPhase::Idle);
    }
}
