//! Bounded retry shared by the publisher (bus outages) and the consumer
//! worker (transient apply failures).

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed,
    /// `base * 2^(attempt - 1)`, capped at `max_delay`
    #[default]
    Exponential,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts in total, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
    /// Spread applied around each delay, as a fraction of it (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(5, Duration::from_millis(100), Duration::from_secs(5))
    }
}

impl RetryPolicy {
    /// `max_attempts` below 1 is raised to 1.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: delay,
            max_delay: delay,
            backoff: Backoff::Fixed,
            jitter: 0.0,
        }
    }

    /// `max_attempts` below 1 is raised to 1.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff: Backoff::Exponential,
            jitter: 0.1,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Whether another attempt is allowed once `attempt` attempts have failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Sleep before retrying after failed attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(1u32 << (attempt - 1).min(20))
                .min(self.max_delay),
        };

        // Spread retries of concurrent callers apart; stable per attempt so
        // tests can predict it.
        let spread = delay.as_secs_f64() * self.jitter.clamp(0.0, 1.0);
        if spread == 0.0 {
            return delay;
        }
        let offset = spread * (f64::from(attempt.wrapping_mul(37) % 19) / 9.0 - 1.0);
        let jittered = (delay.as_secs_f64() + offset).max(0.0);
        Duration::from_secs_f64(jittered).min(self.max_delay.max(self.base_delay))
    }
}
