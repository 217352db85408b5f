use rand::Rng;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum RetryError {
    #[error("Invalid retry configuration: {0}")]
    InvalidConfig(String),
}

/// Capped exponential backoff: `base * 2^retry`, never above `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Backoff {
    pub const fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (0 for the first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        let multiplier = 1_u32.checked_shl(retry).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter {
            self.apply_jitter(delay)
        } else {
            delay
        }
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        let mut rng = rand::rng();
        let jitter_factor = rng.random_range(0.5..1.5); // ±50% jitter
        // Never earlier than the base delay, never later than the cap
        delay
            .mul_f64(jitter_factor)
            .min(self.max_delay)
            .max(self.base_delay)
    }

    pub fn validate(&self) -> Result<(), RetryError> {
        if self.base_delay.is_zero() {
            return Err(RetryError::InvalidConfig(
                "base delay must be greater than 0".to_string(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(RetryError::InvalidConfig(format!(
                "base delay {:?} exceeds max delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Publish retry rules: how many attempts a task gets and how long it is
/// parked between them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Result<Self, RetryError> {
        if max_attempts == 0 {
            return Err(RetryError::InvalidConfig(
                "max attempts must be greater than 0".to_string(),
            ));
        }
        backoff.validate()?;

        Ok(Self {
            max_attempts,
            backoff,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// What to do after `attempts` publish calls have failed retryably.
    pub fn decide(&self, attempts: u32) -> RetryDecision {
        if attempts >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            RetryDecision::RetryAfter(self.backoff.delay(attempts.saturating_sub(1)))
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::new(Duration::from_millis(500), Duration::from_secs(10))
                .with_jitter(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_timing() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(30));

        let delays = (0..5).map(|retry| backoff.delay(retry)).collect::<Vec<_>>();

        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(delays[1], Duration::from_millis(200));
        assert_eq!(delays[2], Duration::from_millis(400));
        assert_eq!(delays[3], Duration::from_millis(800));
        assert_eq!(delays[4], Duration::from_millis(1600));
    }

    #[test]
    fn test_max_delay_cap() {
        let backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(10));

        assert_eq!(backoff.delay(5), Duration::from_secs(10));
        assert_eq!(backoff.delay(40), Duration::from_secs(10));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let backoff =
            Backoff::new(Duration::from_millis(100), Duration::from_secs(10)).with_jitter(true);

        for _ in 0..100 {
            let delay = backoff.delay(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(300));
        }
    }

    #[test]
    fn test_jitter_never_undercuts_base_delay() {
        let backoff =
            Backoff::new(Duration::from_millis(500), Duration::from_secs(10)).with_jitter(true);

        for _ in 0..200 {
            let delay = backoff.delay(0);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay < Duration::from_millis(750));
        }
    }

    #[test]
    fn test_give_up_after_max_attempts() {
        let policy = RetryPolicy::new(
            3,
            Backoff::new(Duration::from_millis(500), Duration::from_secs(10)),
        )
        .unwrap();

        assert_eq!(
            policy.decide(1),
            RetryDecision::RetryAfter(Duration::from_millis(500))
        );
        assert_eq!(
            policy.decide(2),
            RetryDecision::RetryAfter(Duration::from_millis(1000))
        );
        assert_eq!(policy.decide(3), RetryDecision::GiveUp);
    }

    #[test]
    fn test_invalid_policies_rejected() {
        let backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(10));
        assert!(RetryPolicy::new(0, backoff).is_err());

        let inverted = Backoff::new(Duration::from_secs(20), Duration::from_secs(10));
        assert!(RetryPolicy::new(3, inverted).is_err());
    }
}
