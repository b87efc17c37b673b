//! Exponential backoff between attempts on the same provider.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Attempts per provider before failing over.
    pub max_attempts: usize,
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub multiplier: f64,
    #[serde(default)]
    pub jitter: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: JitterStrategy::Equal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    None,
    /// Random value between 0 and the computed delay.
    Full,
    /// Half the delay plus a random half.
    #[default]
    Equal,
}

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: RetryConfig,
}

impl ExponentialBackoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> usize {
        self.config.max_attempts.max(1)
    }

    /// Delay before retry number `attempt` (zero-based). `None` once the
    /// attempt budget is spent.
    pub fn next_delay(&self, attempt: usize) -> Option<Duration> {
        if attempt + 1 >= self.max_attempts() {
            return None;
        }
        let base = self.config.initial_delay.as_secs_f64()
            * self.config.multiplier.powi(attempt as i32);
        let capped = Duration::from_secs_f64(base.min(self.config.max_delay.as_secs_f64()));
        Some(self.apply_jitter(capped))
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        match self.config.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                let jitter = rand::random::<f64>();
                Duration::from_secs_f64(delay.as_secs_f64() * jitter)
            }
            JitterStrategy::Equal => {
                let jitter = rand::random::<f64>();
                let half = delay.as_secs_f64() / 2.0;
                Duration::from_secs_f64(half + half * jitter)
            }
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: usize) -> ExponentialBackoff {
        ExponentialBackoff::new(RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            multiplier: 2.0,
            jitter: JitterStrategy::None,
        })
    }

    #[test]
    fn test_delays_grow_then_cap() {
        let p = policy(4);
        assert_eq!(p.next_delay(0), Some(Duration::from_millis(100)));
        assert_eq!(p.next_delay(1), Some(Duration::from_millis(200)));
        assert_eq!(p.next_delay(2), Some(Duration::from_millis(250)));
        assert_eq!(p.next_delay(3), None);
    }

    #[test]
    fn test_single_attempt_never_waits() {
        assert_eq!(policy(1).next_delay(0), None);
        assert_eq!(policy(0).max_attempts(), 1);
    }

    #[test]
    fn test_equal_jitter_bounds() {
        let p = ExponentialBackoff::new(RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: JitterStrategy::Equal,
        });
        for _ in 0..50 {
            let d = p.next_delay(0).unwrap();
            assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(100));
        }
    }
}
