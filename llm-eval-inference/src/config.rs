//! Inference client configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{InferenceError, Result};
use crate::retry::RetryConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InferenceConfig {
    /// Upper bound on a single provider attempt, unless the request
    /// carries its own timeout.
    pub attempt_timeout_secs: u64,

    pub connect_timeout_secs: u64,

    pub retry: RetryConfig,

    pub user_agent: String,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: 60,
            connect_timeout_secs: 10,
            retry: RetryConfig::default(),
            user_agent: format!("llm-eval-engine/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl InferenceConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.attempt_timeout_secs == 0 {
            return Err(InferenceError::Configuration(
                "attempt_timeout_secs must be positive".to_string(),
            ));
        }
        if self.retry.multiplier < 1.0 {
            return Err(InferenceError::Configuration(
                "retry multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}
