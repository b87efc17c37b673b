//! Inference error types.
//!
//! [`ProviderError`] describes a single failed attempt against one provider
//! and carries the [`FailureClass`] that drives the retry/failover decision.
//! [`InferenceError`] is reserved for problems that are not provider
//! failures at all, such as an unknown model or an unreadable catalog.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// How a provider attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Timeout,
    Connection,
    Other,
}

impl FailureClass {
    /// Timeouts and connection failures are retried on the same provider.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connection)
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{class} error from provider: {message}")]
pub struct ProviderError {
    pub class: FailureClass,
    pub message: String,
    pub status: Option<u16>,
}

impl ProviderError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Timeout,
            message: message.into(),
            status: None,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Connection,
            message: message.into(),
            status: None,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Other,
            message: message.into(),
            status: None,
        }
    }

    /// Classifies a non-success HTTP status.
    ///
    /// 408 and 504 are timeouts. 429, 502 and 503 mean the provider is
    /// temporarily unreachable and are treated as connection failures.
    /// Everything else is terminal for the provider.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let class = match status {
            408 | 504 => FailureClass::Timeout,
            429 | 502 | 503 => FailureClass::Connection,
            _ => FailureClass::Other,
        };
        Self {
            class,
            message: format!("HTTP {}: {}", status, body.into()),
            status: Some(status),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else if err.is_connect() {
            Self::connection(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else {
            Self::other(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Catalog error: {0}")]
    Catalog(#[from] llm_eval_core::CoreError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, InferenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ProviderError::from_status(408, "").class, FailureClass::Timeout);
        assert_eq!(ProviderError::from_status(504, "").class, FailureClass::Timeout);
        assert_eq!(ProviderError::from_status(503, "").class, FailureClass::Connection);
        assert_eq!(ProviderError::from_status(400, "").class, FailureClass::Other);
        assert_eq!(ProviderError::from_status(401, "").class, FailureClass::Other);
    }

    #[test]
    fn test_transient_classes() {
        assert!(FailureClass::Timeout.is_transient());
        assert!(FailureClass::Connection.is_transient());
        assert!(!FailureClass::Other.is_transient());
    }
}
