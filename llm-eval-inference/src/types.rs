use serde::{Deserialize, Serialize};
use std::time::Duration;

use llm_eval_core::{Attachment, TokenUsage};

use crate::error::FailureClass;

/// A single prompt sent to whichever provider serves the model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InferenceRequest {
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Overrides the configured per-attempt timeout.
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl InferenceRequest {
    pub fn new(user_prompt: impl Into<String>) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferenceResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub finish_reason: Option<String>,
    /// Wall time of the successful attempt.
    pub latency_ms: u64,
    /// Name of the binding that answered.
    pub provider: String,
    pub model_identifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptFailure {
    pub provider: String,
    pub attempt: usize,
    pub class: FailureClass,
    pub message: String,
}

/// Result of walking a failover chain.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutcome {
    Completed(InferenceResponse),
    /// Every provider was exhausted. `attempts` lists what was tried, in
    /// order.
    Unavailable { attempts: Vec<AttemptFailure> },
}

impl InferenceOutcome {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    pub fn into_response(self) -> Option<InferenceResponse> {
        match self {
            Self::Completed(response) => Some(response),
            Self::Unavailable { .. } => None,
        }
    }

    /// One-line summary of the failures, for error messages.
    pub fn failure_summary(&self) -> Option<String> {
        match self {
            Self::Completed(_) => None,
            Self::Unavailable { attempts } if attempts.is_empty() => {
                Some("no active provider bindings".to_string())
            }
            Self::Unavailable { attempts } => Some(
                attempts
                    .iter()
                    .map(|a| format!("{}#{} {}: {}", a.provider, a.attempt + 1, a.class, a.message))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
        }
    }
}
