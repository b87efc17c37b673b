use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::ids::TestCaseId;

fn validate_max_score(value: f64) -> Result<(), ValidationError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::new("max_score_must_be_positive"))
    }
}

/// Non-text payload passed alongside a prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attachment {
    Image { url: String, mime_type: Option<String> },
    File { url: String, mime_type: Option<String> },
}

/// Reference answer; may carry attachments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReferenceAnswer {
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeTestData {
    pub input: serde_json::Value,
    pub expected: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct CodeExecutionConfig {
    #[validate(length(min = 1))]
    pub test_data: Vec<CodeTestData>,
    #[validate(range(min = 1, max = 600_000))]
    pub timeout_ms: u64,
    #[validate(range(min = 1, max = 16_384))]
    pub memory_limit_mb: u32,
    /// Function or entry point the harness calls with each input.
    #[serde(default)]
    pub entry_point: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ValidationRules {
    /// Outputs must equal expectations exactly.
    #[serde(default)]
    pub strict_match: bool,
    /// Only surrounding whitespace differences are tolerated.
    #[serde(default)]
    pub whitespace_tolerant: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct TestCase {
    pub id: TestCaseId,
    #[validate(length(min = 1))]
    pub input: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reference: ReferenceAnswer,
    #[validate(custom(function = "validate_max_score"))]
    pub max_score: f64,
    #[serde(default)]
    #[validate(nested)]
    pub code: Option<CodeExecutionConfig>,
    #[serde(default)]
    pub validation: ValidationRules,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl TestCase {
    pub fn new(input: impl Into<String>, max_score: f64) -> Self {
        Self {
            id: TestCaseId::new(),
            input: input.into(),
            system_prompt: None,
            attachments: Vec::new(),
            reference: ReferenceAnswer::default(),
            max_score,
            code: None,
            validation: ValidationRules::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference.text = Some(reference.into());
        self
    }

    pub fn with_code(mut self, code: CodeExecutionConfig) -> Self {
        self.code = Some(code);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_score_must_be_positive() {
        assert!(TestCase::new("2+2?", 10.0).validate().is_ok());
        assert!(TestCase::new("2+2?", 0.0).validate().is_err());
        assert!(TestCase::new("2+2?", -5.0).validate().is_err());
        assert!(TestCase::new("2+2?", f64::NAN).validate().is_err());
    }
}
