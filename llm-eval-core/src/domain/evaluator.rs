use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::EvaluatorId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluatorType {
    Prompt,
    Regex,
    Code,
    Human,
}

impl EvaluatorType {
    /// Tie-breaker within equal execution priority; code runs first.
    pub fn dispatch_priority(&self) -> u8 {
        match self {
            EvaluatorType::Code => 0,
            EvaluatorType::Regex => 1,
            EvaluatorType::Prompt => 2,
            EvaluatorType::Human => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluatorType::Prompt => "PROMPT",
            EvaluatorType::Regex => "REGEX",
            EvaluatorType::Code => "CODE",
            EvaluatorType::Human => "HUMAN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "PROMPT" => EvaluatorType::Prompt,
            "REGEX" => EvaluatorType::Regex,
            "CODE" => EvaluatorType::Code,
            "HUMAN" => EvaluatorType::Human,
            _ => return None,
        })
    }
}

// ===== Per-type configuration =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptEvaluatorConfig {
    /// Logical model used as the judge.
    pub judge_model: String,
    /// Template with `{{input}}`, `{{response}}`, `{{reference}}`,
    /// `{{dimension}}`, `{{criteria}}`, `{{min_score}}` and `{{max_score}}` placeholders.
    pub prompt_template: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub min_score: f64,
    pub max_score: f64,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegexCondition {
    #[default]
    Match,
    NoMatch,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PatternCombinator {
    #[default]
    All,
    Any,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegexEvaluatorConfig {
    pub patterns: Vec<String>,
    #[serde(default)]
    pub condition: RegexCondition,
    #[serde(default)]
    pub combinator: PatternCombinator,
    #[serde(default)]
    pub case_insensitive: bool,
    /// Awarded when the condition holds.
    pub score: f64,
    /// Awarded otherwise.
    #[serde(default)]
    pub fail_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeEvaluatorConfig {
    pub language: String,
    /// Run only the first fenced code block of the response.
    #[serde(default)]
    pub extract_code_block: bool,
    /// Disables the output-tolerance comparator for every test case.
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HumanEvaluatorConfig {
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Evaluator payload, tagged by type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluatorConfig {
    Prompt(PromptEvaluatorConfig),
    Regex(RegexEvaluatorConfig),
    Code(CodeEvaluatorConfig),
    Human(HumanEvaluatorConfig),
}

impl EvaluatorConfig {
    pub fn evaluator_type(&self) -> EvaluatorType {
        match self {
            EvaluatorConfig::Prompt(_) => EvaluatorType::Prompt,
            EvaluatorConfig::Regex(_) => EvaluatorType::Regex,
            EvaluatorConfig::Code(_) => EvaluatorType::Code,
            EvaluatorConfig::Human(_) => EvaluatorType::Human,
        }
    }
}

/// Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluator {
    pub id: EvaluatorId,
    pub name: String,
    pub config: EvaluatorConfig,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Evaluator {
    pub fn new(name: impl Into<String>, config: EvaluatorConfig) -> Self {
        Self {
            id: EvaluatorId::new(),
            name: name.into(),
            config,
            created_at: Utc::now(),
        }
    }

    pub fn evaluator_type(&self) -> EvaluatorType {
        self.config.evaluator_type()
    }
}
