//! Evaluator Engine: one entry point, four scoring strategies.
//!
//! The engine matches on the evaluator's config tag and hands the typed
//! config to the matching [`ScoringStrategy`].

pub mod code;
pub mod human;
pub mod prompt;
pub mod regex;
pub mod score_parser;
pub mod tolerance;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use llm_eval_core::{Dimension, Evaluator, EvaluatorConfig, TestCase};
use llm_eval_inference::{InferenceClient, ProviderStatsSnapshot};

pub use code::{CodeStrategy, HttpSandboxClient, SandboxClient, SandboxRequest, SandboxResponse, SandboxTestResult};
pub use human::HumanStrategy;
pub use prompt::PromptStrategy;
pub use regex::RegexStrategy;
pub use tolerance::{award_score, compare, ToleranceMatch, ToleranceRule};

/// Everything a strategy may look at when scoring one model response.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub test_case: &'a TestCase,
    pub response: &'a str,
    pub dimension: &'a Dimension,
    pub evaluator: &'a Evaluator,
    /// Stats of the provider that produced `response`.
    pub model_stats: Option<&'a ProviderStatsSnapshot>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    /// Raw score on the test case's `[0, max_score]` scale.
    Scored {
        score: f64,
        justification: String,
        metadata: Value,
    },
    /// No automatic score; a reviewer must submit one.
    HumanReview { instructions: Option<String> },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Judge call failed: {0}")]
    Judge(String),

    #[error("Sandbox execution failed: {0}")]
    Sandbox(String),

    #[error("Evaluator misconfigured: {0}")]
    Configuration(String),

    #[error("Could not extract a score: {0}")]
    UnparseableScore(String),
}

impl EvaluationError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, EvaluationError::Configuration(_))
    }
}

pub type EvaluationResult = Result<EvaluationOutcome, EvaluationError>;

#[async_trait]
pub trait ScoringStrategy: Send + Sync {
    type Config: Send + Sync;

    async fn evaluate(&self, config: &Self::Config, ctx: &EvaluationContext<'_>) -> EvaluationResult;
}

pub struct EvaluatorEngine {
    prompt: PromptStrategy,
    regex: RegexStrategy,
    code: Option<CodeStrategy>,
    human: HumanStrategy,
}

impl EvaluatorEngine {
    /// `judge` serves PROMPT evaluators. Without a sandbox, CODE evaluators
    /// fail with a configuration error.
    pub fn new(judge: InferenceClient, sandbox: Option<Arc<dyn SandboxClient>>) -> Self {
        Self {
            prompt: PromptStrategy::new(judge),
            regex: RegexStrategy,
            code: sandbox.map(CodeStrategy::new),
            human: HumanStrategy,
        }
    }

    pub async fn evaluate(&self, ctx: &EvaluationContext<'_>) -> EvaluationResult {
        match &ctx.evaluator.config {
            EvaluatorConfig::Prompt(cfg) => self.prompt.evaluate(cfg, ctx).await,
            EvaluatorConfig::Regex(cfg) => self.regex.evaluate(cfg, ctx).await,
            EvaluatorConfig::Code(cfg) => match &self.code {
                Some(strategy) => strategy.evaluate(cfg, ctx).await,
                None => Err(EvaluationError::Configuration(
                    "no sandbox configured for code evaluation".to_string(),
                )),
            },
            EvaluatorConfig::Human(cfg) => self.human.evaluate(cfg, ctx).await,
        }
    }
}
