use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::json;

use llm_eval_core::{PatternCombinator, RegexCondition, RegexEvaluatorConfig};

use super::{EvaluationContext, EvaluationError, EvaluationOutcome, EvaluationResult, ScoringStrategy};

/// Pattern checks against the model response.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexStrategy;

#[async_trait]
impl ScoringStrategy for RegexStrategy {
    type Config = RegexEvaluatorConfig;

    async fn evaluate(&self, config: &Self::Config, ctx: &EvaluationContext<'_>) -> EvaluationResult {
        if config.patterns.is_empty() {
            return Err(EvaluationError::Configuration("no patterns".to_string()));
        }

        let mut matched = Vec::with_capacity(config.patterns.len());
        for pattern in &config.patterns {
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(config.case_insensitive)
                .build()
                .map_err(|e| EvaluationError::Configuration(format!("pattern {pattern:?}: {e}")))?;
            matched.push(regex.is_match(ctx.response));
        }

        let found = match config.combinator {
            PatternCombinator::All => matched.iter().all(|m| *m),
            PatternCombinator::Any => matched.iter().any(|m| *m),
        };
        let passed = match config.condition {
            RegexCondition::Match => found,
            RegexCondition::NoMatch => !found,
        };

        let max_score = ctx.test_case.max_score;
        let score = if passed { config.score } else { config.fail_score }.clamp(0.0, max_score);
        let hits = matched.iter().filter(|m| **m).count();

        Ok(EvaluationOutcome::Scored {
            score,
            justification: format!(
                "{hits}/{} patterns matched; condition {}",
                matched.len(),
                if passed { "met" } else { "not met" }
            ),
            metadata: json!({
                "matched": matched,
                "passed": passed,
            }),
        })
    }
}
