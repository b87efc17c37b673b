use async_trait::async_trait;

use llm_eval_core::HumanEvaluatorConfig;

use super::{EvaluationContext, EvaluationOutcome, EvaluationResult, ScoringStrategy};

/// Defers scoring to a reviewer.
#[derive(Debug, Clone, Copy, Default)]
pub struct HumanStrategy;

#[async_trait]
impl ScoringStrategy for HumanStrategy {
    type Config = HumanEvaluatorConfig;

    async fn evaluate(&self, config: &Self::Config, _ctx: &EvaluationContext<'_>) -> EvaluationResult {
        Ok(EvaluationOutcome::HumanReview {
            instructions: config.instructions.clone(),
        })
    }
}
