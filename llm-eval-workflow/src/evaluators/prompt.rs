use async_trait::async_trait;
use serde_json::json;

use llm_eval_core::PromptEvaluatorConfig;
use llm_eval_inference::{InferenceClient, InferenceError, InferenceOutcome, InferenceRequest};

use super::score_parser::parse_score;
use super::{EvaluationContext, EvaluationError, EvaluationOutcome, EvaluationResult, ScoringStrategy};

const EXCERPT_CHARS: usize = 200;

/// LLM-as-judge scoring.
#[derive(Clone)]
pub struct PromptStrategy {
    judge: InferenceClient,
}

impl PromptStrategy {
    pub fn new(judge: InferenceClient) -> Self {
        Self { judge }
    }
}

/// Fills the template placeholders from the evaluation context.
pub fn render_prompt(config: &PromptEvaluatorConfig, ctx: &EvaluationContext<'_>) -> String {
    let min_score = config.min_score.to_string();
    let max_score = config.max_score.to_string();
    let placeholders: [(&str, &str); 7] = [
        ("{{input}}", &ctx.test_case.input),
        ("{{response}}", ctx.response),
        ("{{reference}}", ctx.test_case.reference.text.as_deref().unwrap_or("")),
        ("{{dimension}}", &ctx.dimension.name),
        ("{{criteria}}", ctx.dimension.criteria.as_deref().unwrap_or("")),
        ("{{min_score}}", &min_score),
        ("{{max_score}}", &max_score),
    ];
    placeholders
        .into_iter()
        .fold(config.prompt_template.clone(), |acc, (placeholder, value)| {
            acc.replace(placeholder, value)
        })
}

fn excerpt(text: &str) -> String {
    text.chars().take(EXCERPT_CHARS).collect()
}

#[async_trait]
impl ScoringStrategy for PromptStrategy {
    type Config = PromptEvaluatorConfig;

    async fn evaluate(&self, config: &Self::Config, ctx: &EvaluationContext<'_>) -> EvaluationResult {
        let (min, max) = (config.min_score, config.max_score);
        if !(max > min) {
            return Err(EvaluationError::Configuration(format!(
                "judge score range [{min}, {max}] is empty"
            )));
        }

        let mut request = InferenceRequest::new(render_prompt(config, ctx));
        if let Some(system_prompt) = &config.system_prompt {
            request = request.with_system_prompt(system_prompt.clone());
        }
        if let Some(temperature) = config.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = config.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        let outcome = self
            .judge
            .complete(&config.judge_model, &request)
            .await
            .map_err(|e| match e {
                InferenceError::ModelNotFound(name) => {
                    EvaluationError::Configuration(format!("unknown judge model {name}"))
                }
                other => EvaluationError::Judge(other.to_string()),
            })?;

        let reply = match outcome {
            InferenceOutcome::Completed(reply) => reply,
            unavailable => {
                return Err(EvaluationError::Judge(
                    unavailable.failure_summary().unwrap_or_default(),
                ))
            }
        };

        let parsed = parse_score(&reply.content, min, max)
            .ok_or_else(|| EvaluationError::UnparseableScore(excerpt(&reply.content)))?;
        let score = (parsed.value - min) / (max - min) * ctx.test_case.max_score;

        tracing::debug!(
            judge = %config.judge_model,
            raw = parsed.value,
            score,
            "Judge score parsed"
        );

        Ok(EvaluationOutcome::Scored {
            score,
            justification: reply.content.trim().to_string(),
            metadata: json!({
                "judge_model": config.judge_model,
                "judge_provider": reply.provider,
                "judge_score": parsed.value,
                "score_format": parsed.format,
                "judge_tokens": reply.usage.total(),
            }),
        })
    }
}
