//! CODE evaluator: runs the response in an external sandbox and scores the
//! fraction of test cases whose output matches.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use llm_eval_core::{CodeEvaluatorConfig, CodeTestData, ValidationRules};

use super::tolerance::{award_score, compare, ToleranceRule};
use super::{EvaluationContext, EvaluationError, EvaluationOutcome, EvaluationResult, ScoringStrategy};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxRequest {
    pub code: String,
    pub language: String,
    pub test_data: Vec<CodeTestData>,
    pub timeout_ms: u64,
    pub memory_limit_mb: u32,
    pub entry_point: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxTestResult {
    pub passed: bool,
    #[serde(default)]
    pub actual: Value,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SandboxResponse {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// One entry per submitted test datum, in order.
    #[serde(default)]
    pub tests: Vec<SandboxTestResult>,
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(default)]
    pub timed_out: bool,
}

/// Code execution service.
#[async_trait]
pub trait SandboxClient: Send + Sync {
    async fn execute(&self, request: &SandboxRequest) -> Result<SandboxResponse, EvaluationError>;
}

/// Talks to a sandbox service over HTTP (`POST {base}/execute`).
#[derive(Debug, Clone)]
pub struct HttpSandboxClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpSandboxClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EvaluationError> {
        let base = Url::parse(base_url)
            .map_err(|e| EvaluationError::Configuration(format!("sandbox url {base_url:?}: {e}")))?;
        let endpoint = base
            .join("execute")
            .map_err(|e| EvaluationError::Configuration(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EvaluationError::Configuration(e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl SandboxClient for HttpSandboxClient {
    async fn execute(&self, request: &SandboxRequest) -> Result<SandboxResponse, EvaluationError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| EvaluationError::Sandbox(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EvaluationError::Sandbox(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        response
            .json::<SandboxResponse>()
            .await
            .map_err(|e| EvaluationError::Sandbox(format!("malformed sandbox reply: {e}")))
    }
}

/// Returns the body of the first fenced code block, if any.
pub fn extract_code_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim_end_matches(['\n', '\r']))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
struct TestCredit {
    credit: f64,
    rule: Option<ToleranceRule>,
}

fn credit_for(
    expected: &Value,
    result: Option<&SandboxTestResult>,
    strict: bool,
    rules: ValidationRules,
) -> TestCredit {
    let none = TestCredit { credit: 0.0, rule: None };
    let Some(result) = result else {
        return none;
    };
    if result.passed {
        return TestCredit {
            credit: 1.0,
            rule: Some(ToleranceRule::Exact),
        };
    }
    if result.error.is_some() {
        return none;
    }

    let matched = compare(expected, &result.actual);
    let accepted = if strict {
        matched.rule == Some(ToleranceRule::Exact)
    } else if rules.whitespace_tolerant {
        matches!(matched.rule, Some(ToleranceRule::Exact | ToleranceRule::Trimmed))
    } else {
        return TestCredit {
            credit: award_score(100.0, matched.confidence) / 100.0,
            rule: matched.rule,
        };
    };

    if accepted {
        TestCredit {
            credit: 1.0,
            rule: matched.rule,
        }
    } else {
        none
    }
}

pub struct CodeStrategy {
    sandbox: Arc<dyn SandboxClient>,
}

impl CodeStrategy {
    pub fn new(sandbox: Arc<dyn SandboxClient>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl ScoringStrategy for CodeStrategy {
    type Config = CodeEvaluatorConfig;

    async fn evaluate(&self, config: &Self::Config, ctx: &EvaluationContext<'_>) -> EvaluationResult {
        let execution = ctx.test_case.code.as_ref().ok_or_else(|| {
            EvaluationError::Configuration("test case has no code execution settings".to_string())
        })?;
        if execution.test_data.is_empty() {
            return Err(EvaluationError::Configuration("test case has no test data".to_string()));
        }

        let code = if config.extract_code_block {
            extract_code_block(ctx.response).unwrap_or(ctx.response)
        } else {
            ctx.response
        };

        let request = SandboxRequest {
            code: code.to_string(),
            language: config.language.clone(),
            test_data: execution.test_data.clone(),
            timeout_ms: execution.timeout_ms,
            memory_limit_mb: execution.memory_limit_mb,
            entry_point: execution.entry_point.clone(),
        };
        let reply = self.sandbox.execute(&request).await?;

        if reply.timed_out {
            return Ok(EvaluationOutcome::Scored {
                score: 0.0,
                justification: format!("execution timed out after {}ms", execution.timeout_ms),
                metadata: json!({
                    "timed_out": true,
                    "execution_time_ms": reply.execution_time_ms,
                }),
            });
        }

        let strict = config.strict || ctx.test_case.validation.strict_match;
        let credits: Vec<TestCredit> = execution
            .test_data
            .iter()
            .enumerate()
            .map(|(i, datum)| {
                credit_for(&datum.expected, reply.tests.get(i), strict, ctx.test_case.validation)
            })
            .collect();

        let mean = credits.iter().map(|c| c.credit).sum::<f64>() / credits.len() as f64;
        let score = mean * ctx.test_case.max_score;
        let passed = reply.tests.iter().filter(|t| t.passed).count();
        let tolerated = credits
            .iter()
            .filter(|c| c.credit > 0.0 && c.rule != Some(ToleranceRule::Exact))
            .count();

        let mut justification = format!("{passed}/{} test cases passed", credits.len());
        if tolerated > 0 {
            justification.push_str(&format!(", {tolerated} accepted with tolerance"));
        }

        Ok(EvaluationOutcome::Scored {
            score,
            justification,
            metadata: json!({
                "tests": credits,
                "exit_code": reply.exit_code,
                "execution_time_ms": reply.execution_time_ms,
                "stderr": reply.stderr.chars().take(500).collect::<String>(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_code_block() {
        let text = "Here you go:\n```python\ndef f(x):\n    return x\n```\nDone.";
        assert_eq!(extract_code_block(text), Some("def f(x):\n    return x"));
        assert_eq!(extract_code_block("no fences"), None);
    }

    #[test]
    fn test_strict_rejects_tolerated_match() {
        let result = SandboxTestResult {
            passed: false,
            actual: json!([25]),
            error: None,
        };
        let strict = credit_for(&json!(25), Some(&result), true, ValidationRules::default());
        let lenient = credit_for(&json!(25), Some(&result), false, ValidationRules::default());
        assert_eq!(strict.credit, 0.0);
        assert_eq!(lenient.credit, 0.95);
    }
}
