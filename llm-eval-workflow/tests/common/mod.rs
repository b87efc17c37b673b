#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use llm_eval_core::{
    Dimension, Evaluator, EvaluatorConfig, Model, ModelProvider, ModelStatus, PatternCombinator,
    ProviderBinding, RegexCondition, RegexEvaluatorConfig, Task, TaskConfig, TestCase, TokenUsage,
};
use llm_eval_inference::{
    FailureClass, InferenceClient, InferenceConfig, InferenceRequest, JitterStrategy,
    ProviderClient, ProviderError, ProviderReply, RetryConfig,
};
use llm_eval_storage::{InMemoryCatalog, InMemoryStore};
use llm_eval_workflow::evaluators::SandboxClient;
use llm_eval_workflow::{ProcessorConfig, ProcessorCore};

#[derive(Clone)]
pub enum Behavior {
    Reply(String),
    Fail(FailureClass),
}

/// Provider whose answers are fixed per binding name.
pub struct ScriptedProvider {
    script: Mutex<HashMap<String, Behavior>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<(&str, Behavior)>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|(name, b)| (name.to_string(), b))
                    .collect(),
            ),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set(&self, name: &str, behavior: Behavior) {
        self.script.lock().unwrap().insert(name.to_string(), behavior);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn complete(
        &self,
        binding: &ProviderBinding,
        _request: &InferenceRequest,
    ) -> Result<ProviderReply, ProviderError> {
        self.calls.lock().unwrap().push(binding.name.clone());
        let behavior = self.script.lock().unwrap().get(&binding.name).cloned();
        match behavior {
            Some(Behavior::Reply(content)) => Ok(ProviderReply {
                content,
                usage: TokenUsage {
                    prompt_tokens: 20,
                    completion_tokens: 5,
                    reasoning_tokens: 0,
                },
                finish_reason: Some("stop".to_string()),
            }),
            Some(Behavior::Fail(FailureClass::Timeout)) => Err(ProviderError::timeout("slow")),
            Some(Behavior::Fail(FailureClass::Connection)) => {
                Err(ProviderError::connection("refused"))
            }
            Some(Behavior::Fail(FailureClass::Other)) | None => {
                Err(ProviderError::from_status(400, "bad request"))
            }
        }
    }
}

pub fn binding(name: &str, priority: i32) -> ProviderBinding {
    ProviderBinding {
        name: name.to_string(),
        provider: ModelProvider::OpenAI,
        model_identifier: format!("{name}-model"),
        base_url: "http://127.0.0.1:9".to_string(),
        api_key_env: None,
        priority,
        status: ModelStatus::Active,
    }
}

pub fn model(logical_name: &str, bindings: &[&str]) -> Model {
    Model::new(
        logical_name,
        bindings
            .iter()
            .enumerate()
            .map(|(i, name)| binding(name, i as i32 + 1))
            .collect(),
    )
}

pub fn regex_evaluator(pattern: &str, score: f64) -> Evaluator {
    Evaluator::new(
        "contains-answer",
        EvaluatorConfig::Regex(RegexEvaluatorConfig {
            patterns: vec![pattern.to_string()],
            condition: RegexCondition::Match,
            combinator: PatternCombinator::All,
            case_insensitive: false,
            score,
            fail_score: 0.0,
        }),
    )
}

pub fn fast_inference() -> InferenceConfig {
    InferenceConfig::default().with_retry(RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        multiplier: 2.0,
        jitter: JitterStrategy::None,
    })
}

pub fn task(models: &[&Model], test_cases: &[&TestCase], dimensions: &[&Dimension]) -> Task {
    Task::new(
        "nightly-eval",
        TaskConfig {
            models: models.iter().map(|m| m.id).collect(),
            test_cases: test_cases.iter().map(|t| t.id).collect(),
            dimensions: dimensions.iter().map(|d| d.id).collect(),
            ..Default::default()
        },
    )
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub catalog: Arc<InMemoryCatalog>,
    pub provider: Arc<ScriptedProvider>,
    pub core: Arc<ProcessorCore>,
}

impl Harness {
    pub fn new(catalog: InMemoryCatalog, provider: Arc<ScriptedProvider>) -> Self {
        Self::with_options(catalog, provider, None, ProcessorConfig::default())
    }

    pub fn with_options(
        catalog: InMemoryCatalog,
        provider: Arc<ScriptedProvider>,
        sandbox: Option<Arc<dyn SandboxClient>>,
        config: ProcessorConfig,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let catalog = Arc::new(catalog);
        let inference =
            InferenceClient::with_provider(catalog.clone(), provider.clone(), fast_inference());
        let core = Arc::new(ProcessorCore::new(
            store.clone(),
            catalog.clone(),
            inference,
            sandbox,
            config,
        ));
        Self {
            store,
            catalog,
            provider,
            core,
        }
    }
}
