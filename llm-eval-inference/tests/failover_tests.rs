mod common;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use llm_eval_core::{Model, ProviderBinding, TokenUsage};
use llm_eval_inference::provider::ProviderReply;
use llm_eval_inference::{
    FailureClass, InferenceClient, InferenceError, InferenceOutcome, InferenceRequest,
    ProviderClient, ProviderError,
};

use common::{binding, fast_config, StaticCatalog};

#[derive(Clone)]
enum Behavior {
    Fail(FailureClass),
    Hang,
    Succeed(ProviderReply),
}

/// Scripted provider: each binding name maps to a fixed behavior.
struct ScriptedProvider {
    script: HashMap<String, Behavior>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new(script: Vec<(&str, Behavior)>) -> Arc<Self> {
        Arc::new(Self {
            script: script
                .into_iter()
                .map(|(name, b)| (name.to_string(), b))
                .collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
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
        match self.script.get(&binding.name).cloned() {
            Some(Behavior::Succeed(reply)) => Ok(reply),
            Some(Behavior::Fail(FailureClass::Timeout)) => Err(ProviderError::timeout("slow")),
            Some(Behavior::Fail(FailureClass::Connection)) => {
                Err(ProviderError::connection("refused"))
            }
            Some(Behavior::Fail(FailureClass::Other)) | None => {
                Err(ProviderError::from_status(400, "bad request"))
            }
            Some(Behavior::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProviderError::other("unreachable"))
            }
        }
    }
}

fn reply() -> ProviderReply {
    ProviderReply {
        content: "4".to_string(),
        usage: TokenUsage {
            prompt_tokens: 12,
            completion_tokens: 3,
            reasoning_tokens: 0,
        },
        finish_reason: Some("stop".to_string()),
    }
}

fn model() -> Model {
    Model::new(
        "gpt",
        vec![
            binding("p2", "http://p2.invalid/v1", 2),
            binding("p1", "http://p1.invalid/v1", 1),
        ],
    )
}

fn client(provider: Arc<ScriptedProvider>) -> InferenceClient {
    let catalog = Arc::new(StaticCatalog {
        models: vec![model()],
    });
    InferenceClient::with_provider(catalog, provider, fast_config())
}

#[tokio::test]
async fn test_timeout_retries_then_fails_over() {
    let provider = ScriptedProvider::new(vec![
        ("p1", Behavior::Fail(FailureClass::Timeout)),
        ("p2", Behavior::Succeed(reply())),
    ]);
    let client = client(provider.clone());

    let outcome = client
        .complete("gpt", &InferenceRequest::new("2 + 2?"))
        .await
        .unwrap();

    assert_eq!(provider.calls(), vec!["p1", "p1", "p2"]);
    let response = outcome.into_response().unwrap();
    assert_eq!(response.provider, "p2");
    assert_eq!(response.model_identifier, "p2-model");
    assert_eq!(response.usage.total(), 15);
    assert_eq!(response.finish_reason.as_deref(), Some("stop"));

    let p1 = client.stats().snapshot("p1").unwrap();
    assert_eq!(p1.timeouts, 2);
    assert_eq!(client.stats().snapshot("p2").unwrap().successes, 1);
}

#[tokio::test]
async fn test_other_failure_skips_remaining_attempts() {
    let provider = ScriptedProvider::new(vec![
        ("p1", Behavior::Fail(FailureClass::Other)),
        ("p2", Behavior::Succeed(reply())),
    ]);
    let client = client(provider.clone());

    let outcome = client
        .complete("gpt", &InferenceRequest::new("2 + 2?"))
        .await
        .unwrap();

    assert!(!outcome.is_unavailable());
    assert_eq!(provider.calls(), vec!["p1", "p2"]);
}

#[tokio::test]
async fn test_connection_failure_is_retried() {
    let provider = ScriptedProvider::new(vec![
        ("p1", Behavior::Fail(FailureClass::Connection)),
        ("p2", Behavior::Fail(FailureClass::Connection)),
    ]);
    let client = client(provider.clone());

    let outcome = client
        .complete("gpt", &InferenceRequest::new("2 + 2?"))
        .await
        .unwrap();

    assert_eq!(provider.calls(), vec!["p1", "p1", "p2", "p2"]);
    match outcome {
        InferenceOutcome::Unavailable { attempts } => {
            assert_eq!(attempts.len(), 4);
            assert!(attempts.iter().all(|a| a.class == FailureClass::Connection));
        }
        other => panic!("expected unavailable, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_hung_provider_hits_attempt_timeout() {
    let provider = ScriptedProvider::new(vec![
        ("p1", Behavior::Hang),
        ("p2", Behavior::Succeed(reply())),
    ]);
    let client = client(provider.clone());
    let request = InferenceRequest::new("2 + 2?").with_timeout(Duration::from_secs(5));

    let outcome = client.complete("gpt", &request).await.unwrap();

    assert_eq!(outcome.into_response().unwrap().provider, "p2");
    assert_eq!(client.stats().snapshot("p1").unwrap().timeouts, 2);
}

#[tokio::test]
async fn test_exhausted_chain_returns_sentinel() {
    let provider = ScriptedProvider::new(vec![]);
    let client = client(provider);

    let outcome = client
        .complete("gpt", &InferenceRequest::new("2 + 2?"))
        .await
        .unwrap();

    assert!(outcome.is_unavailable());
    let summary = outcome.failure_summary().unwrap();
    assert!(summary.contains("p1#1 other"), "{summary}");
}

#[tokio::test]
async fn test_unknown_model_is_an_error() {
    let client = client(ScriptedProvider::new(vec![]));
    let err = client
        .complete("missing", &InferenceRequest::new("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, InferenceError::ModelNotFound(name) if name == "missing"));
}

#[tokio::test]
async fn test_missing_credentials_reported() {
    let mut m = model();
    for b in &mut m.providers {
        b.api_key_env = Some("LLM_EVAL_TEST_KEY_THAT_IS_NOT_SET".to_string());
    }
    let catalog = Arc::new(StaticCatalog { models: vec![m] });
    let client =
        InferenceClient::with_provider(catalog, ScriptedProvider::new(vec![]), fast_config());

    assert_eq!(client.models_without_credentials().await.unwrap(), vec!["gpt"]);
}
