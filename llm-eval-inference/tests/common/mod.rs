#![allow(dead_code)]

use async_trait::async_trait;
use llm_eval_core::{
    Catalog, Dimension, DimensionId, Evaluator, EvaluatorId, Model, ModelId, ModelProvider,
    ModelStatus, ProviderBinding, Result, TestCase, TestCaseId,
};
use llm_eval_inference::{InferenceConfig, JitterStrategy, RetryConfig};
use std::time::Duration;

pub struct StaticCatalog {
    pub models: Vec<Model>,
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn get_model(&self, id: &ModelId) -> Result<Option<Model>> {
        Ok(self.models.iter().find(|m| &m.id == id).cloned())
    }

    async fn find_model(&self, logical_name: &str) -> Result<Option<Model>> {
        Ok(self
            .models
            .iter()
            .find(|m| m.logical_name == logical_name)
            .cloned())
    }

    async fn list_models(&self) -> Result<Vec<Model>> {
        Ok(self.models.clone())
    }

    async fn get_test_case(&self, _id: &TestCaseId) -> Result<Option<TestCase>> {
        Ok(None)
    }

    async fn get_dimension(&self, _id: &DimensionId) -> Result<Option<Dimension>> {
        Ok(None)
    }

    async fn get_evaluator(&self, _id: &EvaluatorId) -> Result<Option<Evaluator>> {
        Ok(None)
    }
}

pub fn binding(name: &str, base_url: &str, priority: i32) -> ProviderBinding {
    ProviderBinding {
        name: name.to_string(),
        provider: ModelProvider::OpenAI,
        model_identifier: format!("{}-model", name),
        base_url: base_url.to_string(),
        api_key_env: None,
        priority,
        status: ModelStatus::Active,
    }
}

pub fn fast_config() -> InferenceConfig {
    InferenceConfig::default().with_retry(RetryConfig {
        max_attempts: 2,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
        jitter: JitterStrategy::None,
    })
}
