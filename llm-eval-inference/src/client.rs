//! Failover across a model's provider chain.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use llm_eval_core::{Catalog, Model, ProviderBinding};

use crate::config::InferenceConfig;
use crate::error::{InferenceError, ProviderError, Result};
use crate::provider::{HttpProviderClient, ProviderClient, ProviderReply};
use crate::retry::ExponentialBackoff;
use crate::stats::ProviderStats;
use crate::types::{AttemptFailure, InferenceOutcome, InferenceRequest, InferenceResponse};

#[derive(Clone)]
pub struct InferenceClient {
    catalog: Arc<dyn Catalog>,
    provider: Arc<dyn ProviderClient>,
    config: InferenceConfig,
    backoff: ExponentialBackoff,
    stats: Arc<ProviderStats>,
}

impl InferenceClient {
    /// Creates a client that talks HTTP to the configured providers.
    pub fn new(catalog: Arc<dyn Catalog>, config: InferenceConfig) -> Result<Self> {
        config.validate()?;
        let provider = Arc::new(HttpProviderClient::new(&config)?);
        Ok(Self::with_provider(catalog, provider, config))
    }

    pub fn with_provider(
        catalog: Arc<dyn Catalog>,
        provider: Arc<dyn ProviderClient>,
        config: InferenceConfig,
    ) -> Self {
        let backoff = ExponentialBackoff::new(config.retry.clone());
        Self {
            catalog,
            provider,
            config,
            backoff,
            stats: Arc::new(ProviderStats::new()),
        }
    }

    pub fn stats(&self) -> &ProviderStats {
        &self.stats
    }

    /// Resolves `logical_name` and walks its failover chain.
    pub async fn complete(
        &self,
        logical_name: &str,
        request: &InferenceRequest,
    ) -> Result<InferenceOutcome> {
        let model = self
            .catalog
            .find_model(logical_name)
            .await?
            .ok_or_else(|| InferenceError::ModelNotFound(logical_name.to_string()))?;
        Ok(self.complete_with_model(&model, request).await)
    }

    /// Walks the chain of an already-resolved model.
    pub async fn complete_with_model(
        &self,
        model: &Model,
        request: &InferenceRequest,
    ) -> InferenceOutcome {
        let chain = model.failover_chain();
        let mut attempts = Vec::new();

        for binding in chain {
            if let Some(response) = self.try_binding(binding, request, &mut attempts).await {
                return InferenceOutcome::Completed(response);
            }
        }

        warn!(
            model = %model.logical_name,
            attempts = attempts.len(),
            "All providers exhausted"
        );
        InferenceOutcome::Unavailable { attempts }
    }

    async fn try_binding(
        &self,
        binding: &ProviderBinding,
        request: &InferenceRequest,
        failures: &mut Vec<AttemptFailure>,
    ) -> Option<InferenceResponse> {
        let timeout = request.timeout.unwrap_or_else(|| self.config.attempt_timeout());

        for attempt in 0..self.backoff.max_attempts() {
            let started = Instant::now();
            let result = tokio::time::timeout(timeout, self.provider.complete(binding, request))
                .await
                .unwrap_or_else(|_| {
                    Err(ProviderError::timeout(format!(
                        "no response within {}ms",
                        timeout.as_millis()
                    )))
                });
            let latency_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(reply) => {
                    self.stats.record_success(&binding.name, latency_ms);
                    info!(
                        provider = %binding.name,
                        model = %binding.model_identifier,
                        attempt = attempt + 1,
                        latency_ms,
                        "Inference completed"
                    );
                    return Some(Self::response(binding, reply, latency_ms));
                }
                Err(err) => {
                    self.stats.record_failure(&binding.name, err.class);
                    warn!(
                        provider = %binding.name,
                        attempt = attempt + 1,
                        class = %err.class,
                        error = %err.message,
                        "Provider attempt failed"
                    );
                    let class = err.class;
                    failures.push(AttemptFailure {
                        provider: binding.name.clone(),
                        attempt,
                        class,
                        message: err.message,
                    });

                    if !class.is_transient() {
                        debug!(provider = %binding.name, "Failing over without retry");
                        return None;
                    }
                    match self.backoff.next_delay(attempt) {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => return None,
                    }
                }
            }
        }
        None
    }

    fn response(binding: &ProviderBinding, reply: ProviderReply, latency_ms: u64) -> InferenceResponse {
        InferenceResponse {
            content: reply.content,
            usage: reply.usage,
            finish_reason: reply.finish_reason,
            latency_ms,
            provider: binding.name.clone(),
            model_identifier: binding.model_identifier.clone(),
        }
    }

    /// Logical names of active models none of whose active bindings has its
    /// credential available.
    pub async fn models_without_credentials(&self) -> Result<Vec<String>> {
        let models = self.catalog.list_models().await?;
        Ok(models
            .iter()
            .filter(|m| m.status == llm_eval_core::ModelStatus::Active)
            .filter(|m| {
                !m.failover_chain().iter().any(|b| match &b.api_key_env {
                    None => true,
                    Some(var) => std::env::var(var).map_or(false, |v| !v.is_empty()),
                })
            })
            .map(|m| m.logical_name.clone())
            .collect())
    }
}
