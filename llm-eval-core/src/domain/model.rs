use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::ids::ModelId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    OpenAI,
    Anthropic,
    Azure,
    Local,
    /// Any server speaking the OpenAI chat-completions wire format.
    Custom,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    #[default]
    Active,
    Inactive,
    Maintenance,
}

/// One concrete provider a logical model can be served by.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct ProviderBinding {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub provider: ModelProvider,
    /// Model identifier sent to the provider API.
    #[validate(length(min = 1, max = 255))]
    pub model_identifier: String,
    #[validate(url)]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Lower is tried first.
    pub priority: i32,
    #[serde(default)]
    pub status: ModelStatus,
}

fn default_concurrent_limit() -> u32 {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct Model {
    pub id: ModelId,
    /// User-facing identity used to resolve the failover chain.
    #[validate(length(min = 1, max = 255))]
    pub logical_name: String,
    #[validate(length(min = 1), nested)]
    pub providers: Vec<ProviderBinding>,
    #[validate(range(min = 1))]
    #[serde(default = "default_concurrent_limit")]
    pub concurrent_limit: u32,
    #[serde(default)]
    pub success_rate: Option<f64>,
    #[serde(default)]
    pub status: ModelStatus,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn new(logical_name: impl Into<String>, providers: Vec<ProviderBinding>) -> Self {
        let now = Utc::now();
        Self {
            id: ModelId::new(),
            logical_name: logical_name.into(),
            providers,
            concurrent_limit: default_concurrent_limit(),
            success_rate: None,
            status: ModelStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_concurrent_limit(mut self, limit: u32) -> Self {
        self.concurrent_limit = limit;
        self
    }

    /// Active bindings ordered by priority, lowest first.
    pub fn failover_chain(&self) -> Vec<&ProviderBinding> {
        if self.status != ModelStatus::Active {
            return Vec::new();
        }
        let mut chain: Vec<&ProviderBinding> = self
            .providers
            .iter()
            .filter(|p| p.status == ModelStatus::Active)
            .collect();
        chain.sort_by_key(|p| p.priority);
        chain
    }
}
