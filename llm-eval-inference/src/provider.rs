//! Provider wire formats.
//!
//! OpenAI, Azure, local and custom bindings speak the chat-completions
//! format; Anthropic bindings speak the messages format.

use async_trait::async_trait;
use reqwest::{header, Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use llm_eval_core::{Attachment, ModelProvider, ProviderBinding, TokenUsage};

use crate::config::InferenceConfig;
use crate::error::{InferenceError, ProviderError};
use crate::types::InferenceRequest;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 4096;

/// What a provider returned for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderReply {
    pub content: String,
    pub usage: TokenUsage,
    pub finish_reason: Option<String>,
}

/// One attempt against one provider binding.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn complete(
        &self,
        binding: &ProviderBinding,
        request: &InferenceRequest,
    ) -> Result<ProviderReply, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct HttpProviderClient {
    client: Client,
    /// Used when the request carries no timeout of its own.
    attempt_timeout: Duration,
}

impl HttpProviderClient {
    pub fn new(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            attempt_timeout: config.attempt_timeout(),
        })
    }

    fn endpoint(binding: &ProviderBinding, path: &str) -> Result<Url, ProviderError> {
        let base = binding.base_url.trim_end_matches('/');
        Url::parse(&format!("{}/{}", base, path))
            .map_err(|e| ProviderError::other(format!("invalid base URL {}: {}", binding.base_url, e)))
    }

    fn api_key(binding: &ProviderBinding) -> Result<Option<String>, ProviderError> {
        match &binding.api_key_env {
            None => Ok(None),
            Some(var) => std::env::var(var)
                .map(Some)
                .map_err(|_| ProviderError::other(format!("credential variable {} is not set", var))),
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder, body: Value) -> Result<Value, ProviderError> {
        let response = builder.json(&body).send().await?;
        Self::read_body(response).await
    }

    async fn read_body(response: Response) -> Result<Value, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<Value>().await.map_err(ProviderError::from);
        }
        let text = response.text().await.unwrap_or_default();
        Err(ProviderError::from_status(status.as_u16(), text))
    }

    async fn chat_completions(
        &self,
        binding: &ProviderBinding,
        request: &InferenceRequest,
    ) -> Result<ProviderReply, ProviderError> {
        let url = Self::endpoint(binding, "chat/completions")?;
        let mut builder = self
            .client
            .post(url)
            .timeout(request.timeout.unwrap_or(self.attempt_timeout));
        if let Some(key) = Self::api_key(binding)? {
            builder = match binding.provider {
                ModelProvider::Azure => builder.header("api-key", key),
                _ => builder.bearer_auth(key),
            };
        }

        let body = openai_body(binding, request);
        let value = self.send(builder, body).await?;
        parse_openai(value)
    }

    async fn messages(
        &self,
        binding: &ProviderBinding,
        request: &InferenceRequest,
    ) -> Result<ProviderReply, ProviderError> {
        let url = Self::endpoint(binding, "messages")?;
        let mut builder = self
            .client
            .post(url)
            .timeout(request.timeout.unwrap_or(self.attempt_timeout))
            .header("anthropic-version", ANTHROPIC_VERSION);
        if let Some(key) = Self::api_key(binding)? {
            builder = builder.header("x-api-key", key);
        }

        let body = anthropic_body(binding, request);
        let value = self.send(builder, body).await?;
        parse_anthropic(value)
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn complete(
        &self,
        binding: &ProviderBinding,
        request: &InferenceRequest,
    ) -> Result<ProviderReply, ProviderError> {
        match binding.provider {
            ModelProvider::Anthropic => self.messages(binding, request).await,
            ModelProvider::OpenAI
            | ModelProvider::Azure
            | ModelProvider::Local
            | ModelProvider::Custom => self.chat_completions(binding, request).await,
        }
    }
}

fn openai_body(binding: &ProviderBinding, request: &InferenceRequest) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = &request.system_prompt {
        messages.push(json!({ "role": "system", "content": system }));
    }

    let user_content = if request.attachments.is_empty() {
        json!(request.user_prompt)
    } else {
        let mut parts = vec![json!({ "type": "text", "text": request.user_prompt })];
        for attachment in &request.attachments {
            parts.push(match attachment {
                Attachment::Image { url, .. } => {
                    json!({ "type": "image_url", "image_url": { "url": url } })
                }
                Attachment::File { url, .. } => {
                    json!({ "type": "text", "text": format!("[attachment: {}]", url) })
                }
            });
        }
        Value::Array(parts)
    };
    messages.push(json!({ "role": "user", "content": user_content }));

    let mut body = json!({
        "model": binding.model_identifier,
        "messages": messages,
    });
    if let Some(t) = request.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(m) = request.max_tokens {
        body["max_tokens"] = json!(m);
    }
    body
}

fn anthropic_body(binding: &ProviderBinding, request: &InferenceRequest) -> Value {
    let mut content = vec![json!({ "type": "text", "text": request.user_prompt })];
    for attachment in &request.attachments {
        content.push(match attachment {
            Attachment::Image { url, .. } => {
                json!({ "type": "image", "source": { "type": "url", "url": url } })
            }
            Attachment::File { url, .. } => {
                json!({ "type": "text", "text": format!("[attachment: {}]", url) })
            }
        });
    }

    let mut body = json!({
        "model": binding.model_identifier,
        "max_tokens": request.max_tokens.unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
        "messages": [{ "role": "user", "content": content }],
    });
    if let Some(system) = &request.system_prompt {
        body["system"] = json!(system);
    }
    if let Some(t) = request.temperature {
        body["temperature"] = json!(t);
    }
    body
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    completion_tokens_details: Option<OpenAiCompletionDetails>,
}

#[derive(Deserialize)]
struct OpenAiCompletionDetails {
    #[serde(default)]
    reasoning_tokens: u32,
}

fn parse_openai(value: Value) -> Result<ProviderReply, ProviderError> {
    let parsed: OpenAiResponse = serde_json::from_value(value)
        .map_err(|e| ProviderError::other(format!("malformed chat completion: {}", e)))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::other("chat completion without choices"))?;

    let usage = parsed
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            reasoning_tokens: u.completion_tokens_details.map_or(0, |d| d.reasoning_tokens),
        })
        .unwrap_or_default();

    Ok(ProviderReply {
        content: choice.message.content.unwrap_or_default(),
        usage,
        finish_reason: choice.finish_reason,
    })
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

fn parse_anthropic(value: Value) -> Result<ProviderReply, ProviderError> {
    let parsed: AnthropicResponse = serde_json::from_value(value)
        .map_err(|e| ProviderError::other(format!("malformed messages response: {}", e)))?;

    let content = parsed
        .content
        .into_iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text)
        .collect::<Vec<_>>()
        .join("");

    let usage = parsed
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            reasoning_tokens: 0,
        })
        .unwrap_or_default();

    Ok(ProviderReply {
        content,
        usage,
        finish_reason: parsed.stop_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_eval_core::ModelStatus;

    fn binding(provider: ModelProvider) -> ProviderBinding {
        ProviderBinding {
            name: "primary".to_string(),
            provider,
            model_identifier: "m-1".to_string(),
            base_url: "http://localhost:9/v1/".to_string(),
            api_key_env: None,
            priority: 0,
            status: ModelStatus::Active,
        }
    }

    #[test]
    fn test_openai_body_with_image_uses_parts() {
        let request = InferenceRequest::new("describe")
            .with_system_prompt("be brief")
            .with_attachments(vec![Attachment::Image {
                url: "https://img/1.png".to_string(),
                mime_type: None,
            }]);
        let body = openai_body(&binding(ModelProvider::OpenAI), &request);

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"][1]["type"], "image_url");
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_anthropic_body_defaults_max_tokens() {
        let body = anthropic_body(&binding(ModelProvider::Anthropic), &InferenceRequest::new("hi"));
        assert_eq!(body["max_tokens"], ANTHROPIC_DEFAULT_MAX_TOKENS);
        assert!(body.get("system").is_none());
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let url = HttpProviderClient::endpoint(&binding(ModelProvider::OpenAI), "chat/completions").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9/v1/chat/completions");
    }

    #[test]
    fn test_parse_openai_reads_reasoning_tokens() {
        let reply = parse_openai(json!({
            "choices": [{ "message": { "content": "4" }, "finish_reason": "stop" }],
            "usage": {
                "prompt_tokens": 10,
                "completion_tokens": 2,
                "completion_tokens_details": { "reasoning_tokens": 5 }
            }
        }))
        .unwrap();
        assert_eq!(reply.content, "4");
        assert_eq!(reply.usage.reasoning_tokens, 5);
        assert_eq!(reply.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn test_parse_anthropic_joins_text_blocks() {
        let reply = parse_anthropic(json!({
            "content": [{ "type": "text", "text": "a" }, { "type": "text", "text": "b" }],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 3, "output_tokens": 4 }
        }))
        .unwrap();
        assert_eq!(reply.content, "ab");
        assert_eq!(reply.usage.total(), 7);
    }
}
