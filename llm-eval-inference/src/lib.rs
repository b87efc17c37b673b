//! Multi-provider inference client.
//!
//! A logical model resolves to an ordered chain of provider bindings. Each
//! binding is tried up to a fixed number of attempts with exponential
//! backoff; timeouts and connection failures retry on the same provider,
//! any other failure moves straight to the next one. When the whole chain is
//! exhausted the client returns [`InferenceOutcome::Unavailable`] instead of
//! an error, so callers can record the SubTask as failed and move on.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use llm_eval_inference::{InferenceClient, InferenceConfig, InferenceRequest, InferenceOutcome};
//! # async fn example(catalog: Arc<dyn llm_eval_core::Catalog>) -> Result<(), Box<dyn std::error::Error>> {
//! let client = InferenceClient::new(catalog, InferenceConfig::default())?;
//! let request = InferenceRequest::new("What is 2 + 2?").with_temperature(0.0);
//!
//! match client.complete("gpt-4o", &request).await? {
//!     InferenceOutcome::Completed(response) => println!("{}", response.content),
//!     InferenceOutcome::Unavailable { attempts } => println!("gave up after {}", attempts.len()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod provider;
pub mod retry;
pub mod stats;
pub mod types;

pub use client::InferenceClient;
pub use config::InferenceConfig;
pub use error::{FailureClass, InferenceError, ProviderError, Result};
pub use provider::{HttpProviderClient, ProviderClient, ProviderReply};
pub use retry::{ExponentialBackoff, JitterStrategy, RetryConfig};
pub use stats::{ProviderStats, ProviderStatsSnapshot};
pub use types::{AttemptFailure, InferenceOutcome, InferenceRequest, InferenceResponse};
