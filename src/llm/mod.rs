//! LLM collaborator used for deep semantic analysis.
//!
//! The scheduler only needs `complete(prompt, model, timeout)`. Any error
//! returned here fails the job that issued the call.

pub mod client;
pub mod deep_analysis;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use client::OllamaClient;
pub use deep_analysis::{build_prompt, parse_insights, run_deep_analysis};

/// A text-completion backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, model: &str, timeout: Duration) -> Result<String>;
}
