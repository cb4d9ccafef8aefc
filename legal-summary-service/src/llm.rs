use anyhow::anyhow;
use async_trait::async_trait;
use rig::{client::CompletionClient, completion::Prompt, providers::openrouter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A generative-language model that turns an ordered list of text parts
/// (instructions followed by content) into free text.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, parts: &[String]) -> anyhow::Result<String>;
}

/// OpenRouter chat completion through rig.
pub struct OpenRouterModel {
    client: openrouter::Client,
    model: String,
}

impl OpenRouterModel {
    pub fn new(api_key: &str, model: impl Into<String>) -> Self {
        Self {
            client: openrouter::Client::new(api_key),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenRouterModel {
    async fn generate(&self, parts: &[String]) -> anyhow::Result<String> {
        let prompt = parts.join("\n\n");
        let agent = self.client.agent(&self.model).max_tokens(4000).build();

        info!(
            model = %self.model,
            prompt_chars = prompt.len(),
            "Calling language model"
        );

        let response = agent.prompt(prompt).await?;

        info!(response_chars = response.len(), "Language model answered");
        Ok(response)
    }
}

/// Bounds every call to the wrapped model; a call that runs past the limit
/// fails like any other model error.
pub struct TimeoutModel {
    inner: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl TimeoutModel {
    pub fn new(inner: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl LanguageModel for TimeoutModel {
    async fn generate(&self, parts: &[String]) -> anyhow::Result<String> {
        match tokio::time::timeout(self.timeout, self.inner.generate(parts)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?self.timeout, "Language model call timed out");
                Err(anyhow!("model did not answer within {:?}", self.timeout))
            }
        }
    }
}
