use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use kontur_core::config::LlmConfig;
use reqwest::Client;
use serde_json::{json, Value};

use crate::llm::{GenerationParams, TextGenerator};
use crate::retry::{with_retry, RetryConfig};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Any OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiGenerator {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    retry: RetryConfig,
}

impl OpenAiGenerator {
    /// Base URL precedence: config, `OPENAI_BASE_URL`, the public endpoint.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        let base_url = config
            .base_url
            .clone()
            .or_else(|| env::var("OPENAI_BASE_URL").ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .context("Failed to build HTTP client")?,
            api_key,
            base_url,
            model: config.model.clone(),
            retry: RetryConfig::default(),
        })
    }
}

/// First choice's message text, if any.
fn completion_text(body: &Value) -> Option<&str> {
    body["choices"][0]["message"]["content"].as_str()
}

#[async_trait::async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String> {
        let api_key = self
            .api_key
            .as_deref()
            .context("OPENAI_API_KEY is not set")?;

        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!("Generation request to {} ({} prompt chars)", url, prompt.len());

        let client = &self.client;
        let response = with_retry(&self.retry, "OpenAI", || async {
            client
                .post(&url)
                .bearer_auth(api_key)
                .json(&payload)
                .send()
                .await
                .context("Failed to send request to OpenAI")
        })
        .await?;

        let body: Value = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;
        completion_text(&body)
            .map(|s| s.to_string())
            .context("OpenAI response has no message content")
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_text() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "delay 1"}}]});
        assert_eq!(completion_text(&body), Some("delay 1"));
        assert_eq!(completion_text(&json!({"choices": []})), None);
    }

    #[test]
    fn test_base_url_from_config_wins() {
        let config = LlmConfig {
            provider: "openai".to_string(),
            base_url: Some("http://localhost:11434/v1/".to_string()),
            ..LlmConfig::default()
        };
        let generator = OpenAiGenerator::new(&config).unwrap();
        assert_eq!(generator.base_url, "http://localhost:11434/v1");
    }
}
