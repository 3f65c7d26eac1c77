use anyhow::Result;
use async_trait::async_trait;
use kontur_core::config::LlmConfig;

/// Sampling parameters for one generation call.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub max_tokens: u32,
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.2,
        }
    }
}

impl From<&LlmConfig> for GenerationParams {
    fn from(config: &LlmConfig) -> Self {
        Self {
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

/// Text-generation service used while planning.
///
/// An `Err` means "unavailable"; callers fall back instead of failing.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str, params: &GenerationParams)
        -> Result<String>;

    /// Provider name for logs.
    fn name(&self) -> &str;
}
