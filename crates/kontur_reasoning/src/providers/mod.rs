pub mod mock;
pub mod openai;

pub use mock::MockGenerator;
pub use openai::OpenAiGenerator;

use std::sync::Arc;

use anyhow::Result;
use kontur_core::config::LlmConfig;

use crate::llm::TextGenerator;

/// Build the generator named by `config.provider`.
pub fn from_config(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>> {
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(MockGenerator::new())),
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        other => anyhow::bail!("Unknown LLM provider: {}", other),
    }
}
