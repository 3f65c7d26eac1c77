//! Mock generator: deterministic, scripted responses for tests and offline runs.

use std::collections::VecDeque;

use anyhow::Result;
use tokio::sync::Mutex;

use crate::llm::{GenerationParams, TextGenerator};

/// Replays queued responses in order; once drained it reports itself
/// unavailable, which sends the planner down its recall/fallback path.
#[derive(Debug, Default)]
pub struct MockGenerator {
    responses: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|s| Ok(s.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue a failure for the next call.
    pub async fn push_error(&self, message: impl Into<String>) {
        self.responses.lock().await.push_back(Err(message.into()));
    }

    /// Prompts received so far.
    pub async fn prompts(&self) -> Vec<String> {
        self.prompts.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(
        &self,
        _system: &str,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String> {
        self.prompts.lock().await.push(prompt.to_string());
        match self.responses.lock().await.pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => anyhow::bail!("{}", message),
            None => anyhow::bail!("mock generator has no scripted response"),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
