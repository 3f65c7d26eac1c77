pub mod script;

pub use script::ScriptBackend;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

/// Result of handing one instruction to an automation backend.
///
/// The three cases stay distinct all the way up to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed { output: String },
    Failed { message: String },
    TimedOut { after: Duration },
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed { .. })
    }
}

/// Something that can carry out a task script on the host.
///
/// Implementors:
/// - `ScriptBackend`: hands the script to a configured interpreter (`osascript -e` by default)
#[async_trait]
pub trait Automation: Send + Sync {
    /// Run `instruction`, giving up after `deadline`.
    async fn execute(&self, instruction: &str, deadline: Duration) -> ExecutionOutcome;

    /// Backend name for logs.
    fn name(&self) -> &str;
}
