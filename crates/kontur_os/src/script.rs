use std::time::Duration;

use async_trait::async_trait;
use kontur_core::config::AutomationConfig;
use tokio::process::Command;

use crate::{Automation, ExecutionOutcome};

/// Passes each instruction as the final argument of a configured program.
pub struct ScriptBackend {
    program: String,
    args: Vec<String>,
}

impl ScriptBackend {
    pub fn new(config: &AutomationConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }
}

#[async_trait]
impl Automation for ScriptBackend {
    async fn execute(&self, instruction: &str, deadline: Duration) -> ExecutionOutcome {
        let exec_future = Command::new(&self.program)
            .args(&self.args)
            .arg(instruction)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(deadline, exec_future).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ExecutionOutcome::Failed {
                    message: format!("Failed to launch {}: {}", self.program, e),
                }
            }
            Err(_) => {
                tracing::warn!("{} exceeded deadline of {:?}", self.program, deadline);
                return ExecutionOutcome::TimedOut { after: deadline };
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            ExecutionOutcome::Failed {
                message: format!(
                    "{} failed with status {}: {}",
                    self.program,
                    output.status,
                    stderr.trim()
                ),
            }
        } else {
            if !stderr.is_empty() {
                tracing::debug!("{} stderr (success): {}", self.program, stderr);
            }
            ExecutionOutcome::Completed {
                output: stdout.trim_end().to_string(),
            }
        }
    }

    fn name(&self) -> &str {
        &self.program
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell() -> ScriptBackend {
        ScriptBackend::new(&AutomationConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string()],
        })
    }

    #[tokio::test]
    async fn test_completed_captures_stdout() {
        let outcome = shell().execute("echo hello", Duration::from_secs(5)).await;
        assert_eq!(
            outcome,
            ExecutionOutcome::Completed {
                output: "hello".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failed() {
        let outcome = shell()
            .execute("echo nope >&2; exit 3", Duration::from_secs(5))
            .await;
        match outcome {
            ExecutionOutcome::Failed { message } => assert!(message.contains("nope")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deadline_is_timed_out_not_failed() {
        let deadline = Duration::from_millis(100);
        let outcome = shell().execute("sleep 5", deadline).await;
        assert_eq!(outcome, ExecutionOutcome::TimedOut { after: deadline });
    }

    #[tokio::test]
    async fn test_missing_program_is_failed() {
        let backend = ScriptBackend::new(&AutomationConfig {
            program: "/nonexistent/kontur-backend".to_string(),
            args: vec![],
        });
        let outcome = backend.execute("anything", Duration::from_secs(1)).await;
        assert!(matches!(outcome, ExecutionOutcome::Failed { .. }));
    }
}
