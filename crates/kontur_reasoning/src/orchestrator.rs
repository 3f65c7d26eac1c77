//! Task orchestration state machine.
//!
//! ```text
//! PLAN -> EXECUTE -> VERIFY -> SELF_HEAL -+-> PLAN (next step, or replan on error)
//!                                         +-> SUCCESS
//!                                         +-> FAILURE (attempts exhausted)
//! ```
//!
//! `max_attempts` bounds failed executions across the whole run, not per step.

use std::sync::Arc;

use kontur_core::config::OrchestratorConfig;
use kontur_core::TaskError;
use kontur_memory::{MemoryKind, MemoryStore, SimilarityHit, SimilarityStore};
use kontur_os::{Automation, ExecutionOutcome};
use serde::Serialize;
use serde_json::{json, Value};

use crate::llm::{GenerationParams, TextGenerator};
use crate::planner;
use crate::prompts::{PromptBuilder, PLANNER_SYSTEM, SOLVER_SYSTEM};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Plan,
    Execute,
    Verify,
    SelfHeal,
    Success,
    Failure,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Success,
    Failure,
}

/// What the caller of [`Orchestrator::run`] gets back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub goal: String,
    pub status: TaskStatus,
    pub steps: Vec<String>,
    pub completed_steps: usize,
    pub attempts: u32,
    /// Empty on success.
    pub last_error: String,
    /// `BACKEND_ERROR` or `BACKEND_TIMEOUT` for the last failed execution.
    pub last_error_kind: Option<String>,
    pub last_output: String,
    /// Every state visited, in order, terminal state included.
    pub trace: Vec<TaskState>,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }

    pub fn error(&self) -> Option<TaskError> {
        match self.status {
            TaskStatus::Success => None,
            TaskStatus::Failure => Some(TaskError::AttemptsExhausted {
                attempts: self.attempts,
                last_error: self.last_error.clone(),
            }),
        }
    }
}

/// Transient per-goal state.
struct TaskRun {
    goal: String,
    steps: Vec<String>,
    current_step_index: usize,
    current_solution: String,
    outcome: Option<ExecutionOutcome>,
    last_error: Option<TaskError>,
    last_output: String,
    attempts: u32,
    completed_steps: usize,
    trace: Vec<TaskState>,
}

impl TaskRun {
    fn current_step(&self) -> &str {
        self.steps
            .get(self.current_step_index)
            .map(String::as_str)
            .unwrap_or(self.goal.as_str())
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator {
    config: OrchestratorConfig,
    params: GenerationParams,
    generator: Arc<dyn TextGenerator>,
    similarity: Arc<dyn SimilarityStore>,
    automation: Arc<dyn Automation>,
    memory: MemoryStore,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        generator: Arc<dyn TextGenerator>,
        similarity: Arc<dyn SimilarityStore>,
        automation: Arc<dyn Automation>,
        memory: MemoryStore,
    ) -> Self {
        Self {
            config,
            params: GenerationParams::default(),
            generator,
            similarity,
            automation,
            memory,
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryStore {
        &mut self.memory
    }

    /// Drive one goal to a terminal state.
    pub async fn run(&mut self, goal: &str) -> TaskOutcome {
        let steps = self.decompose(goal).await;
        tracing::info!("Task started: '{}' ({} steps)", goal, steps.len());

        let mut run = TaskRun {
            goal: goal.to_string(),
            steps,
            current_step_index: 0,
            current_solution: String::new(),
            outcome: None,
            last_error: None,
            last_output: String::new(),
            attempts: 0,
            completed_steps: 0,
            trace: Vec::new(),
        };

        let mut state = TaskState::Plan;
        loop {
            run.trace.push(state);
            if state.is_terminal() {
                break;
            }
            state = match state {
                TaskState::Plan => {
                    run.current_solution = self.plan(&run).await;
                    TaskState::Execute
                }
                TaskState::Execute => {
                    run.outcome = Some(self.execute(&run.current_solution).await);
                    TaskState::Verify
                }
                TaskState::Verify => {
                    self.verify(&mut run);
                    TaskState::SelfHeal
                }
                TaskState::SelfHeal => self.self_heal(&mut run).await,
                TaskState::Success | TaskState::Failure => state,
            };
        }

        let status = if state == TaskState::Success {
            TaskStatus::Success
        } else {
            TaskStatus::Failure
        };
        let outcome = TaskOutcome {
            goal: run.goal,
            status,
            steps: run.steps,
            completed_steps: run.completed_steps,
            attempts: run.attempts,
            last_error: run.last_error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            last_error_kind: run.last_error.as_ref().map(|e| e.kind().to_string()),
            last_output: run.last_output,
            trace: run.trace,
        };

        match outcome.status {
            TaskStatus::Success => tracing::info!(
                "Task succeeded: '{}' ({} attempts failed)",
                outcome.goal,
                outcome.attempts
            ),
            TaskStatus::Failure => tracing::warn!(
                "Task failed: '{}' after {} attempts: {}",
                outcome.goal,
                outcome.attempts,
                outcome.last_error
            ),
        }
        outcome
    }

    async fn decompose(&self, goal: &str) -> Vec<String> {
        if self.config.llm_planning {
            match self
                .generator
                .generate(PLANNER_SYSTEM, &PromptBuilder::decomposition(goal), &self.params)
                .await
            {
                Ok(text) => {
                    let steps = planner::parse_list_steps(&text);
                    if !steps.is_empty() {
                        return steps;
                    }
                    tracing::debug!("Planner answer had no list, splitting goal instead");
                }
                Err(e) => tracing::warn!("Goal decomposition unavailable: {:#}", e),
            }
        }
        planner::split_goal(goal)
    }

    /// Choose a script for the current step: generated, recalled, or the fallback.
    async fn plan(&self, run: &TaskRun) -> String {
        let step = run.current_step();
        let recalled: Vec<SimilarityHit> = match self.recall_similar(step).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!("Similarity query failed: {:#}", e);
                Vec::new()
            }
        };
        if !recalled.is_empty() {
            tracing::debug!("Recalled {} prior solutions for '{}'", recalled.len(), step);
        }

        let last_error = run.last_error.as_ref().map(|e| e.to_string());
        let prompt = PromptBuilder::solution(&run.goal, step, &recalled, last_error.as_deref());
        match self.generator.generate(SOLVER_SYSTEM, &prompt, &self.params).await {
            Ok(text) => {
                if let Some(script) = planner::extract_script(&text) {
                    return script;
                }
                tracing::warn!("{} returned no usable script", self.generator.name());
            }
            Err(e) => tracing::warn!("{} unavailable: {:#}", self.generator.name(), e),
        }

        if let Some(script) = recalled
            .iter()
            .find_map(|hit| planner::extract_recalled_script(&hit.content))
        {
            tracing::info!("Reusing recalled solution for '{}'", step);
            return script;
        }

        tracing::info!("Falling back to default action for '{}'", step);
        self.config.fallback_action.clone()
    }

    async fn recall_similar(&self, step: &str) -> anyhow::Result<Vec<SimilarityHit>> {
        let vector = self.similarity.embed(step).await?;
        self.similarity.query(&vector, self.config.similarity_k).await
    }

    async fn execute(&self, script: &str) -> ExecutionOutcome {
        let deadline = self.config.execution_deadline();
        match tokio::time::timeout(deadline, self.automation.execute(script, deadline)).await {
            Ok(outcome) => outcome,
            Err(_) => ExecutionOutcome::TimedOut { after: deadline },
        }
    }

    fn verify(&self, run: &mut TaskRun) {
        match run.outcome.take() {
            Some(ExecutionOutcome::Completed { output }) => {
                run.last_error = None;
                run.last_output = output;
            }
            Some(ExecutionOutcome::Failed { message }) => {
                run.attempts += 1;
                tracing::warn!("Step '{}' failed: {}", run.current_step(), message);
                run.last_error = Some(TaskError::BackendError(message));
            }
            Some(ExecutionOutcome::TimedOut { after }) => {
                run.attempts += 1;
                tracing::warn!("Step '{}' timed out after {:?}", run.current_step(), after);
                run.last_error = Some(TaskError::BackendTimeout(after));
            }
            None => {
                run.attempts += 1;
                run.last_error = Some(TaskError::BackendError("no execution outcome".to_string()));
            }
        }
    }

    async fn self_heal(&mut self, run: &mut TaskRun) -> TaskState {
        if run.last_error.is_none() {
            self.remember(&run.goal, run.current_step(), &run.current_solution)
                .await;
            run.completed_steps += 1;
            if run.current_step_index + 1 < run.steps.len() {
                run.current_step_index += 1;
                return TaskState::Plan;
            }
            return TaskState::Success;
        }

        if run.attempts < self.config.max_attempts {
            tracing::info!(
                "Replanning '{}' (attempt {}/{})",
                run.current_step(),
                run.attempts,
                self.config.max_attempts
            );
            TaskState::Plan
        } else {
            TaskState::Failure
        }
    }

    /// Feed a working solution back so later planning can recall it.
    /// A solution already remembered verbatim is not stored again.
    async fn remember(&mut self, goal: &str, step: &str, script: &str) {
        let document = planner::solution_document(step, script);
        if self.memory.contains(MemoryKind::Episode, &document) {
            tracing::debug!("Solution for '{}' already remembered", step);
            return;
        }

        let receipt = self.memory.store(
            MemoryKind::Episode,
            &document,
            json!({"source": "self-healing", "goal": goal, "task": step, "status": "success"}),
        );
        let metadata = json!({
            "memory_id": receipt.memory_id,
            "goal": goal,
            "task": step,
            "status": "success",
            "stored_at": receipt.timestamp,
        });
        if let Err(e) = self.similarity.add(&document, metadata).await {
            tracing::warn!("Failed to index solution for '{}': {:#}", step, e);
        }
        if let Some(path) = &self.memory.config().snapshot_path {
            if let Err(e) = self.memory.save_snapshot(path) {
                tracing::error!("Failed to save memory snapshot: {:#}", e);
            }
        }
    }

    /// Index every stored episode in the similarity store. Returns how many were added.
    pub async fn seed_similarity(&self) -> usize {
        let mut added = 0;
        for entry in self.memory.partition(MemoryKind::Episode) {
            let mut metadata = entry.metadata.clone();
            if let Value::Object(map) = &mut metadata {
                map.insert("memory_id".to_string(), json!(entry.id));
                map.insert("stored_at".to_string(), json!(entry.stored_at));
            }
            match self.similarity.add(&entry.content, metadata).await {
                Ok(_) => added += 1,
                Err(e) => tracing::warn!("Failed to index {}: {:#}", entry.id, e),
            }
        }
        added
    }
}
