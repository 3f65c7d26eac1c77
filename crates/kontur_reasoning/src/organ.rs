use async_trait::async_trait;
use kontur_core::{HandlerFault, Health, HealthState, Intent, Packet};
use kontur_memory::RecallRequest;
use kontur_runtime::{Organ, Reply};
use serde_json::{json, Value};

use crate::orchestrator::Orchestrator;

/// Runs goals through an [`Orchestrator`], one packet at a time.
pub struct TaskOrgan {
    urn: String,
    orchestrator: Orchestrator,
    tasks_run: u64,
    tasks_succeeded: u64,
    last_failed: bool,
}

impl TaskOrgan {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            urn: orchestrator.config().urn.clone(),
            orchestrator,
            tasks_run: 0,
            tasks_succeeded: 0,
            last_failed: false,
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    async fn run_task(&mut self, payload: &Value) -> Result<Reply, HandlerFault> {
        let goal = payload
            .get("goal")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .ok_or_else(|| HandlerFault::invalid("goal must be a non-empty string"))?;

        let outcome = self.orchestrator.run(goal).await;
        self.tasks_run += 1;
        if outcome.is_success() {
            self.tasks_succeeded += 1;
        }
        self.last_failed = !outcome.is_success();

        Ok(Reply::response(
            "RUN_TASK",
            json!({ "outcome": serde_json::to_value(&outcome).map_err(HandlerFault::internal)? }),
        ))
    }

    fn recall(&mut self, payload: &Value) -> Result<Reply, HandlerFault> {
        let default_limit = self.orchestrator.memory().config().default_recall_limit;
        let request = RecallRequest::parse(payload, default_limit)?;
        let result = self
            .orchestrator
            .memory_mut()
            .recall(request.query, request.kind, request.limit);
        Ok(Reply::response(
            "RECALL",
            json!({ "recall_result": serde_json::to_value(&result).map_err(HandlerFault::internal)? }),
        ))
    }
}

#[async_trait]
impl Organ for TaskOrgan {
    fn urn(&self) -> &str {
        &self.urn
    }

    fn health(&self) -> Health {
        let state = if self.last_failed {
            HealthState::Busy
        } else {
            HealthState::Idle
        };
        Health::new(self.orchestrator.memory().load_factor(), state)
    }

    fn vitals(&self) -> Value {
        json!({
            "tasks_run": self.tasks_run,
            "tasks_succeeded": self.tasks_succeeded,
            "memories": self.orchestrator.memory().len(),
        })
    }

    async fn handle(&mut self, packet: &Packet) -> Result<Reply, HandlerFault> {
        match packet.intent() {
            Intent::Command => self.run_task(&packet.payload).await,
            Intent::Query if packet.instruction.is_op("RECALL") => self.recall(&packet.payload),
            _ => Err(HandlerFault::unsupported(&packet.instruction)),
        }
    }
}
