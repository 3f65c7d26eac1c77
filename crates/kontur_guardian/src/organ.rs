use async_trait::async_trait;
use kontur_core::config::GuardianConfig;
use kontur_core::{HandlerFault, Health, HealthState, Intent, Packet};
use kontur_runtime::{Organ, Reply};
use serde_json::{json, Map, Value};

use crate::policy::PolicyEngine;

/// Threat level at which the guardian reports itself busy.
const BUSY_THREAT_LEVEL: f64 = 2.0;

/// Serves [`PolicyEngine::audit`] over the packet loop.
pub struct GuardianOrgan {
    urn: String,
    engine: PolicyEngine,
}

impl GuardianOrgan {
    pub fn new(config: GuardianConfig) -> Self {
        Self {
            urn: config.urn.clone(),
            engine: PolicyEngine::new(config),
        }
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    fn audit(&mut self, payload: &Value) -> Result<Reply, HandlerFault> {
        let operation = match payload.get("operation") {
            None | Some(Value::Null) => "unknown",
            Some(Value::String(s)) => s.as_str(),
            Some(other) => {
                return Err(HandlerFault::invalid(format!(
                    "operation must be a string, got {}",
                    other
                )))
            }
        };
        let args = payload
            .get("args")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        let audit = self.engine.audit(operation, &args);
        if !audit.allowed {
            tracing::warn!(
                "Operation '{}' not allowed (score {})",
                operation,
                audit.assessment.score
            );
        }
        let approved = audit.allowed;
        Ok(Reply::response(
            "AUDIT",
            json!({
                "audit": serde_json::to_value(&audit).map_err(HandlerFault::internal)?,
                "approved": approved,
            }),
        ))
    }

    fn status(&self) -> Value {
        json!({
            "threat_level": self.engine.threat_level(),
            "audits_performed": self.engine.audits_performed(),
        })
    }
}

#[async_trait]
impl Organ for GuardianOrgan {
    fn urn(&self) -> &str {
        &self.urn
    }

    fn health(&self) -> Health {
        let level = self.engine.threat_level();
        let state = if level >= BUSY_THREAT_LEVEL {
            HealthState::Busy
        } else {
            HealthState::Idle
        };
        Health::new(level / 10.0, state)
    }

    fn vitals(&self) -> Value {
        self.status()
    }

    async fn handle(&mut self, packet: &Packet) -> Result<Reply, HandlerFault> {
        match packet.intent() {
            Intent::Query => self.audit(&packet.payload),
            Intent::Command if packet.instruction.is_op("AUDIT") => self.audit(&packet.payload),
            Intent::Event if packet.instruction.is_op("STATUS") => {
                Ok(Reply::event("STATUS", self.status()))
            }
            _ => Err(HandlerFault::unsupported(&packet.instruction)),
        }
    }

    fn after_packet(&mut self, packet_count: u64) {
        self.engine.on_packet(packet_count);
    }
}
