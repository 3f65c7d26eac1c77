use async_trait::async_trait;
use kontur_core::{HandlerFault, Health, HealthState, Intent, Packet};
use kontur_runtime::{Organ, Reply};
use serde_json::{json, Value};

use crate::store::{MemoryKind, MemoryStore};

/// `{query, type?, limit?}` payload of a recall request.
#[derive(Debug, Clone, PartialEq)]
pub struct RecallRequest<'a> {
    pub query: &'a str,
    pub kind: Option<MemoryKind>,
    pub limit: usize,
}

impl<'a> RecallRequest<'a> {
    pub fn parse(payload: &'a Value, default_limit: usize) -> Result<Self, HandlerFault> {
        let query = optional_str(payload, "query")?.unwrap_or_default();
        let kind = match optional_str(payload, "type")? {
            None => None,
            Some(raw) => Some(
                MemoryKind::parse(raw)
                    .ok_or_else(|| HandlerFault::invalid(format!("unknown memory type '{}'", raw)))?,
            ),
        };
        let limit = match payload.get("limit") {
            None | Some(Value::Null) => default_limit,
            Some(v) => v
                .as_u64()
                .map(|n| n as usize)
                .ok_or_else(|| HandlerFault::invalid("limit must be a non-negative integer"))?,
        };
        Ok(Self { query, kind, limit })
    }
}

/// Serves a [`MemoryStore`] over the packet loop.
pub struct MemoryOrgan {
    urn: String,
    store: MemoryStore,
}

impl MemoryOrgan {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            urn: store.config().urn.clone(),
            store,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    fn store_entry(&mut self, payload: &Value) -> Result<Reply, HandlerFault> {
        let kind = match optional_str(payload, "type")? {
            None => MemoryKind::Fact,
            Some(raw) => MemoryKind::parse(raw)
                .ok_or_else(|| HandlerFault::invalid(format!("unknown memory type '{}'", raw)))?,
        };
        let content = optional_str(payload, "content")?.unwrap_or_default();
        let metadata = payload.get("metadata").cloned().unwrap_or(Value::Null);

        let receipt = self.store.store(kind, content, metadata);
        self.persist();
        Ok(Reply::event(
            "MEMORY_STORE",
            json!({ "memory_stored": serde_json::to_value(&receipt).map_err(HandlerFault::internal)? }),
        ))
    }

    fn recall(&mut self, payload: &Value) -> Result<Reply, HandlerFault> {
        let request = RecallRequest::parse(payload, self.store.config().default_recall_limit)?;
        let result = self.store.recall(request.query, request.kind, request.limit);
        Ok(Reply::response(
            "MEMORY_RECALL",
            json!({ "recall_result": serde_json::to_value(&result).map_err(HandlerFault::internal)? }),
        ))
    }

    fn optimize(&mut self) -> Result<Reply, HandlerFault> {
        let stats = self.store.optimize();
        self.persist();
        Ok(Reply::event(
            "MEMORY_OPTIMIZE",
            json!({ "optimization": serde_json::to_value(&stats).map_err(HandlerFault::internal)? }),
        ))
    }

    fn persist(&self) {
        if let Some(path) = &self.store.config().snapshot_path {
            if let Err(e) = self.store.save_snapshot(path) {
                tracing::error!("Failed to save memory snapshot: {:#}", e);
            }
        }
    }
}

fn optional_str<'a>(payload: &'a Value, key: &str) -> Result<Option<&'a str>, HandlerFault> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(HandlerFault::invalid(format!(
            "{} must be a string, got {}",
            key, other
        ))),
    }
}

#[async_trait]
impl Organ for MemoryOrgan {
    fn urn(&self) -> &str {
        &self.urn
    }

    fn health(&self) -> Health {
        let load = self.store.load_factor();
        let state = if load >= 0.9 {
            HealthState::Overload
        } else if load >= 0.5 {
            HealthState::Busy
        } else {
            HealthState::Idle
        };
        Health::new(load, state)
    }

    fn vitals(&self) -> Value {
        serde_json::to_value(self.store.stats()).unwrap_or(Value::Null)
    }

    async fn handle(&mut self, packet: &Packet) -> Result<Reply, HandlerFault> {
        let payload = &packet.payload;
        match packet.intent() {
            Intent::Command if packet.instruction.is_op("OPTIMIZE") => self.optimize(),
            Intent::Command => self.store_entry(payload),
            Intent::Query => self.recall(payload),
            Intent::Other(name) if name == "EVOLVE" => self.optimize(),
            _ => Err(HandlerFault::unsupported(&packet.instruction)),
        }
    }
}
