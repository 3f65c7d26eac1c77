use async_trait::async_trait;
use kontur_core::{Health, HandlerFault, Intent, Packet, DEFAULT_PRIORITY};
use serde_json::Value;

/// What a handler sends back. The runtime wraps it in an envelope addressed
/// to the request's `reply_to` (or sender).
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub intent: Intent,
    pub op_code: String,
    pub payload: Value,
}

impl Reply {
    pub fn new(intent: Intent, op_code: impl Into<String>, payload: Value) -> Self {
        Self {
            intent,
            op_code: op_code.into(),
            payload,
        }
    }

    pub fn response(op_code: impl Into<String>, payload: Value) -> Self {
        Self::new(Intent::Response, op_code, payload)
    }

    pub fn event(op_code: impl Into<String>, payload: Value) -> Self {
        Self::new(Intent::Event, op_code, payload)
    }
}

/// Organ-specific logic driven by [`crate::OrganRuntime`].
///
/// State lives in the implementor and is only touched through `&mut self`
/// from the single loop, so no locking is needed.
#[async_trait]
pub trait Organ: Send {
    fn urn(&self) -> &str;

    /// Priority hint stamped on outgoing packets.
    fn priority(&self) -> u8 {
        DEFAULT_PRIORITY
    }

    fn health(&self) -> Health;

    /// Organ-specific counters merged into heartbeat payloads.
    fn vitals(&self) -> Value {
        Value::Object(Default::default())
    }

    /// Handle one verified packet. Heartbeats and shutdown never reach here.
    async fn handle(&mut self, packet: &Packet) -> Result<Reply, HandlerFault>;

    /// Called after every decoded packet with the running packet count.
    fn after_packet(&mut self, _packet_count: u64) {}
}
