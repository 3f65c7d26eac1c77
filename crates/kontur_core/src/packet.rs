//! Packet envelope exchanged between organs.
//!
//! One packet per line on the wire. The envelope is flat JSON; top-level fields
//! the runtime does not understand (`quantum_state`, `gravity_factor`, ...) are
//! kept in [`Packet::extra`] and written back out untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

pub const PROTOCOL_VERSION: &str = "11.0";
pub const DEFAULT_TTL_MS: u64 = 5000;
pub const DEFAULT_PRIORITY: u8 = 5;

/// Named permission levels. Any integer is accepted on the wire; the runtime
/// only forwards it.
pub mod scope {
    pub const PUBLIC: u32 = 0;
    pub const USER: u32 = 1;
    pub const SYSTEM: u32 = 50;
    pub const ROOT: u32 = 100;
}

// ============================================================================
// Instruction
// ============================================================================

/// Coarse message category.
///
/// The baseline set is closed, but organs may understand extra domain intents
/// (the memory organ's `EVOLVE`), so anything else is kept as [`Intent::Other`]
/// instead of failing to decode.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Intent {
    Heartbeat,
    Command,
    Query,
    Event,
    Response,
    Error,
    Other(String),
}

impl Intent {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "HEARTBEAT" => Intent::Heartbeat,
            // Older organs still send the short form.
            "COMMAND" | "CMD" => Intent::Command,
            "QUERY" => Intent::Query,
            "EVENT" => Intent::Event,
            "RESPONSE" => Intent::Response,
            "ERROR" => Intent::Error,
            other => Intent::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Intent::Heartbeat => "HEARTBEAT",
            Intent::Command => "COMMAND",
            Intent::Query => "QUERY",
            Intent::Event => "EVENT",
            Intent::Response => "RESPONSE",
            Intent::Error => "ERROR",
            Intent::Other(s) => s,
        }
    }

    pub fn is_baseline(&self) -> bool {
        !matches!(self, Intent::Other(_))
    }
}

impl From<String> for Intent {
    fn from(s: String) -> Self {
        Intent::parse(&s)
    }
}

impl From<Intent> for String {
    fn from(intent: Intent) -> Self {
        intent.as_str().to_string()
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub intent: Intent,
    /// Organ-specific sub-dispatch key.
    #[serde(default)]
    pub op_code: String,
}

impl Instruction {
    pub fn new(intent: Intent, op_code: impl Into<String>) -> Self {
        Self {
            intent,
            op_code: op_code.into(),
        }
    }

    /// Case-insensitive op_code comparison.
    pub fn is_op(&self, op_code: &str) -> bool {
        self.op_code.eq_ignore_ascii_case(op_code)
    }
}

// ============================================================================
// Route / Auth / Health
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl Route {
    /// Where replies go: `reply_to` when present, otherwise the sender.
    pub fn reply_address(&self) -> &str {
        self.reply_to.as_deref().unwrap_or(&self.from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    pub scope: u32,
}

impl Default for Auth {
    fn default() -> Self {
        Self { scope: scope::USER }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    #[default]
    Idle,
    Busy,
    Overload,
    Dead,
    /// Any state word outside the set above.
    Unknown,
}

impl HealthState {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "IDLE" => HealthState::Idle,
            "BUSY" => HealthState::Busy,
            "OVERLOAD" => HealthState::Overload,
            "DEAD" => HealthState::Dead,
            _ => HealthState::Unknown,
        }
    }
}

/// Sender's self-reported health. Advisory only: see [`Health::from_value`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Health {
    #[serde(default)]
    pub load_factor: f64,
    #[serde(default)]
    pub state: HealthState,
    #[serde(default)]
    pub resource_usage: f64,
}

impl Health {
    pub fn new(load_factor: f64, state: HealthState) -> Self {
        Self {
            load_factor: load_factor.clamp(0.0, 1.0),
            state,
            resource_usage: 0.0,
        }
    }

    pub fn with_resource_usage(mut self, usage: f64) -> Self {
        self.resource_usage = usage.max(0.0);
        self
    }

    /// Best-effort view of an inbound health block.
    ///
    /// Never fails on an object: unknown states become [`HealthState::Unknown`],
    /// non-numeric gauges fall back to zero and `energy_usage` stands in for a
    /// missing `resource_usage`. Anything but an object yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let number = |key: &str| map.get(key).and_then(Value::as_f64);
        Some(Self {
            load_factor: number("load_factor").unwrap_or(0.0).clamp(0.0, 1.0),
            state: map
                .get("state")
                .and_then(Value::as_str)
                .map(HealthState::parse)
                .unwrap_or_default(),
            resource_usage: number("resource_usage")
                .or_else(|| number("energy_usage"))
                .unwrap_or(0.0)
                .max(0.0),
        })
    }
}

/// Lifecycle of an organ process. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrganState {
    #[default]
    Ready,
    Running,
    Stopped,
}

// ============================================================================
// Packet
// ============================================================================

fn default_version() -> String {
    PROTOCOL_VERSION.to_string()
}

fn default_ttl() -> u64 {
    DEFAULT_TTL_MS
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

/// One message on the wire. Never mutated after [`crate::codec::seal`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    #[serde(default = "default_version")]
    pub version: String,
    pub id: String,
    #[serde(default, deserialize_with = "lenient::i64_number")]
    pub created_at: i64,
    /// Validity window in ms. Informational; the router enforces it.
    #[serde(default = "default_ttl", deserialize_with = "lenient::u64_number")]
    pub ttl: u64,
    /// Scheduling hint for the router. Never used to reorder local input.
    #[serde(default = "default_priority", deserialize_with = "lenient::u8_number")]
    pub priority: u8,
    #[serde(default)]
    pub integrity: String,
    pub route: Route,
    #[serde(default)]
    pub auth: Auth,
    pub instruction: Instruction,
    #[serde(default)]
    pub payload: Value,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::health"
    )]
    pub health: Option<Health>,
    /// Unrecognised top-level fields, passed through verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Packet {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        intent: Intent,
        op_code: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            version: default_version(),
            id: Uuid::new_v4().to_string(),
            created_at: crate::now_millis(),
            ttl: DEFAULT_TTL_MS,
            priority: DEFAULT_PRIORITY,
            integrity: String::new(),
            route: Route {
                from: from.into(),
                to: to.into(),
                reply_to: None,
            },
            auth: Auth::default(),
            instruction: Instruction::new(intent, op_code),
            payload,
            health: None,
            extra: Map::new(),
        }
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.route.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_scope(mut self, scope: u32) -> Self {
        self.auth.scope = scope;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_health(mut self, health: Health) -> Self {
        self.health = Some(health);
        self
    }

    pub fn intent(&self) -> &Intent {
        &self.instruction.intent
    }

    pub fn op_code(&self) -> &str {
        &self.instruction.op_code
    }
}

// ============================================================================
// Lenient field decoding
// ============================================================================

/// Numbers may arrive as integral floats (`30.0`) from senders whose JSON has a
/// single number type. Health is advisory and never rejects a packet.
mod lenient {
    use serde::de::{Deserializer, Error};
    use serde::Deserialize;
    use serde_json::{Number, Value};

    use super::Health;

    pub fn health<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Health>, D::Error> {
        let raw = Option::<Value>::deserialize(d)?;
        Ok(raw.as_ref().and_then(Health::from_value))
    }

    fn whole(n: &Number) -> Option<f64> {
        n.as_f64().filter(|f| f.fract() == 0.0)
    }

    pub fn u64_number<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        let n = Number::deserialize(d)?;
        n.as_u64()
            .or_else(|| {
                whole(&n)
                    .filter(|f| *f >= 0.0 && *f <= u64::MAX as f64)
                    .map(|f| f as u64)
            })
            .ok_or_else(|| D::Error::custom(format!("expected a non-negative whole number, got {}", n)))
    }

    pub fn i64_number<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let n = Number::deserialize(d)?;
        n.as_i64()
            .or_else(|| {
                whole(&n)
                    .filter(|f| *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .ok_or_else(|| D::Error::custom(format!("expected a whole number, got {}", n)))
    }

    pub fn u8_number<'de, D: Deserializer<'de>>(d: D) -> Result<u8, D::Error> {
        let n = u64_number(d)?;
        u8::try_from(n).map_err(|_| D::Error::custom(format!("{} is out of range for a priority", n)))
    }
}

// ============================================================================
// Tests
// ============================================================================
