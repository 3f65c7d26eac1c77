//! # KONTUR core
//!
//! Everything two organs need to agree on: the packet envelope, the codec that
//! turns it into one line of JSON with an integrity digest, the error taxonomy
//! and the shared configuration surface.

pub mod codec;
pub mod config;
pub mod error;
pub mod packet;

pub use codec::{canonical_json, decode, digest, encode, seal, verify};
pub use config::KonturConfig;
pub use error::{HandlerFault, ProtocolError, TaskError};
pub use packet::{
    scope, Auth, Health, HealthState, Instruction, Intent, OrganState, Packet, Route,
    DEFAULT_PRIORITY, DEFAULT_TTL_MS, PROTOCOL_VERSION,
};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
