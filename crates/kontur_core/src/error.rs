use std::time::Duration;

use crate::packet::Instruction;

// ============================================================================
// Protocol-level faults: always recovered inside the organ loop
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed packet: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to serialize packet: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("integrity mismatch (declared '{expected}', computed '{computed}')")]
    IntegrityMismatch { expected: String, computed: String },
}

impl ProtocolError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProtocolError::Decode(_) => "DECODE_ERROR",
            ProtocolError::Encode(_) => "ENCODE_ERROR",
            ProtocolError::IntegrityMismatch { .. } => "INTEGRITY_MISMATCH",
        }
    }
}

/// Error returned by organ-specific handlers.
///
/// The runtime turns every variant into an `ERROR` reply and keeps going.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HandlerFault {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unsupported instruction {intent}/{op_code}")]
    Unsupported { intent: String, op_code: String },

    #[error("{0}")]
    Internal(String),
}

impl HandlerFault {
    pub fn invalid(reason: impl Into<String>) -> Self {
        HandlerFault::InvalidPayload(reason.into())
    }

    pub fn unsupported(instruction: &Instruction) -> Self {
        HandlerFault::Unsupported {
            intent: instruction.intent.to_string(),
            op_code: instruction.op_code.clone(),
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        HandlerFault::Internal(err.to_string())
    }

    /// Stable identifier placed in the `ERROR` reply payload.
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerFault::InvalidPayload(_) => "INVALID_PAYLOAD",
            HandlerFault::Unsupported { .. } => "UNSUPPORTED",
            HandlerFault::Internal(_) => "INTERNAL",
        }
    }
}

impl From<serde_json::Error> for HandlerFault {
    fn from(err: serde_json::Error) -> Self {
        HandlerFault::InvalidPayload(err.to_string())
    }
}

// ============================================================================
// Orchestration-level faults: recovered by replanning, then terminal
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("{0}")]
    BackendError(String),

    #[error("execution exceeded deadline of {}s", .0.as_secs_f64())]
    BackendTimeout(Duration),

    #[error("attempts exhausted after {attempts} tries: {last_error}")]
    AttemptsExhausted { attempts: u32, last_error: String },
}

impl TaskError {
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::BackendError(_) => "BACKEND_ERROR",
            TaskError::BackendTimeout(_) => "BACKEND_TIMEOUT",
            TaskError::AttemptsExhausted { .. } => "ATTEMPTS_EXHAUSTED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Intent;

    #[test]
    fn test_fault_kinds() {
        let instr = Instruction::new(Intent::Other("LEVITATE".into()), "UP");
        let fault = HandlerFault::unsupported(&instr);
        assert_eq!(fault.kind(), "UNSUPPORTED");
        assert_eq!(fault.to_string(), "unsupported instruction LEVITATE/UP");

        let parse_err = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        assert_eq!(HandlerFault::from(parse_err).kind(), "INVALID_PAYLOAD");
    }

    #[test]
    fn test_timeout_is_distinct_from_backend_error() {
        let timeout = TaskError::BackendTimeout(Duration::from_secs(60));
        assert_eq!(timeout.kind(), "BACKEND_TIMEOUT");
        assert_eq!(timeout.to_string(), "execution exceeded deadline of 60s");
        assert_ne!(timeout.kind(), TaskError::BackendError("x".into()).kind());
    }
}
