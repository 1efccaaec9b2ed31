//! Core error types.

use thiserror::Error;

/// Errors from the state machine engine.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid transition document: {reason}")]
    Schema { reason: String },

    #[error("machine '{machine}': unknown event '{event}' in state '{state}'")]
    UnknownEvent {
        machine: String,
        state: String,
        event: String,
    },

    #[error("machine '{machine}': guard '{guard}' blocked '{event}' in state '{state}'")]
    GuardFailed {
        machine: String,
        state: String,
        event: String,
        guard: String,
    },

    #[error("machine '{machine}': guard '{guard}' not found for '{event}' in state '{state}'")]
    GuardUnresolved {
        machine: String,
        state: String,
        event: String,
        guard: String,
    },

    #[error("machine '{machine}': invalid state: {reason}")]
    InvalidState { machine: String, reason: String },

    #[error("communication loop detected: queues still busy after {rounds} rounds")]
    CommunicationLoopDetected { rounds: usize },

    #[error("machine '{from}' addressed unknown peer '{target}'")]
    UnknownPeer { from: String, target: String },

    #[error("machine not found: {machine}")]
    MachineNotFound { machine: String },

    #[error("machine registered twice: {machine}")]
    DuplicateMachine { machine: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Returns whether execution may continue past this error under the
    /// log-and-continue policy.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::UnknownEvent { .. }
                | CoreError::GuardFailed { .. }
                | CoreError::GuardUnresolved { .. }
                | CoreError::UnknownPeer { .. }
        )
    }

    /// Returns an error code suitable for display in the shell.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Schema { .. } => "SCHEMA_ERROR",
            CoreError::UnknownEvent { .. } => "UNKNOWN_EVENT",
            CoreError::GuardFailed { .. } => "GUARD_FAILED",
            CoreError::GuardUnresolved { .. } => "GUARD_UNRESOLVED",
            CoreError::InvalidState { .. } => "INVALID_STATE",
            CoreError::CommunicationLoopDetected { .. } => "COMMUNICATION_LOOP",
            CoreError::UnknownPeer { .. } => "UNKNOWN_PEER",
            CoreError::MachineNotFound { .. } => "MACHINE_NOT_FOUND",
            CoreError::DuplicateMachine { .. } => "DUPLICATE_MACHINE",
            CoreError::Json(_) => "SCHEMA_ERROR",
        }
    }

    pub(crate) fn schema(reason: impl Into<String>) -> Self {
        CoreError::Schema {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = CoreError::UnknownEvent {
            machine: "m".into(),
            state: "idle".into(),
            event: "go".into(),
        };
        assert_eq!(err.error_code(), "UNKNOWN_EVENT");
        assert!(err.is_recoverable());

        let err = CoreError::schema("missing initial_state");
        assert_eq!(err.error_code(), "SCHEMA_ERROR");
        assert!(!err.is_recoverable());

        let err = CoreError::CommunicationLoopDetected { rounds: 1000 };
        assert_eq!(err.error_code(), "COMMUNICATION_LOOP");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_message_names_offending_identifiers() {
        let err = CoreError::GuardFailed {
            machine: "machine1".into(),
            state: "idle".into(),
            event: "start".into(),
            guard: "is_system_ready".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("machine1"));
        assert!(msg.contains("idle"));
        assert!(msg.contains("start"));
        assert!(msg.contains("is_system_ready"));
    }
}
