//! Error types for Focus Flux

use thiserror::Error;

/// Errors surfaced by configuration, session lifecycle and replay parsing.
///
/// Detection absence is not an error: a missing face or
/// hand observation degrades the sample instead of failing the tick.
#[derive(Debug, Error)]
pub enum FocusError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No active session")]
    NoActiveSession,

    #[error("Session already active: {0}")]
    SessionAlreadyActive(String),

    #[error("Session runner already active")]
    RunnerAlreadyActive,

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Session task failed: {0}")]
    TaskFailed(String),
}
