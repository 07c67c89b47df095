//! facefind Error Definitions
//!
//! Defines the error taxonomy shared by the store, lifecycle, engine bridge
//! and orchestration layers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::EngineError;

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Store Errors
    // =========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    // =========================================================================
    // Lifecycle / Input Errors
    // =========================================================================
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // =========================================================================
    // Analysis Engine Errors
    // =========================================================================
    #[error("Analysis engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Analysis engine execution failed: {0}")]
    EngineExecution(String),

    #[error("No JSON payload in engine output: {0}")]
    OutputParse(String),

    #[error("Analysis engine reported an error: {0}")]
    EngineReported(String),
}

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

impl From<EngineError> for CoreError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Unavailable(msg) => CoreError::EngineUnavailable(msg),
            EngineError::OutputParse(msg) => CoreError::OutputParse(msg),
            EngineError::Reported(msg) => CoreError::EngineReported(msg),
            EngineError::Timeout(secs) => {
                CoreError::EngineExecution(format!("timed out after {secs}s"))
            }
            EngineError::ExecutionFailed(msg) => CoreError::EngineExecution(msg),
            EngineError::Process(e) => CoreError::EngineExecution(e.to_string()),
        }
    }
}

/// Caller-facing error category
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    BadInput,
    ProcessingFailed,
    Storage,
}

/// Structured error surfaced to callers instead of the raw internal error
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Storage(_) => ErrorKind::Storage,
            CoreError::RecordNotFound(_) => ErrorKind::NotFound,
            CoreError::InvalidState(_) => ErrorKind::InvalidState,
            CoreError::Validation(_) => ErrorKind::BadInput,
            CoreError::EngineUnavailable(_)
            | CoreError::EngineExecution(_)
            | CoreError::OutputParse(_)
            | CoreError::EngineReported(_) => ErrorKind::ProcessingFailed,
        }
    }

    /// Converts to a caller-facing response.
    ///
    /// Engine details are kept out of the message; they are logged where the
    /// failure happens.
    pub fn to_response(&self) -> ErrorResponse {
        let message = match self.kind() {
            ErrorKind::ProcessingFailed => "Processing failed".to_string(),
            ErrorKind::Storage => "Storage operation failed".to_string(),
            _ => self.to_string(),
        };
        ErrorResponse {
            kind: self.kind(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_errors_map_to_processing_failed() {
        let cases = [
            CoreError::from(EngineError::Unavailable("script missing".into())),
            CoreError::from(EngineError::ExecutionFailed("exit 1".into())),
            CoreError::from(EngineError::OutputParse("no braces".into())),
            CoreError::from(EngineError::Reported("no face".into())),
            CoreError::from(EngineError::Timeout(5)),
        ];
        for err in cases {
            assert_eq!(err.kind(), ErrorKind::ProcessingFailed);
            assert_eq!(err.to_response().message, "Processing failed");
        }
    }

    #[test]
    fn test_timeout_is_execution_error() {
        let err = CoreError::from(EngineError::Timeout(30));
        assert!(matches!(err, CoreError::EngineExecution(_)));
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn test_response_keeps_user_facing_detail() {
        let err = CoreError::RecordNotFound("video_01".into());
        let response = err.to_response();
        assert_eq!(response.kind, ErrorKind::NotFound);
        assert!(response.message.contains("video_01"));

        let err = CoreError::Validation("Minimum cleanup period is 7 days".into());
        assert_eq!(err.to_response().kind, ErrorKind::BadInput);
    }

    #[test]
    fn test_response_serializes_snake_case_kind() {
        let response = CoreError::InvalidState("Video is not archived".into()).to_response();
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["kind"], "invalid_state");
    }
}
