use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::app::models::DeviceKind;

/// Failure reported by a concrete backend tool.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{backend}: {message}")]
pub struct BackendError {
    pub message: String,
    pub backend: String,
}

impl BackendError {
    pub fn new(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            backend: backend.into(),
        }
    }
}

/// Typed failures of the orchestration core.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FleetError {
    #[error("not found: {explanation}")]
    NotFound { explanation: String },

    #[error("device unavailable: {explanation}")]
    Unavailable { explanation: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("{operation} is not supported on {kind} devices")]
    UnsupportedOperation { operation: String, kind: String },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("pool storage error: {0}")]
    Storage(String),
}

pub type FleetResult<T> = Result<T, FleetError>;

impl FleetError {
    pub fn not_found(explanation: impl Into<String>) -> Self {
        FleetError::NotFound {
            explanation: explanation.into(),
        }
    }

    pub fn unavailable(explanation: impl Into<String>) -> Self {
        FleetError::Unavailable {
            explanation: explanation.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        FleetError::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    pub fn unsupported(operation: impl Into<String>, kind: DeviceKind) -> Self {
        FleetError::UnsupportedOperation {
            operation: operation.into(),
            kind: kind.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        FleetError::Validation(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            FleetError::NotFound { .. } => "ERR_NOT_FOUND",
            FleetError::Unavailable { .. } => "ERR_UNAVAILABLE",
            FleetError::Timeout { .. } => "ERR_TIMEOUT",
            FleetError::UnsupportedOperation { .. } => "ERR_UNSUPPORTED",
            FleetError::Backend(_) => "ERR_DEPENDENCY",
            FleetError::Validation(_) => "ERR_VALIDATION",
            FleetError::Storage(_) => "ERR_SYSTEM",
        }
    }

    /// HTTP-like status the API layer reports for this failure.
    pub fn status(&self) -> u16 {
        match self {
            FleetError::NotFound { .. } => 404,
            FleetError::Unavailable { .. } => 503,
            FleetError::Timeout { .. } => 503,
            FleetError::UnsupportedOperation { .. } => 400,
            FleetError::Backend(_) => 502,
            FleetError::Validation(_) => 400,
            FleetError::Storage(_) => 500,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub status: u16,
    pub trace_id: String,
}

impl AppError {
    pub fn new(
        code: impl Into<String>,
        status: u16,
        message: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            status,
            trace_id: trace_id.into(),
        }
    }

    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_VALIDATION", 400, message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new("ERR_SYSTEM", 500, message, trace_id)
    }

    pub fn from_fleet(err: FleetError, trace_id: impl Into<String>) -> Self {
        Self::new(err.code(), err.status(), err.to_string(), trace_id)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_converts_with_attribution() {
        let err: FleetError = BackendError::new("simctl", "boot failed").into();
        assert_eq!(err.code(), "ERR_DEPENDENCY");
        assert_eq!(err.to_string(), "simctl: boot failed");
    }

    #[test]
    fn maps_taxonomy_to_api_status() {
        let trace = "trace-1";
        let not_found = AppError::from_fleet(FleetError::not_found("no iPad"), trace);
        assert_eq!(not_found.status, 404);
        assert_eq!(not_found.code, "ERR_NOT_FOUND");
        assert!(not_found.error.contains("no iPad"));

        let boot = AppError::from_fleet(FleetError::timeout("boot", 30), trace);
        assert_eq!(boot.status, 503);
        assert_eq!(boot.trace_id, "trace-1");

        let unsupported = AppError::from_fleet(
            FleetError::unsupported("set_location", DeviceKind::Physical),
            trace,
        );
        assert_eq!(unsupported.code, "ERR_UNSUPPORTED");
        assert!(unsupported.error.contains("physical"));
    }
}
