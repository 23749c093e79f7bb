//! Error types for ideaflow
//!
//! Exit codes:
//! - 0: Success
//! - 2: User error (bad args, unknown task, invalid transition)
//! - 3: Conflict (task name already taken)
//! - 4: Operation failed (io, serialization, lock contention)

use std::path::PathBuf;
use thiserror::Error;

use crate::task::Task;

/// Exit codes for the ifm CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const USER_ERROR: i32 = 2;
    pub const CONFLICT: i32 = 3;
    pub const OPERATION_FAILED: i32 = 4;
}

/// Main error type for ideaflow operations
#[derive(Error, Debug)]
pub enum Error {
    // User errors (exit code 2)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    // Conflicts (exit code 3)
    #[error("Task with name '{}' already exists", .0.name)]
    DuplicateTaskName(Box<Task>),

    #[error("Persistence conflict: {0}")]
    PersistenceConflict(String),

    // Operation failures (exit code 4)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Lock acquisition failed: {0}")]
    LockFailed(PathBuf),

    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl Error {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidArgument(_)
            | Error::InvalidConfig(_)
            | Error::NotFound(_)
            | Error::PreconditionViolation(_) => exit_codes::USER_ERROR,

            Error::DuplicateTaskName(_) | Error::PersistenceConflict(_) => exit_codes::CONFLICT,

            Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::LockFailed(_)
            | Error::OperationFailed(_) => exit_codes::OPERATION_FAILED,
        }
    }

    /// Message safe to show to clients.
    ///
    /// Precondition violations are client bugs; the internal detail stays in
    /// the `Display` form for logs.
    pub fn public_message(&self) -> String {
        match self {
            Error::PreconditionViolation(_) => "invalid state transition request".to_string(),
            other => other.to_string(),
        }
    }

    /// Structured payload attached to error envelopes.
    ///
    /// Conflicts carry the existing task so clients can redirect to it.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Error::DuplicateTaskName(existing) => serde_json::to_value(existing.as_ref()).ok(),
            _ => None,
        }
    }
}

/// Result type alias for ideaflow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wrapper for displaying errors in JSON format
#[derive(serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for JsonError {
    fn from(err: &Error) -> Self {
        JsonError {
            error: err.public_message(),
            code: err.exit_code(),
            details: err.details(),
        }
    }
}
