//! Error types for the compatibility layer.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Stable, caller-safe classification of a database engine failure.
///
/// This is the only part of an engine error that leaves the executor; the raw
/// engine message stays in the server-side log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineErrorCode {
    /// Unique, foreign key, check or NOT NULL constraint rejected the write.
    ConstraintViolation,
    /// The statement was chosen as a deadlock victim.
    Deadlock,
    /// A lock request timed out.
    LockTimeout,
    /// String or binary data would be truncated.
    Truncation,
    /// Authentication against the server failed.
    LoginFailed,
    /// Network or TLS failure talking to the server.
    Connectivity,
    /// Syntax error, unknown object or unknown column.
    InvalidStatement,
    /// Anything else the engine reported.
    EngineFailure,
}

impl EngineErrorCode {
    /// Map a SQL Server error number to a stable code.
    pub fn from_server_number(number: u32) -> Self {
        match number {
            // duplicate key, FK/check conflict, NULL into NOT NULL column
            2627 | 2601 | 547 | 515 => Self::ConstraintViolation,
            1205 => Self::Deadlock,
            1222 => Self::LockTimeout,
            8152 | 2628 => Self::Truncation,
            18456 | 4060 => Self::LoginFailed,
            102 | 156 | 207 | 208 | 2812 | 8144 | 8145 => Self::InvalidStatement,
            _ => Self::EngineFailure,
        }
    }

    /// The code as it appears in error messages and JSON output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConstraintViolation => "CONSTRAINT_VIOLATION",
            Self::Deadlock => "DEADLOCK",
            Self::LockTimeout => "LOCK_TIMEOUT",
            Self::Truncation => "TRUNCATION",
            Self::LoginFailed => "LOGIN_FAILED",
            Self::Connectivity => "CONNECTIVITY",
            Self::InvalidStatement => "INVALID_STATEMENT",
            Self::EngineFailure => "ENGINE_FAILURE",
        }
    }

    /// Whether retrying the same statement later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Deadlock | Self::LockTimeout | Self::Connectivity)
    }
}

impl fmt::Display for EngineErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw failure reported by a [`Session`](crate::pool::Session).
///
/// Carries the unredacted engine message. It is logged by the executor and
/// then reduced to its [`EngineErrorCode`].
#[derive(Debug, Clone)]
pub struct EngineFailure {
    pub code: EngineErrorCode,
    /// Server error number, when the failure came from the server.
    pub number: Option<u32>,
    pub message: String,
}

impl EngineFailure {
    pub fn new(code: EngineErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            number: None,
            message: message.into(),
        }
    }

    /// Failure reported by the server with an error number.
    pub fn server(number: u32, message: impl Into<String>) -> Self {
        Self {
            code: EngineErrorCode::from_server_number(number),
            number: Some(number),
            message: message.into(),
        }
    }
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number {
            Some(n) => write!(f, "[{}] error {}: {}", self.code, n, self.message),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

impl From<tiberius::error::Error> for EngineFailure {
    fn from(e: tiberius::error::Error) -> Self {
        use tiberius::error::Error;

        match &e {
            Error::Server(token) => EngineFailure::server(token.code(), token.message()),
            Error::Io { .. } | Error::Tls(_) | Error::Routing { .. } => {
                EngineFailure::new(EngineErrorCode::Connectivity, e.to_string())
            }
            _ => EngineFailure::new(EngineErrorCode::EngineFailure, e.to_string()),
        }
    }
}

/// Main error type for compatibility layer operations.
#[derive(Error, Debug)]
pub enum CompatError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Placeholder count in the rewritten SQL does not match the parameters.
    #[error("Placeholder mismatch: statement has {placeholders} placeholder(s) but {params} parameter(s) were supplied")]
    RewriteMismatch { placeholders: usize, params: usize },

    /// Read query did not finish before the configured timeout.
    #[error("Query timed out after {}ms", .0.as_millis())]
    QueryTimeout(Duration),

    /// Sanitized database engine failure. Only the stable code is exposed.
    #[error("Database error ({0})")]
    Engine(EngineErrorCode),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Procedure or parameter name that is not a plain identifier.
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CompatError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl fmt::Display, context: impl Into<String>) -> Self {
        CompatError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Stable code for this error, suitable for HTTP responses.
    pub fn code(&self) -> &'static str {
        match self {
            CompatError::Config(_) => "CONFIG",
            CompatError::RewriteMismatch { .. } => "REWRITE_MISMATCH",
            CompatError::QueryTimeout(_) => "QUERY_TIMEOUT",
            CompatError::Engine(code) => code.as_str(),
            CompatError::Pool { .. } => "CONNECTIVITY",
            CompatError::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            CompatError::Io(_) => "IO",
            CompatError::Yaml(_) => "CONFIG",
            CompatError::Json(_) => "SERIALIZATION",
        }
    }

    /// Whether the caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            CompatError::QueryTimeout(_) | CompatError::Pool { .. } => true,
            CompatError::Engine(code) => code.is_transient(),
            _ => false,
        }
    }

    /// Process exit code used by the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            CompatError::Config(_) | CompatError::Yaml(_) => 2,
            CompatError::RewriteMismatch { .. } | CompatError::InvalidIdentifier(_) => 3,
            CompatError::QueryTimeout(_) => 4,
            CompatError::Engine(_) | CompatError::Pool { .. } => 5,
            CompatError::Io(_) | CompatError::Json(_) => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for compatibility layer operations.
pub type Result<T> = std::result::Result<T, CompatError>;
