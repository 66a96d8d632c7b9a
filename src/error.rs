//! Crate-wide error kinds.
//!
//! Every component maps its failures onto this enum so callers can branch on
//! semantics (busy, capacity, missing tool) without inspecting driver or
//! transport errors. Driver-specific errors are wrapped with operation
//! context and never surfaced raw.

/// Error kinds shared by all components.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested row or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller supplied a value that fails validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A speed test is already in flight (single-flight gate).
    #[error("a speed test is already running")]
    Busy,

    /// The supervisor's concurrent-monitor cap is exhausted.
    #[error("monitor capacity exhausted ({0} active)")]
    Capacity(usize),

    /// The monitor already has a test in flight.
    #[error("monitor {0} is already running")]
    AlreadyRunning(i64),

    /// A phase or task exceeded its budget.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A required external tool is not installed.
    #[error("{0} is not available")]
    Unavailable(String),

    /// Authentication failed against a remote agent or the local user table.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Unique-constraint violation (duplicate host+port, base URL, username).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The operation was cancelled by its caller.
    #[error("cancelled")]
    Cancelled,

    /// Anything else; carries operation context.
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Wrap a database error with operation context, mapping unique-constraint
    /// violations to [`Error::Conflict`] and missing rows to [`Error::NotFound`].
    pub fn db(op: &str, err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Error::NotFound(op.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict(format!("{op}: {}", db.message()))
            }
            _ => Error::Internal(format!("{op}: {err}")),
        }
    }

    /// Wrap an HTTP transport error with operation context.
    pub fn http(op: &str, err: isahc::Error) -> Self {
        if err.kind() == &isahc::error::ErrorKind::Timeout {
            Error::Timeout(std::time::Duration::ZERO)
        } else {
            Error::Internal(format!("{op}: {err}"))
        }
    }

    /// True when the error is the single-flight or capacity gate rather than
    /// a real failure.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::Busy | Error::Capacity(_) | Error::AlreadyRunning(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Internal(format!("io: {err}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidInput(format!("json: {err}"))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
