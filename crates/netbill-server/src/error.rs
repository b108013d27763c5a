//! Service-wide error taxonomy
//!
//! Every fallible path in the core resolves to one of these variants;
//! the HTTP layer maps them onto status codes and background tasks log
//! them and continue.

use netbill_proto::ErrorCause;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed JSON, invalid IP, bad CIDR
    #[error("Invalid input: {0}")]
    Input(String),

    /// Account, session or IP entry does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Second active session for the same user
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// No IPs available in the requested pool(s)
    #[error("No capacity in pool {0}")]
    Capacity(String),

    /// Classification config rejected at load
    #[error("Overlapping ranges detected: {first} and {second}")]
    Overlap { first: String, second: String },

    /// Charging outcome, not a transport failure
    #[error("Rejected: low balance")]
    LowBalance,

    /// Charging outcome, not a transport failure
    #[error("Rejected: time of day")]
    TimeOfDay,

    /// Charging outcome, not a transport failure
    #[error("Rejected: insufficient session cost")]
    InsufficientSessionCost,

    /// Peer answered Disconnect-NAK with a decoded RFC 3576 cause
    #[error("Disconnect rejected: {0}")]
    Nak(ErrorCause),

    /// Network or subprocess deadline elapsed
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Database transaction or connectivity failure
    #[error("Database error: {0}")]
    Db(String),

    /// Everything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// HTTP status code for handler responses
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::Input(_) => 400,
            CoreError::NotFound(_) => 404,
            CoreError::Duplicate(_) => 409,
            CoreError::Capacity(_) => 503,
            _ => 500,
        }
    }

    /// Stable machine-readable tag for JSON error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Input(_) => "input",
            CoreError::NotFound(_) => "not_found",
            CoreError::Duplicate(_) => "duplicate",
            CoreError::Capacity(_) => "capacity",
            CoreError::Overlap { .. } => "overlap",
            CoreError::LowBalance => "low_balance",
            CoreError::TimeOfDay => "time_of_day",
            CoreError::InsufficientSessionCost => "insufficient_session_cost",
            CoreError::Nak(_) => "nak",
            CoreError::Timeout(_) => "timeout",
            CoreError::Db(_) => "db",
            CoreError::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => CoreError::NotFound("row not found".to_string()),
            other => CoreError::Db(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CoreError::Timeout(format!("KV timeout: {}", err))
        } else {
            CoreError::Internal(format!("KV error: {}", err))
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Input(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Internal(format!("IO error: {}", err))
    }
}

impl From<std::net::AddrParseError> for CoreError {
    fn from(err: std::net::AddrParseError) -> Self {
        CoreError::Input(format!("Invalid IP address: {}", err))
    }
}
