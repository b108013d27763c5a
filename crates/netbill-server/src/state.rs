//! Shared state backend abstraction
//!
//! Sessions, session indexes and IP-pool entries live in a pluggable
//! key-value backend so that a restart (or another node) sees the same
//! state. Two implementations are provided:
//!
//! - [`MemoryStateBackend`]: local in-memory storage (tests, single node)
//! - [`ValkeyStateBackend`]: Valkey/Redis storage for durability and
//!   cross-node visibility
//!
//! The [`StateBackend::compare_and_swap`] primitive is what makes the IP
//! pool lease single-winner: of N concurrent tasks observing the same free
//! entry, exactly one CAS from the observed value succeeds.

pub mod memory;
pub mod valkey;

pub use memory::MemoryStateBackend;
pub use valkey::ValkeyStateBackend;

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Errors from state backend operations
#[derive(Debug)]
pub enum StateError {
    /// Backend unreachable
    ConnectionError(String),
    /// Command timeout
    Timeout(String),
    /// Serialization/deserialization failure
    SerializationError(String),
    /// Backend-specific failure
    BackendError(String),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            StateError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            StateError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            StateError::BackendError(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl std::error::Error for StateError {}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::SerializationError(format!("JSON error: {}", err))
    }
}

impl From<redis::RedisError> for StateError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() {
            StateError::ConnectionError(format!("Valkey connection error: {}", err))
        } else if err.is_timeout() {
            StateError::Timeout(format!("Valkey timeout: {}", err))
        } else {
            StateError::BackendError(format!("Valkey error: {}", err))
        }
    }
}

/// Pluggable key-value storage for session and pool state
///
/// Keys follow a hierarchical scheme:
///
/// ```text
/// session:<uuid>           serialized session blob
/// session_by_user:<login>  uuid index
/// session_by_ip:<ip>       uuid index
/// session_by_sid:<sid>     uuid index
/// ippool:<ip>              serialized pool entry
/// ippool:pools             pool name list
/// ippool:stats:<pool>      per-pool counters
/// ```
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Get a value by key; `Ok(None)` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StateError>;

    /// Set a value with optional TTL; `None` never expires
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StateError>;

    /// Delete a key; succeeds whether or not the key existed
    async fn delete(&self, key: &str) -> Result<(), StateError>;

    /// All keys matching a glob-style pattern, sorted.
    ///
    /// Sorting makes enumeration deterministic per call, which the pool
    /// lease relies on. Can be slow on very large keyspaces.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StateError>;

    /// Atomic compare-and-swap: replace the current value with `new` only
    /// if it equals `expected`. Returns `true` on a successful swap,
    /// `false` when the value changed underneath (or the key is gone).
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        new: &[u8],
    ) -> Result<bool, StateError>;

    /// Atomic counter add; creates the key at 0 first. Returns the new value.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StateError>;

    /// Connectivity check
    async fn ping(&self) -> Result<(), StateError>;
}
