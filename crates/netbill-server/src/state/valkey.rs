//! Valkey/Redis state backend

use super::{StateBackend, StateError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Cmd, FromRedisValue, Script};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Attempts per command before the failure is surfaced
const COMMAND_ATTEMPTS: u32 = 3;
/// Pause between attempts
const RETRY_PAUSE: Duration = Duration::from_millis(100);

/// GET-compare-SET executed atomically server-side. KEYS[1] is the entry,
/// ARGV[1] the expected value, ARGV[2] the replacement.
const CAS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
else
    return 0
end
"#;

/// Valkey/Redis state backend
///
/// Sessions and pool entries live under a namespace prefix so several
/// services can share one Valkey instance. Every command is built as a
/// [`redis::Cmd`] value and pushed through one bounded-retry runner; the
/// `ConnectionManager` underneath reconnects on its own.
pub struct ValkeyStateBackend {
    conn: ConnectionManager,
    namespace: String,
    cas: Script,
}

impl ValkeyStateBackend {
    /// Connect to the configured Valkey server.
    ///
    /// Accepts `redis://host:port/db` and `rediss://host:port` URLs.
    pub async fn new(url: &str, namespace: &str) -> Result<Self, StateError> {
        let client = Client::open(url)
            .map_err(|e| StateError::ConnectionError(format!("Invalid Valkey URL: {}", e)))?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            StateError::ConnectionError(format!("Failed to connect to Valkey: {}", e))
        })?;

        Ok(Self {
            conn,
            namespace: namespace.to_string(),
            cas: Script::new(CAS_SCRIPT),
        })
    }

    fn ns(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    fn strip_ns<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(&self.namespace).unwrap_or(key)
    }

    /// Run one command with a bounded retry.
    ///
    /// Everything routed through here is idempotent (reads, absolute
    /// writes, counter math on crash-only stats), so replaying after an
    /// ambiguous failure is safe. The CAS script deliberately bypasses
    /// this runner.
    async fn run<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T, StateError> {
        let mut failure = None;

        for attempt in 1..=COMMAND_ATTEMPTS {
            let mut conn = self.conn.clone();
            match cmd.query_async(&mut conn).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    debug!(attempt, error = %e, "Valkey command failed");
                    failure = Some(e);
                    if attempt < COMMAND_ATTEMPTS {
                        sleep(RETRY_PAUSE).await;
                    }
                }
            }
        }

        Err(failure.expect("at least one attempt ran").into())
    }
}

#[async_trait]
impl StateBackend for ValkeyStateBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StateError> {
        self.run(&Cmd::get(self.ns(key))).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), StateError> {
        let cmd = match ttl {
            Some(ttl) => Cmd::set_ex(self.ns(key), value, ttl.as_secs().max(1)),
            None => Cmd::set(self.ns(key), value),
        };
        self.run(&cmd).await
    }

    async fn delete(&self, key: &str) -> Result<(), StateError> {
        self.run(&Cmd::del(self.ns(key))).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StateError> {
        let namespaced: Vec<String> = self.run(&Cmd::keys(self.ns(pattern))).await?;

        let mut keys: Vec<String> = namespaced
            .iter()
            .map(|key| self.strip_ns(key).to_string())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        new: &[u8],
    ) -> Result<bool, StateError> {
        let mut conn = self.conn.clone();

        // One shot, no retry: the script is the atomicity guarantee, and
        // replaying a swap that may already have applied would let two
        // callers win the same transition.
        let outcome: i64 = self
            .cas
            .key(self.ns(key))
            .arg(expected)
            .arg(new)
            .invoke_async(&mut conn)
            .await
            .map_err(StateError::from)?;

        Ok(outcome == 1)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StateError> {
        self.run(&Cmd::incr(self.ns(key), delta)).await
    }

    async fn ping(&self) -> Result<(), StateError> {
        let _pong: String = self.run(&redis::cmd("PING")).await?;
        Ok(())
    }
}
