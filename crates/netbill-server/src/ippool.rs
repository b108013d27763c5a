//! IP pool management
//!
//! Pool entries live in the shared KV backend so every node sees one
//! address space. A lease transitions an entry from free to leased with a
//! compare-and-swap on the serialized entry; of N racing tasks exactly one
//! CAS succeeds, the rest move on to the next candidate or retry.

use crate::config::PoolConfig;
use crate::error::CoreError;
use crate::iprange;
use crate::state::StateBackend;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const ENTRY_PREFIX: &str = "ippool:";
const POOLS_KEY: &str = "ippool:pools";
const STATS_PREFIX: &str = "ippool:stats:";

/// Lease conflicts retried before giving up on a pool
const LEASE_RETRIES: u32 = 5;

/// One address in a pool. `expires_at == 0` means free.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolEntry {
    pub ip: Ipv4Addr,
    pub pool: String,
    pub expires_at: i64,
}

impl PoolEntry {
    pub fn is_free(&self, now: i64) -> bool {
        self.expires_at == 0 || self.expires_at <= now
    }
}

/// Per-pool totals
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub pool_name: String,
    pub total_ips: i64,
    pub used_ips: i64,
    pub free_ips: i64,
    pub expired_ips: i64,
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

fn entry_key(ip: Ipv4Addr) -> String {
    format!("{}{}", ENTRY_PREFIX, ip)
}

fn is_entry_key(key: &str) -> bool {
    key != POOLS_KEY && !key.starts_with(STATS_PREFIX)
}

/// IP pool allocator
pub struct IpPoolService {
    backend: Arc<dyn StateBackend>,
    timeout: u64,
    default_pool: String,
    use_another_one_free_pool: bool,
    /// Pool names in config declaration order; fallback iterates this
    pool_order: tokio::sync::RwLock<Vec<String>>,
}

impl IpPoolService {
    pub fn new(
        backend: Arc<dyn StateBackend>,
        timeout: u64,
        default_pool: &str,
        use_another_one_free_pool: bool,
    ) -> Self {
        IpPoolService {
            backend,
            timeout,
            default_pool: default_pool.to_string(),
            use_another_one_free_pool,
            pool_order: tokio::sync::RwLock::new(Vec::new()),
        }
    }

    /// Clear and re-create all pools from configuration
    pub async fn allocate(&self, pools: &[PoolConfig]) -> Result<(), CoreError> {
        info!("Allocating IP pools");
        self.clear_all().await?;

        for pool in pools {
            self.add_pool(&pool.name, &pool.ranges).await?;
        }

        let order: Vec<String> = pools.iter().map(|p| p.name.clone()).collect();
        let names = serde_json::to_vec(&order)?;
        self.backend
            .set(POOLS_KEY, &names, None)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        *self.pool_order.write().await = order;

        Ok(())
    }

    /// Rehydrate pool declaration order from the backend (restart path)
    pub async fn load_pool_order(&self) -> Result<(), CoreError> {
        if let Some(raw) = self
            .backend
            .get(POOLS_KEY)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?
        {
            *self.pool_order.write().await = serde_json::from_slice(&raw)?;
        }
        Ok(())
    }

    async fn add_pool(&self, name: &str, ranges: &[String]) -> Result<(), CoreError> {
        let mut count: i64 = 0;
        for range_text in ranges {
            let span = iprange::parse_range(range_text)?;
            for ip in span.hosts() {
                let entry = PoolEntry {
                    ip,
                    pool: name.to_string(),
                    expires_at: 0,
                };
                let raw = serde_json::to_vec(&entry)?;
                self.backend
                    .set(&entry_key(ip), &raw, None)
                    .await
                    .map_err(|e| CoreError::Internal(e.to_string()))?;
                count += 1;
            }
        }

        self.backend
            .incr_by(&format!("{}{}:total", STATS_PREFIX, name), count)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        info!(pool = name, count, "Added IP pool");
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), CoreError> {
        let keys = self
            .backend
            .keys(&format!("{}*", ENTRY_PREFIX))
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        for key in keys {
            self.backend
                .delete(&key)
                .await
                .map_err(|e| CoreError::Internal(e.to_string()))?;
        }
        Ok(())
    }

    /// Lease an address from `pool` (empty selects the default pool).
    ///
    /// Enumerates the pool's entries in sorted order and CASes the first
    /// free one to leased. On conflict the scan retries up to
    /// [`LEASE_RETRIES`] times; an exhausted pool falls back to the other
    /// pools in declaration order when configured to.
    pub async fn lease(&self, pool: &str) -> Result<(Ipv4Addr, String), CoreError> {
        let pool = if pool.is_empty() {
            self.default_pool.as_str()
        } else {
            pool
        };

        match self.lease_from(pool).await? {
            Some(ip) => Ok((ip, pool.to_string())),
            None => {
                if self.use_another_one_free_pool {
                    let order = self.pool_order.read().await.clone();
                    for other in &order {
                        if other == pool {
                            continue;
                        }
                        if let Some(ip) = self.lease_from(other).await? {
                            info!(ip = %ip, pool = other, "Leased IP from alternative pool");
                            return Ok((ip, other.clone()));
                        }
                    }
                }
                Err(CoreError::Capacity(pool.to_string()))
            }
        }
    }

    async fn lease_from(&self, pool: &str) -> Result<Option<Ipv4Addr>, CoreError> {
        for _attempt in 0..LEASE_RETRIES {
            let mut conflicted = false;

            let keys = self
                .backend
                .keys(&format!("{}*", ENTRY_PREFIX))
                .await
                .map_err(|e| CoreError::Internal(e.to_string()))?;
            let now = now_unix();

            for key in keys.iter().filter(|k| is_entry_key(k)) {
                let Some(raw) = self
                    .backend
                    .get(key)
                    .await
                    .map_err(|e| CoreError::Internal(e.to_string()))?
                else {
                    continue;
                };
                let Ok(entry) = serde_json::from_slice::<PoolEntry>(&raw) else {
                    continue;
                };
                if entry.pool != pool || !entry.is_free(now) {
                    continue;
                }

                let mut leased = entry.clone();
                leased.expires_at = now + self.timeout as i64;
                let new_raw = serde_json::to_vec(&leased)?;

                let won = self
                    .backend
                    .compare_and_swap(key, &raw, &new_raw)
                    .await
                    .map_err(|e| CoreError::Internal(e.to_string()))?;
                if won {
                    self.backend
                        .incr_by(&format!("{}{}:used", STATS_PREFIX, pool), 1)
                        .await
                        .map_err(|e| CoreError::Internal(e.to_string()))?;
                    info!(ip = %entry.ip, pool, expires_at = leased.expires_at, "Leased IP");
                    return Ok(Some(entry.ip));
                }

                debug!(ip = %entry.ip, pool, "Lease conflict, trying next entry");
                conflicted = true;
            }

            if !conflicted {
                // Every entry was taken, not raced away
                return Ok(None);
            }
        }

        Ok(None)
    }

    /// Extend the lease on a known address
    pub async fn renew(&self, ip: Ipv4Addr) -> Result<(), CoreError> {
        let key = entry_key(ip);
        let raw = self
            .backend
            .get(&key)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?
            .ok_or_else(|| CoreError::NotFound(format!("IP {}", ip)))?;

        let mut entry: PoolEntry = serde_json::from_slice(&raw)?;
        entry.expires_at = now_unix() + self.timeout as i64;

        let new_raw = serde_json::to_vec(&entry)?;
        self.backend
            .set(&key, &new_raw, None)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        debug!(ip = %ip, expires_at = entry.expires_at, "Renewed IP lease");
        Ok(())
    }

    /// Return an address to its pool. Unknown addresses are ignored and a
    /// second release of the same address is a no-op.
    pub async fn release(&self, ip: Ipv4Addr) -> Result<(), CoreError> {
        let key = entry_key(ip);
        let Some(raw) = self
            .backend
            .get(&key)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?
        else {
            debug!(ip = %ip, "IP not found for release, ignoring");
            return Ok(());
        };

        let mut entry: PoolEntry = serde_json::from_slice(&raw)?;
        if entry.expires_at == 0 {
            return Ok(());
        }

        entry.expires_at = 0;
        let new_raw = serde_json::to_vec(&entry)?;
        self.backend
            .set(&key, &new_raw, None)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        self.backend
            .incr_by(&format!("{}{}:used", STATS_PREFIX, entry.pool), -1)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        info!(ip = %ip, pool = %entry.pool, "Released IP");
        Ok(())
    }

    /// All entries across all pools
    pub async fn info(&self) -> Result<Vec<PoolEntry>, CoreError> {
        let keys = self
            .backend
            .keys(&format!("{}*", ENTRY_PREFIX))
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        let mut entries = Vec::new();
        for key in keys.iter().filter(|k| is_entry_key(k)) {
            let Some(raw) = self
                .backend
                .get(key)
                .await
                .map_err(|e| CoreError::Internal(e.to_string()))?
            else {
                continue;
            };
            if let Ok(entry) = serde_json::from_slice::<PoolEntry>(&raw) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Totals for one pool or all pools
    pub async fn stats(&self, pool: Option<&str>) -> Result<Vec<PoolStats>, CoreError> {
        let pools: Vec<String> = match pool {
            Some(name) => vec![name.to_string()],
            None => self.pool_order.read().await.clone(),
        };

        let entries = self.info().await?;
        let now = now_unix();

        let mut stats = Vec::new();
        for name in pools {
            let total = self.counter(&format!("{}{}:total", STATS_PREFIX, name)).await;
            let mut used = 0;
            let mut expired = 0;
            for entry in entries.iter().filter(|e| e.pool == name) {
                if entry.expires_at > 0 {
                    if entry.expires_at <= now {
                        expired += 1;
                    } else {
                        used += 1;
                    }
                }
            }
            stats.push(PoolStats {
                pool_name: name,
                total_ips: total,
                used_ips: used,
                free_ips: total - used,
                expired_ips: expired,
            });
        }
        Ok(stats)
    }

    async fn counter(&self, key: &str) -> i64 {
        match self.backend.get(key).await {
            Ok(Some(raw)) => String::from_utf8_lossy(&raw).parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// Flip expired leases back to free; run by the maintenance loop
    pub async fn sweep_expired(&self) -> Result<usize, CoreError> {
        let entries = self.info().await?;
        let now = now_unix();
        let mut swept = 0;

        for entry in entries {
            if entry.expires_at > 0 && entry.expires_at <= now {
                self.release(entry.ip).await?;
                swept += 1;
            }
        }

        if swept > 0 {
            warn!(count = swept, "Swept expired IP leases");
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateBackend;

    async fn pool_service(pools: &[(&str, &[&str])]) -> IpPoolService {
        let backend = Arc::new(MemoryStateBackend::new());
        let service = IpPoolService::new(backend, 300, "main", false);
        let configs: Vec<PoolConfig> = pools
            .iter()
            .map(|(name, ranges)| PoolConfig {
                name: name.to_string(),
                ranges: ranges.iter().map(|r| r.to_string()).collect(),
            })
            .collect();
        service.allocate(&configs).await.unwrap();
        service
    }

    #[tokio::test]
    async fn test_lease_to_capacity_then_fail() {
        let service = pool_service(&[("main", &["10.0.0.10-10.0.0.12"])]).await;

        let mut leased = Vec::new();
        for _ in 0..3 {
            let (ip, pool) = service.lease("main").await.unwrap();
            assert_eq!(pool, "main");
            leased.push(ip);
        }
        leased.sort();
        assert_eq!(
            leased,
            vec![
                Ipv4Addr::new(10, 0, 0, 10),
                Ipv4Addr::new(10, 0, 0, 11),
                Ipv4Addr::new(10, 0, 0, 12),
            ]
        );

        let err = service.lease("main").await.unwrap_err();
        assert!(matches!(err, CoreError::Capacity(p) if p == "main"));
    }

    #[tokio::test]
    async fn test_empty_pool_name_uses_default() {
        let service = pool_service(&[("main", &["10.0.0.1"])]).await;
        let (ip, pool) = service.lease("").await.unwrap();
        assert_eq!(ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(pool, "main");
    }

    #[tokio::test]
    async fn test_concurrent_lease_single_winner() {
        let service = Arc::new(pool_service(&[("guest", &["10.10.10.10"])]).await);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let service = service.clone();
            handles.push(tokio::spawn(async move { service.lease("guest").await }));
        }

        let mut winners = 0;
        let mut capacity_errors = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok((ip, _)) => {
                    assert_eq!(ip, Ipv4Addr::new(10, 10, 10, 10));
                    winners += 1;
                }
                Err(CoreError::Capacity(_)) => capacity_errors += 1,
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(capacity_errors, 15);
    }

    #[tokio::test]
    async fn test_release_restores_capacity() {
        let service = pool_service(&[("main", &["10.0.0.1"])]).await;

        let (ip, _) = service.lease("main").await.unwrap();
        assert!(service.lease("main").await.is_err());

        service.release(ip).await.unwrap();
        let (again, _) = service.lease("main").await.unwrap();
        assert_eq!(again, ip);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let service = pool_service(&[("main", &["10.0.0.1"])]).await;
        let (ip, _) = service.lease("main").await.unwrap();

        service.release(ip).await.unwrap();
        service.release(ip).await.unwrap();
        // Unknown IP is also fine
        service.release(Ipv4Addr::new(203, 0, 113, 9)).await.unwrap();

        let stats = service.stats(Some("main")).await.unwrap();
        assert_eq!(stats[0].used_ips, 0);
        assert_eq!(stats[0].free_ips, 1);
    }

    #[tokio::test]
    async fn test_renew_unknown_ip_errors() {
        let service = pool_service(&[("main", &["10.0.0.1"])]).await;
        let err = service.renew(Ipv4Addr::new(198, 51, 100, 1)).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_renew_extends_lease() {
        let service = pool_service(&[("main", &["10.0.0.1"])]).await;
        let (ip, _) = service.lease("main").await.unwrap();

        service.renew(ip).await.unwrap();
        let entries = service.info().await.unwrap();
        let deadline = now_unix() + 300;
        assert!(entries[0].expires_at >= deadline - 2 && entries[0].expires_at <= deadline + 2);
    }

    #[tokio::test]
    async fn test_cross_pool_fallback_in_declaration_order() {
        let backend = Arc::new(MemoryStateBackend::new());
        let service = IpPoolService::new(backend, 300, "main", true);
        service
            .allocate(&[
                PoolConfig {
                    name: "main".to_string(),
                    ranges: vec!["10.0.0.1".to_string()],
                },
                PoolConfig {
                    name: "overflow".to_string(),
                    ranges: vec!["10.0.1.1".to_string()],
                },
                PoolConfig {
                    name: "guest".to_string(),
                    ranges: vec!["10.0.2.1".to_string()],
                },
            ])
            .await
            .unwrap();

        let _ = service.lease("main").await.unwrap();

        let (ip, pool) = service.lease("main").await.unwrap();
        assert_eq!(pool, "overflow");
        assert_eq!(ip, Ipv4Addr::new(10, 0, 1, 1));

        let (ip, pool) = service.lease("main").await.unwrap();
        assert_eq!(pool, "guest");
        assert_eq!(ip, Ipv4Addr::new(10, 0, 2, 1));

        assert!(service.lease("main").await.is_err());
    }

    #[tokio::test]
    async fn test_expired_lease_is_leasable() {
        let backend = Arc::new(MemoryStateBackend::new());
        // Zero-second leases expire immediately
        let service = IpPoolService::new(backend, 0, "main", false);
        service
            .allocate(&[PoolConfig {
                name: "main".to_string(),
                ranges: vec!["10.0.0.1".to_string()],
            }])
            .await
            .unwrap();

        let (first, _) = service.lease("main").await.unwrap();
        let (second, _) = service.lease("main").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let backend = Arc::new(MemoryStateBackend::new());
        let service = IpPoolService::new(backend, 0, "main", false);
        service
            .allocate(&[PoolConfig {
                name: "main".to_string(),
                ranges: vec!["10.0.0.1-10.0.0.2".to_string()],
            }])
            .await
            .unwrap();

        service.lease("main").await.unwrap();
        service.lease("main").await.unwrap();

        let swept = service.sweep_expired().await.unwrap();
        assert_eq!(swept, 2);

        let stats = service.stats(Some("main")).await.unwrap();
        assert_eq!(stats[0].used_ips, 0);
    }

    #[tokio::test]
    async fn test_stats_totals() {
        let service = pool_service(&[("main", &["10.0.0.0/30"])]).await;
        let stats = service.stats(None).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].total_ips, 4);

        service.lease("main").await.unwrap();
        let stats = service.stats(Some("main")).await.unwrap();
        assert_eq!(stats[0].used_ips, 1);
        assert_eq!(stats[0].free_ips, 3);
    }
}
