use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level service configuration, loaded from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP listen address
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// HTTP listen port
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Log level: "trace", "debug", "info", "warn", "error" (default: "info")
    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub ippool: IpPoolConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub disconnect: DisconnectConfig,

    #[serde(default)]
    pub traffic_classification: TrafficClassificationConfig,

    #[serde(default)]
    pub subscription: SubscriptionConfig,

    #[serde(default)]
    pub billing: BillingConfig,
}

/// PostgreSQL connection pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default = "default_db_name")]
    pub name: String,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_sslmode")]
    pub sslmode: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_max_idle_connections")]
    pub max_idle_connections: u32,
}

impl DatabaseConfig {
    /// Connection URL in the form sqlx expects
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.name, self.sslmode
        )
    }
}

/// Valkey/Redis settings for the shared session and pool state.
///
/// An empty `host` selects the in-memory backend (single node, no
/// persistence across restarts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_cache_port")]
    pub port: u16,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: u8,
    #[serde(default = "default_cache_pool_size")]
    pub pool_size: u32,
}

impl CacheConfig {
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!("redis://:{}@{}:{}/{}", self.password, self.host, self.port, self.db)
        }
    }
}

/// IP pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpPoolConfig {
    /// Lease TTL in seconds
    #[serde(default = "default_ippool_timeout")]
    pub timeout: u64,
    #[serde(default = "default_pool_name")]
    pub default_pool: String,
    /// Fall back to other pools (in declaration order) when the requested
    /// pool is exhausted
    #[serde(default)]
    pub use_another_one_free_pool: bool,
    /// Clear and re-allocate all pools from config at startup
    #[serde(default)]
    pub allocate: bool,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    /// Ranges in `a.b.c.d`, `a.b.c.d/n` or `a.b.c.d-a.b.c.d` form
    pub ranges: Vec<String>,
}

/// Session lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds of silence before a session expires
    #[serde(default = "default_session_timeout")]
    pub session_timeout: u64,
    /// DB sync loop interval in seconds
    #[serde(default = "default_sync_interval")]
    pub sync_interval: u64,
    /// Seconds to wait before finalizing a stopped session, so trailing
    /// NetFlow samples still land on it
    #[serde(default = "default_delay_stop")]
    pub delay_stop: u64,
    #[serde(default)]
    pub disconnect_on_shutdown: bool,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Cleanup loop interval in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    #[serde(default = "default_max_sessions_per_user")]
    pub max_sessions_per_user: usize,
}

/// Disconnect engine settings; transports are attempted in the order
/// RADIUS, script, PoD, each skipped when disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectConfig {
    #[serde(default = "default_true")]
    pub radius_enabled: bool,
    #[serde(default)]
    pub secret: String,
    /// Per-attempt UDP timeout in seconds
    #[serde(default = "default_nas_timeout")]
    pub nas_timeout: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,

    #[serde(default)]
    pub script_enabled: bool,
    #[serde(default)]
    pub script_path: String,
    #[serde(default = "default_script_timeout")]
    pub script_timeout: u64,
    /// Extra KEY=VALUE pairs added to the script environment
    #[serde(default)]
    pub script_env: Vec<String>,

    #[serde(default)]
    pub pod_enabled: bool,
    #[serde(default)]
    pub pod_endpoint: String,
    #[serde(default = "default_pod_timeout")]
    pub pod_timeout: u64,
}

/// Traffic classification settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficClassificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_class")]
    pub default_class: String,
    #[serde(default)]
    pub classes: Vec<ClassConfig>,
    #[serde(default)]
    pub protocol_rules: Vec<ProtocolRuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassConfig {
    pub name: String,
    pub networks: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub cost_in: f64,
    #[serde(default)]
    pub cost_out: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolRuleConfig {
    pub protocol: String,
    pub ports: Vec<u16>,
    #[serde(default)]
    pub priority: i32,
}

/// Subscription processor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub default_monthly_fee: f64,
    #[serde(default)]
    pub grace_period_days: u32,
    #[serde(default)]
    pub disable_on_insufficient_funds: bool,
    /// Daily wall-clock processing time, "HH:MM"
    #[serde(default = "default_processing_time")]
    pub processing_time: String,
    #[serde(default)]
    pub enable_proration: bool,
    #[serde(default)]
    pub scheduler: SubscriptionSchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSchedulerConfig {
    /// Day of month charges run on
    #[serde(default = "default_charge_day")]
    pub day_of_month: u32,
}

/// Default parameter maps merged under plan_data per algorithm name
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BillingConfig {
    #[serde(default)]
    pub algorithms: HashMap<String, serde_json::Map<String, serde_json::Value>>,
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_name() -> String {
    "netbill".to_string()
}

fn default_db_user() -> String {
    "netbill".to_string()
}

fn default_sslmode() -> String {
    "disable".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_max_idle_connections() -> u32 {
    2
}

fn default_cache_port() -> u16 {
    6379
}

fn default_cache_pool_size() -> u32 {
    8
}

fn default_ippool_timeout() -> u64 {
    300
}

fn default_pool_name() -> String {
    "main".to_string()
}

fn default_session_timeout() -> u64 {
    60
}

fn default_sync_interval() -> u64 {
    30
}

fn default_delay_stop() -> u64 {
    5
}

fn default_max_sessions() -> usize {
    10_000
}

fn default_cleanup_interval() -> u64 {
    30
}

fn default_max_sessions_per_user() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_nas_timeout() -> u64 {
    5
}

fn default_retries() -> u32 {
    3
}

fn default_script_timeout() -> u64 {
    10
}

fn default_pod_timeout() -> u64 {
    3
}

fn default_class() -> String {
    "internet".to_string()
}

fn default_processing_time() -> String {
    "02:00".to_string()
}

fn default_charge_day() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_address: default_listen_address(),
            listen_port: default_listen_port(),
            log_level: None,
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            ippool: IpPoolConfig::default(),
            session: SessionConfig::default(),
            disconnect: DisconnectConfig::default(),
            traffic_classification: TrafficClassificationConfig::default(),
            subscription: SubscriptionConfig::default(),
            billing: BillingConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            host: String::new(),
            port: default_cache_port(),
            password: String::new(),
            db: 0,
            pool_size: default_cache_pool_size(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            host: default_db_host(),
            port: default_db_port(),
            name: default_db_name(),
            user: default_db_user(),
            password: String::new(),
            sslmode: default_sslmode(),
            max_connections: default_max_connections(),
            max_idle_connections: default_max_idle_connections(),
        }
    }
}

impl Default for IpPoolConfig {
    fn default() -> Self {
        IpPoolConfig {
            timeout: default_ippool_timeout(),
            default_pool: default_pool_name(),
            use_another_one_free_pool: false,
            allocate: false,
            pools: Vec::new(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            session_timeout: default_session_timeout(),
            sync_interval: default_sync_interval(),
            delay_stop: default_delay_stop(),
            disconnect_on_shutdown: false,
            max_sessions: default_max_sessions(),
            cleanup_interval: default_cleanup_interval(),
            max_sessions_per_user: default_max_sessions_per_user(),
        }
    }
}

impl Default for DisconnectConfig {
    fn default() -> Self {
        DisconnectConfig {
            radius_enabled: true,
            secret: String::new(),
            nas_timeout: default_nas_timeout(),
            retries: default_retries(),
            script_enabled: false,
            script_path: String::new(),
            script_timeout: default_script_timeout(),
            script_env: Vec::new(),
            pod_enabled: false,
            pod_endpoint: String::new(),
            pod_timeout: default_pod_timeout(),
        }
    }
}

impl Default for TrafficClassificationConfig {
    fn default() -> Self {
        TrafficClassificationConfig {
            enabled: true,
            default_class: default_class(),
            classes: Vec::new(),
            protocol_rules: Vec::new(),
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        SubscriptionConfig {
            enabled: false,
            default_monthly_fee: 0.0,
            grace_period_days: 0,
            disable_on_insufficient_funds: false,
            processing_time: default_processing_time(),
            enable_proration: false,
            scheduler: SubscriptionSchedulerConfig::default(),
        }
    }
}

impl Default for SubscriptionSchedulerConfig {
    fn default() -> Self {
        SubscriptionSchedulerConfig {
            day_of_month: default_charge_day(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Example configuration for first-run bootstrapping
    pub fn example() -> Config {
        Config {
            ippool: IpPoolConfig {
                allocate: true,
                pools: vec![PoolConfig {
                    name: "main".to_string(),
                    ranges: vec!["10.64.0.10-10.64.0.250".to_string()],
                }],
                ..Default::default()
            },
            traffic_classification: TrafficClassificationConfig {
                classes: vec![ClassConfig {
                    name: "local".to_string(),
                    networks: vec!["10.0.0.0/8".to_string()],
                    priority: 0,
                    cost_in: 0.0,
                    cost_out: 0.0,
                }],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.session.session_timeout == 0 {
            return Err(ConfigError::Invalid(
                "session.session_timeout must be positive".to_string(),
            ));
        }
        if self.session.sync_interval == 0 {
            return Err(ConfigError::Invalid(
                "session.sync_interval must be positive".to_string(),
            ));
        }
        for pool in &self.ippool.pools {
            if pool.ranges.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "pool {} has no ranges",
                    pool.name
                )));
            }
        }
        Ok(())
    }

    /// Whether the shared KV backend is configured
    pub fn has_cache(&self) -> bool {
        !self.cache.host.is_empty()
    }
}
