//! Configuration handling for the CRM data-access core.
//!
//! Settings come from CLI arguments with environment-variable fallbacks
//! (`.env` is loaded by the binary before parsing). [`Config`] is then
//! resolved into [`ConnectionSettings`], [`QueryLimits`] and [`RetryPolicy`].

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use tracing::warn;

use crate::error::{DbError, DbResult};
use crate::models::{Backend, ConnectionSettings, Target};

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 0;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

// Retry policy defaults
pub const DEFAULT_CONNECT_RETRIES: u32 = 3;
pub const DEFAULT_CONNECT_RETRY_DELAY_MS: u64 = 2000;

// Executor defaults
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_QUERY_LENGTH: usize = 10_000;
pub const DEFAULT_MAX_PARAMS: usize = 100;
pub const DEFAULT_SLOW_QUERY_MS: u64 = 5000;

// Diagnostics defaults
pub const DEFAULT_LEAK_WARNING_THRESHOLD: usize = 30;
pub const DEFAULT_DIAGNOSTICS_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_HEAP_WARNING_MB: u64 = 200;

// Development fallbacks for the local target
pub const DEV_LOCAL_HOST: &str = "localhost";
pub const DEV_LOCAL_USER: &str = "root";
pub const DEV_LOCAL_DATABASE: &str = "crmtest";
pub const DEFAULT_SQLITE_PATH: &str = "crm.db";

/// Connection pool configuration options.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections kept open (default: 0)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 30)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
}

impl PoolOptions {
    /// Get max_connections with default value based on backend.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS))
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> Duration {
        Duration::from_secs(
            self.acquire_timeout_secs
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        )
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
            if let Some(min) = self.min_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        if self.acquire_timeout_secs == Some(0) {
            return Err("acquire_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Executor safety limits and instrumentation thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryLimits {
    /// Longest accepted query text, in characters.
    pub max_query_length: usize,
    pub max_params: usize,
    /// Timeout applied when a statement carries none.
    pub default_timeout: Duration,
    pub slow_query: Duration,
    pub leak_warning_threshold: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_query_length: DEFAULT_MAX_QUERY_LENGTH,
            max_params: DEFAULT_MAX_PARAMS,
            default_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            slow_query: Duration::from_millis(DEFAULT_SLOW_QUERY_MS),
            leak_warning_threshold: DEFAULT_LEAK_WARNING_THRESHOLD,
        }
    }
}

/// How many times pool creation is attempted and how long to wait between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least 1.
    pub attempts: u32,
    /// Base delay; the wait after failed attempt `n` is `delay * n`.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_CONNECT_RETRIES,
            Duration::from_millis(DEFAULT_CONNECT_RETRY_DELAY_MS),
        )
    }
}

/// Deployment mode; decides whether missing settings are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum RunMode {
    #[default]
    Development,
    Production,
    Test,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Configuration for the CRM data-access core.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Database backend
    #[arg(long, value_enum, default_value = "mysql", env = "DB_BACKEND")]
    pub backend: Backend,

    /// Use the cloud server identity instead of the local one
    #[arg(long, env = "DB_USE_CLOUD")]
    pub use_cloud: bool,

    #[arg(long, env = "DB_CLOUD_HOST")]
    pub cloud_host: Option<String>,

    #[arg(long, env = "DB_CLOUD_PORT")]
    pub cloud_port: Option<u16>,

    #[arg(long, env = "DB_CLOUD_USER")]
    pub cloud_user: Option<String>,

    /// Cloud password (sensitive - not logged)
    #[arg(long, env = "DB_CLOUD_PASSWORD", hide_env_values = true)]
    pub cloud_password: Option<String>,

    #[arg(long, env = "DB_CLOUD_NAME")]
    pub cloud_name: Option<String>,

    /// CA certificate for the cloud server: inline PEM or a file path
    #[arg(long, env = "DB_CLOUD_CA_CERT")]
    pub cloud_ca_cert: Option<String>,

    #[arg(long, env = "DB_LOCAL_HOST")]
    pub local_host: Option<String>,

    #[arg(long, env = "DB_LOCAL_PORT")]
    pub local_port: Option<u16>,

    #[arg(long, env = "DB_LOCAL_USER")]
    pub local_user: Option<String>,

    /// Local password (sensitive - not logged)
    #[arg(long, env = "DB_LOCAL_PASSWORD", hide_env_values = true)]
    pub local_password: Option<String>,

    #[arg(long, env = "DB_LOCAL_NAME")]
    pub local_name: Option<String>,

    /// Encrypt the connection with TLS
    #[arg(long, env = "DB_ENCRYPT")]
    pub encrypt: bool,

    /// Accept any server certificate (development only)
    #[arg(long, env = "DB_TRUST_SERVER_CERTIFICATE")]
    pub trust_server_certificate: bool,

    /// SQLite database file
    #[arg(long, default_value = DEFAULT_SQLITE_PATH, env = "DB_SQLITE_PATH")]
    pub sqlite_path: PathBuf,

    #[arg(long, env = "DB_POOL_MAX")]
    pub pool_max: Option<u32>,

    #[arg(long, env = "DB_POOL_MIN")]
    pub pool_min: Option<u32>,

    #[arg(long, env = "DB_POOL_IDLE_TIMEOUT_SECS")]
    pub pool_idle_timeout_secs: Option<u64>,

    #[arg(long, env = "DB_POOL_ACQUIRE_TIMEOUT_SECS")]
    pub pool_acquire_timeout_secs: Option<u64>,

    /// Total pool-creation attempts
    #[arg(long, default_value_t = DEFAULT_CONNECT_RETRIES, env = "DB_CONNECT_RETRIES")]
    pub connect_retries: u32,

    /// Base delay between pool-creation attempts, in milliseconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_RETRY_DELAY_MS,
        env = "DB_CONNECT_RETRY_DELAY_MS"
    )]
    pub connect_retry_delay_ms: u64,

    /// Default per-call query timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "DB_QUERY_TIMEOUT_SECS"
    )]
    pub query_timeout_secs: u64,

    #[arg(long, default_value_t = DEFAULT_MAX_QUERY_LENGTH, env = "DB_MAX_QUERY_LENGTH")]
    pub max_query_length: usize,

    #[arg(long, default_value_t = DEFAULT_MAX_PARAMS, env = "DB_MAX_PARAMS")]
    pub max_params: usize,

    #[arg(long, default_value_t = DEFAULT_SLOW_QUERY_MS, env = "DB_SLOW_QUERY_MS")]
    pub slow_query_ms: u64,

    #[arg(
        long,
        default_value_t = DEFAULT_LEAK_WARNING_THRESHOLD,
        env = "DB_LEAK_WARNING_THRESHOLD"
    )]
    pub leak_warning_threshold: usize,

    #[arg(
        long,
        default_value_t = DEFAULT_DIAGNOSTICS_INTERVAL_SECS,
        env = "DB_DIAGNOSTICS_INTERVAL_SECS"
    )]
    pub diagnostics_interval_secs: u64,

    #[arg(long, default_value_t = DEFAULT_HEAP_WARNING_MB, env = "DB_HEAP_WARNING_MB")]
    pub heap_warning_mb: u64,

    /// Deployment mode
    #[arg(long = "mode", value_enum, default_value = "development", env = "APP_ENV")]
    pub mode: RunMode,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "CRM_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "CRM_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            backend: Backend::Mysql,
            use_cloud: false,
            cloud_host: None,
            cloud_port: None,
            cloud_user: None,
            cloud_password: None,
            cloud_name: None,
            cloud_ca_cert: None,
            local_host: None,
            local_port: None,
            local_user: None,
            local_password: None,
            local_name: None,
            encrypt: false,
            trust_server_certificate: false,
            sqlite_path: PathBuf::from(DEFAULT_SQLITE_PATH),
            pool_max: None,
            pool_min: None,
            pool_idle_timeout_secs: None,
            pool_acquire_timeout_secs: None,
            connect_retries: DEFAULT_CONNECT_RETRIES,
            connect_retry_delay_ms: DEFAULT_CONNECT_RETRY_DELAY_MS,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
            max_query_length: DEFAULT_MAX_QUERY_LENGTH,
            max_params: DEFAULT_MAX_PARAMS,
            slow_query_ms: DEFAULT_SLOW_QUERY_MS,
            leak_warning_threshold: DEFAULT_LEAK_WARNING_THRESHOLD,
            diagnostics_interval_secs: DEFAULT_DIAGNOSTICS_INTERVAL_SECS,
            heap_warning_mb: DEFAULT_HEAP_WARNING_MB,
            mode: RunMode::Development,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Whether missing settings may fall back to development defaults.
    pub fn is_development(&self) -> bool {
        self.mode == RunMode::Development
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_connections: self.pool_max,
            min_connections: self.pool_min,
            idle_timeout_secs: self.pool_idle_timeout_secs,
            acquire_timeout_secs: self.pool_acquire_timeout_secs,
        }
    }

    pub fn query_limits(&self) -> QueryLimits {
        QueryLimits {
            max_query_length: self.max_query_length,
            max_params: self.max_params,
            default_timeout: Duration::from_secs(self.query_timeout_secs),
            slow_query: Duration::from_millis(self.slow_query_ms),
            leak_warning_threshold: self.leak_warning_threshold,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.connect_retries,
            Duration::from_millis(self.connect_retry_delay_ms),
        )
    }

    pub fn diagnostics_interval(&self) -> Duration {
        Duration::from_secs(self.diagnostics_interval_secs.max(1))
    }

    pub fn heap_warning_bytes(&self) -> u64 {
        self.heap_warning_mb * 1024 * 1024
    }

    /// Resolve the active target into connection settings.
    ///
    /// Outside development mode any missing required field fails with a
    /// configuration error naming every missing variable. In development mode
    /// the local target falls back to `localhost`/`root`/`crmtest` with a
    /// warning.
    pub fn connection_settings(&self) -> DbResult<ConnectionSettings> {
        let pool = self.pool_options();
        pool.validate().map_err(DbError::configuration)?;

        if self.backend == Backend::Sqlite {
            return Ok(ConnectionSettings::sqlite(&self.sqlite_path).with_pool(pool));
        }

        let default_port = self.backend.default_port().unwrap_or_default();
        let (target, host, port, user, password, database, ca_cert) = if self.use_cloud {
            (
                Target::Cloud,
                self.cloud_host.clone(),
                self.cloud_port,
                self.cloud_user.clone(),
                self.cloud_password.clone(),
                self.cloud_name.clone(),
                self.cloud_ca_cert.clone(),
            )
        } else {
            (
                Target::Local,
                self.local_host.clone(),
                self.local_port,
                self.local_user.clone(),
                self.local_password.clone(),
                self.local_name.clone(),
                None,
            )
        };

        let prefix = match target {
            Target::Cloud => "DB_CLOUD",
            Target::Local => "DB_LOCAL",
        };
        let mut missing = Vec::new();
        if is_blank(&host) {
            missing.push(format!("{prefix}_HOST"));
        }
        if is_blank(&user) {
            missing.push(format!("{prefix}_USER"));
        }
        if is_blank(&database) {
            missing.push(format!("{prefix}_NAME"));
        }
        // A local server may run without a password; a cloud one may not.
        if target == Target::Cloud && is_blank(&password) {
            missing.push(format!("{prefix}_PASSWORD"));
        }

        if !missing.is_empty() {
            if !self.is_development() || target == Target::Cloud {
                return Err(DbError::configuration(format!(
                    "Missing required {} settings: {}",
                    target,
                    missing.join(", ")
                )));
            }
            warn!(
                missing = %missing.join(", "),
                "Using development defaults for missing local database settings"
            );
        }

        Ok(ConnectionSettings {
            backend: self.backend,
            target,
            host: non_blank(host).unwrap_or_else(|| DEV_LOCAL_HOST.to_string()),
            port: port.unwrap_or(default_port),
            user: non_blank(user).unwrap_or_else(|| DEV_LOCAL_USER.to_string()),
            password: password.unwrap_or_default(),
            database: non_blank(database).unwrap_or_else(|| DEV_LOCAL_DATABASE.to_string()),
            encrypt: self.encrypt || ca_cert.is_some(),
            trust_server_certificate: self.trust_server_certificate,
            ca_cert,
            sqlite_path: self.sqlite_path.clone(),
            pool,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
