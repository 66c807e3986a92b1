//! Configuration type definitions.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target database (SQL Server) connection settings.
    pub database: DatabaseConfig,

    /// Connection pool sizing and timeouts.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Statement executor behaviour.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Graceful shutdown settings.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// SQL Server connection configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 1433).
    #[serde(default = "default_mssql_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Encrypt connection (default: "true").
    #[serde(default = "default_true_string")]
    pub encrypt: String,

    /// Trust server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,

    /// Application name reported to the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("app_name", &self.app_name)
            .finish()
    }
}

impl DatabaseConfig {
    /// Whether the connection should be encrypted.
    pub fn encryption_enabled(&self) -> bool {
        !matches!(
            self.encrypt.to_lowercase().as_str(),
            "false" | "no" | "0" | "disable"
        )
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum pooled connections (default: 10).
    #[serde(default = "default_max_size")]
    pub max_size: u32,

    /// Idle connections kept open (default: 0).
    #[serde(default)]
    pub min_idle: u32,

    /// Seconds to wait for a connection checkout (default: 30).
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,

    /// Seconds before an idle connection is closed (default: 300).
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            min_idle: 0,
            connection_timeout_secs: default_connection_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl PoolConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Statement executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Read query timeout in milliseconds. Unset disables the timeout race.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_timeout_ms: Option<u64>,

    /// Maximum characters of SQL written to the log on failure (default: 500).
    #[serde(default = "default_log_sql_max_len")]
    pub log_sql_max_len: usize,

    /// Limit used when a pagination limit cannot be parsed (default: 10).
    #[serde(default = "default_limit")]
    pub default_limit: i64,

    /// Offset used when a pagination offset cannot be parsed (default: 0).
    #[serde(default)]
    pub default_offset: i64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: None,
            log_sql_max_len: default_log_sql_max_len(),
            default_limit: default_limit(),
            default_offset: 0,
        }
    }
}

impl ExecutorConfig {
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Seconds to wait for checked-out connections when closing (default: 10).
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            close_timeout_secs: default_close_timeout_secs(),
        }
    }
}

impl ShutdownConfig {
    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

fn default_mssql_port() -> u16 {
    1433
}

fn default_true_string() -> String {
    "true".to_string()
}

fn default_max_size() -> u32 {
    10
}

fn default_connection_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_log_sql_max_len() -> usize {
    500
}

fn default_limit() -> i64 {
    10
}

fn default_close_timeout_secs() -> u64 {
    10
}
