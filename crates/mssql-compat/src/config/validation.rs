//! Configuration validation.

use super::Config;
use crate::error::{CompatError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    let db = &config.database;
    if db.host.is_empty() {
        return Err(CompatError::Config("database.host is required".into()));
    }
    if db.database.is_empty() {
        return Err(CompatError::Config("database.database is required".into()));
    }
    if db.user.is_empty() {
        return Err(CompatError::Config("database.user is required".into()));
    }
    if db.port == 0 {
        return Err(CompatError::Config("database.port must be non-zero".into()));
    }

    let pool = &config.pool;
    if pool.max_size == 0 {
        return Err(CompatError::Config("pool.max_size must be at least 1".into()));
    }
    if pool.min_idle > pool.max_size {
        return Err(CompatError::Config(format!(
            "pool.min_idle ({}) cannot exceed pool.max_size ({})",
            pool.min_idle, pool.max_size
        )));
    }
    if pool.connection_timeout_secs == 0 {
        return Err(CompatError::Config(
            "pool.connection_timeout_secs must be at least 1".into(),
        ));
    }
    if pool.idle_timeout_secs == 0 {
        return Err(CompatError::Config(
            "pool.idle_timeout_secs must be at least 1".into(),
        ));
    }

    let executor = &config.executor;
    if let Some(0) = executor.query_timeout_ms {
        return Err(CompatError::Config(
            "executor.query_timeout_ms must be at least 1 when set".into(),
        ));
    }
    if executor.default_limit < 1 {
        return Err(CompatError::Config(
            "executor.default_limit must be at least 1".into(),
        ));
    }
    if executor.default_offset < 0 {
        return Err(CompatError::Config(
            "executor.default_offset cannot be negative".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, ExecutorConfig, PoolConfig, ShutdownConfig};

    fn valid_config() -> Config {
        Config {
            database: DatabaseConfig {
                host: "localhost".to_string(),
                port: 1433,
                database: "catalog".to_string(),
                user: "sa".to_string(),
                password: "password".to_string(),
                encrypt: "false".to_string(),
                trust_server_cert: true,
                app_name: None,
            },
            pool: PoolConfig::default(),
            executor: ExecutorConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_database_user() {
        let mut config = valid_config();
        config.database.user = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_pool_size() {
        let mut config = valid_config();
        config.pool.max_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_min_idle_above_max_size() {
        let mut config = valid_config();
        config.pool.max_size = 2;
        config.pool.min_idle = 3;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_idle_timeout() {
        let mut config = valid_config();
        config.pool.idle_timeout_secs = 0;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("pool.idle_timeout_secs"));
    }

    #[test]
    fn test_zero_query_timeout() {
        let mut config = valid_config();
        config.executor.query_timeout_ms = Some(0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_database_config_debug_redacts_password() {
        let mut config = valid_config();
        config.database.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", config.database);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }
}
