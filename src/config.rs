use serde::{Deserialize, Serialize};

/// Default configuration file (extension resolved by the `config` crate)
pub const DEFAULT_CONFIG_PATH: &str = "config";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Request bodies larger than this are rejected with 400
    pub max_body_bytes: usize,
    /// Captured request/response bodies are truncated to this in log records
    pub log_body_max_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_body_bytes: 10 * 1024 * 1024,
            log_body_max_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    /// When false no query logger is attached to the datastore
    pub log_sql: bool,
    /// silent | error | warn | info
    pub log_level: String,
    /// 0 disables slow-query flagging
    pub slow_threshold_ms: u64,
    pub ignore_record_not_found: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/users.db".to_string(),
            max_connections: 5,
            log_sql: true,
            log_level: "info".to_string(),
            slow_threshold_ms: 1000,
            ignore_record_not_found: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// debug | info | warn | error
    pub level: String,
    /// Active file name; strftime tokens are evaluated in `utc_offset_hours`
    pub filename: String,
    pub max_size: u64,
    /// K | M | G | T
    pub max_size_unit: String,
    pub max_backups: usize,
    /// Days
    pub max_age: u64,
    pub compress: bool,
    pub utc_offset_hours: i32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            filename: "logs/app-%Y-%m-%d.log".to_string(),
            max_size: 100,
            max_size_unit: "M".to_string(),
            max_backups: 10,
            max_age: 30,
            compress: false,
            utc_offset_hours: 8,
        }
    }
}

pub fn load_config(path: &str) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::with_name(path).required(path != DEFAULT_CONFIG_PATH))
        .add_source(config::Environment::with_prefix("USER_API").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    if cfg.server.port == 0 {
        anyhow::bail!("Server port must be non-zero");
    }

    if cfg.server.max_body_bytes == 0 {
        anyhow::bail!("server.max_body_bytes must be greater than 0");
    }

    if cfg.database.url.trim().is_empty() {
        anyhow::bail!("database.url cannot be empty");
    }

    if cfg.database.max_connections == 0 {
        anyhow::bail!("database.max_connections must be greater than 0");
    }

    if cfg.log.filename.trim().is_empty() {
        anyhow::bail!("log.filename cannot be empty");
    }

    if !(-23..=23).contains(&cfg.log.utc_offset_hours) {
        anyhow::bail!(
            "log.utc_offset_hours must be between -23 and 23, got {}",
            cfg.log.utc_offset_hours
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Config::default();
        assert!(validate_config(&cfg).is_ok());
        assert_eq!(cfg.server.max_body_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.log.filename, "logs/app-%Y-%m-%d.log");
        assert_eq!(cfg.log.utc_offset_hours, 8);
        assert_eq!(cfg.database.log_level, "info");
    }

    #[test]
    fn test_load_partial_yaml_fills_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  port: 9090\nlog:\n  level: debug\n  max_size: 5\n  max_size_unit: K\n"
        )
        .unwrap();

        let path = file.path().with_extension("");
        let path = path.to_str().unwrap();
        // `File::with_name` resolves the extension itself
        let cfg = load_config(path).unwrap();

        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.log.level, "debug");
        assert_eq!(cfg.log.max_size, 5);
        assert_eq!(cfg.log.max_size_unit, "K");
        assert_eq!(cfg.log.max_backups, 10);
        assert!(cfg.database.log_sql);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(load_config("/nonexistent/user-api-config").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = Config::default();
        cfg.log.utc_offset_hours = 24;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.database.max_connections = 0;
        assert!(validate_config(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.server.port = 0;
        assert!(validate_config(&cfg).is_err());
    }
}
