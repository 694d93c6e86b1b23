//! Process configuration for the conveyor service.
//!
//! Loaded in priority order: environment variables, then `conveyor.toml`,
//! then built-in defaults. The service runs out of the box with the defaults;
//! broker credentials live in the store, not here.

use std::net::SocketAddr;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use conveyor_core::{CoreError, Result};
use conveyor_delivery::alert::DEFAULT_WEBHOOK_BASE;

const CONFIG_FILE: &str = "conveyor.toml";

/// Complete service configuration with defaults, file, and environment
/// overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path of the SQLite database file.
    ///
    /// Environment variable: `DATABASE_PATH`
    #[serde(default = "default_database_path", alias = "DATABASE_PATH")]
    pub database_path: String,

    /// Admin API bind address.
    ///
    /// Environment variable: `HOST`
    #[serde(default = "default_host", alias = "HOST")]
    pub host: String,

    /// Admin API bind port.
    ///
    /// Environment variable: `PORT`
    #[serde(default = "default_port", alias = "PORT")]
    pub port: u16,

    /// Admin API request timeout in seconds.
    ///
    /// Environment variable: `REQUEST_TIMEOUT`
    #[serde(default = "default_request_timeout", alias = "REQUEST_TIMEOUT")]
    pub request_timeout: u64,

    /// Directory receiving the daily-rotated log files.
    ///
    /// Environment variable: `LOG_DIR`
    #[serde(default = "default_log_dir", alias = "LOG_DIR")]
    pub log_dir: String,

    /// Number of rotated log files to retain.
    ///
    /// Environment variable: `LOG_RETENTION`
    #[serde(default = "default_log_retention", alias = "LOG_RETENTION")]
    pub log_retention: usize,

    /// Negotiated AMQP frame size in bytes.
    ///
    /// Environment variable: `FRAME_MAX`
    #[serde(default = "default_frame_max", alias = "FRAME_MAX")]
    pub frame_max: u32,

    /// AMQP heartbeat interval in seconds.
    ///
    /// Environment variable: `HEARTBEAT`
    #[serde(default = "default_heartbeat", alias = "HEARTBEAT")]
    pub heartbeat: u16,

    /// Base URL of the chat-robot alert webhook.
    ///
    /// Environment variable: `ALERT_WEBHOOK`
    #[serde(default = "default_alert_webhook", alias = "ALERT_WEBHOOK")]
    pub alert_webhook: String,

    /// Log filter directive.
    ///
    /// Environment variable: `RUST_LOG`
    #[serde(default = "default_log_level", alias = "RUST_LOG")]
    pub rust_log: String,
}

impl Config {
    /// Loads configuration from defaults, `conveyor.toml`, and environment
    /// overrides, then validates it.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` for unparseable sources or invalid
    /// values; the process must refuse to serve in that case.
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(""));

        let config: Self = figment
            .extract()
            .map_err(|e| CoreError::invalid(format!("failed to load configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses the admin API bind address.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` when host/port do not form a socket
    /// address.
    pub fn server_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| CoreError::invalid(format!("invalid server address: {e}")))
    }

    fn validate(&self) -> Result<()> {
        if self.database_path.is_empty() {
            return Err(CoreError::invalid("database_path must not be empty"));
        }
        if self.port == 0 {
            return Err(CoreError::invalid("port must be greater than 0"));
        }
        if self.log_retention == 0 {
            return Err(CoreError::invalid("log_retention must be at least 1"));
        }
        if self.frame_max < 4096 {
            return Err(CoreError::invalid("frame_max must be at least 4096"));
        }
        self.server_addr().map(|_| ())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            host: default_host(),
            port: default_port(),
            request_timeout: default_request_timeout(),
            log_dir: default_log_dir(),
            log_retention: default_log_retention(),
            frame_max: default_frame_max(),
            heartbeat: default_heartbeat(),
            alert_webhook: default_alert_webhook(),
            rust_log: default_log_level(),
        }
    }
}

fn default_database_path() -> String {
    "./rch.db".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1981
}

fn default_request_timeout() -> u64 {
    30
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_retention() -> usize {
    90
}

fn default_frame_max() -> u32 {
    131_072
}

fn default_heartbeat() -> u16 {
    60
}

fn default_alert_webhook() -> String {
    DEFAULT_WEBHOOK_BASE.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.database_path, "./rch.db");
        assert_eq!(config.port, 1981);
        assert_eq!(config.log_retention, 90);
    }

    #[test]
    fn environment_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.set_env("DATABASE_PATH", "/var/lib/conveyor/state.db");
            jail.set_env("PORT", "8088");
            jail.set_env("LOG_RETENTION", "14");
            jail.set_env("HEARTBEAT", "30");

            let config = Config::load().expect("config should load");
            assert_eq!(config.database_path, "/var/lib/conveyor/state.db");
            assert_eq!(config.port, 8088);
            assert_eq!(config.log_retention, 14);
            assert_eq!(config.heartbeat, 30);

            Ok(())
        });
    }

    #[test]
    fn config_file_sits_between_defaults_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "conveyor.toml",
                r#"
                port = 9000
                log_dir = "/var/log/conveyor"
                "#,
            )?;
            jail.set_env("PORT", "9001");

            let config = Config::load().expect("config should load");
            assert_eq!(config.port, 9001);
            assert_eq!(config.log_dir, "/var/log/conveyor");

            Ok(())
        });
    }

    #[test]
    fn invalid_values_are_rejected() {
        let config = Config { port: 0, ..Default::default() };
        assert!(config.validate().is_err());

        let config = Config { database_path: String::new(), ..Default::default() };
        assert!(config.validate().is_err());

        let config = Config { log_retention: 0, ..Default::default() };
        assert!(config.validate().is_err());

        let config = Config { frame_max: 1024, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn server_addr_parses_host_and_port() {
        let config = Config { host: "127.0.0.1".to_string(), port: 9000, ..Default::default() };
        let addr = config.server_addr().expect("should parse socket address");
        assert_eq!(addr.port(), 9000);
    }
}
