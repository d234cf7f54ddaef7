use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Relay server settings; sections missing from every source keep their defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub enabled: bool,
    pub origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Frames buffered per user before slow subscribers start skipping
    pub channel_capacity: usize,
    /// SSE keep-alive comment interval
    pub keepalive_secs: u64,
    /// How often channels without subscribers are dropped
    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

fn default_request_timeout() -> u64 {
    30
}

fn default_prune_interval() -> u64 {
    60
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl RelayConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs.max(1))
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8787,
                request_timeout_secs: default_request_timeout(),
            },
            cors: CorsConfig {
                enabled: true,
                origins: vec!["*".to_string()],
            },
            relay: RelayConfig {
                channel_capacity: 256,
                keepalive_secs: 15,
                prune_interval_secs: default_prune_interval(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from TOML files and environment variables
    ///
    /// Hierarchy (weakest to strongest):
    /// 1. config/default.toml
    /// 2. config/{ENV}.toml (if ENV is set)
    /// 3. Environment variables (`SERVER__PORT`, `RELAY__CHANNEL_CAPACITY`,
    ///    `LOG_LEVEL`, `LOG_FORMAT`)
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("ENV").unwrap_or_else(|_| "dev".to_string());

        let builder = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::default()
                    .prefix("SERVER")
                    .keep_prefix(true)
                    .separator("__")
                    .try_parsing(true),
            )
            .add_source(
                Environment::default()
                    .prefix("RELAY")
                    .keep_prefix(true)
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        let mut cfg: Config = config.try_deserialize()?;

        // Flat LOG_LEVEL / LOG_FORMAT, as most deployments already set them
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            cfg.logging.level = level;
        }
        if let Ok(format) = std::env::var("LOG_FORMAT") {
            cfg.logging.format = format;
        }

        Ok(cfg)
    }

    /// Load config from a specific path (useful for testing)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let builder = ConfigLoader::builder().add_source(File::from(path.as_ref()));

        let config = builder.build()?;
        config.try_deserialize()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_structure() {
        let toml = r#"
            [server]
            host = "127.0.0.1"
            port = 9000

            [cors]
            enabled = false
            origins = []

            [relay]
            channel_capacity = 32
            keepalive_secs = 5

            [logging]
            level = "debug"
            format = "json"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.request_timeout_secs, 30);
        assert_eq!(config.relay.channel_capacity, 32);
        assert_eq!(config.relay.prune_interval_secs, 60);
        assert_eq!(config.bind_address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_bundled_default_file_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
        let config = Config::from_file(path).unwrap();
        assert_eq!(config.server.port, Config::default().server.port);
        assert_eq!(config.logging.format, "pretty");
    }
}
