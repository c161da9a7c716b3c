//! Configuration module for the linewire server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Connection-management strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// mio event loop(s) multiplexing every session.
    #[default]
    Reactive,
    /// One blocking OS thread per connection.
    Threaded,
}

/// Built-in protocol adapter served on every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    Ping,
    Echo,
    #[default]
    Kv,
}

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "linewire")]
#[command(author = "linewire authors")]
#[command(version = "0.1.0")]
#[command(about = "A line-oriented TCP request/response server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1)
    #[arg(long)]
    pub host: Option<String>,

    /// TCP port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Concurrency strategy
    #[arg(short, long, value_enum)]
    pub strategy: Option<Strategy>,

    /// Protocol served to clients
    #[arg(long, value_enum)]
    pub protocol: Option<ProtocolType>,

    /// Number of event loops (reactive strategy only)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of live connections (per event loop for reactive)
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Size of each connection's receive buffer in bytes
    #[arg(short = 'b', long)]
    pub buffer_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on; required here or on the command line
    pub port: Option<u16>,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub protocol: ProtocolType,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Capacity of the mio events batch per poll
    #[serde(default = "default_events_capacity")]
    pub events_capacity: usize,
    /// How often blocked loops re-check the stop flag, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            strategy: Strategy::default(),
            protocol: ProtocolType::default(),
            workers: default_workers(),
            max_connections: default_max_connections(),
            buffer_size: default_buffer_size(),
            events_capacity: default_events_capacity(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_workers() -> usize {
    1
}

fn default_max_connections() -> usize {
    1024
}

fn default_buffer_size() -> usize {
    4 * 1024
}

fn default_events_capacity() -> usize {
    1024
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub strategy: Strategy,
    pub protocol: ProtocolType,
    pub workers: usize,
    pub max_connections: usize,
    pub buffer_size: usize,
    pub events_capacity: usize,
    pub poll_interval: Duration,
    pub log_level: String,
}

impl Default for Config {
    /// Defaults with port 0, which binds an ephemeral port.
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            host: server.host,
            port: 0,
            strategy: server.strategy,
            protocol: server.protocol,
            workers: server.workers,
            max_connections: server.max_connections,
            buffer_size: server.buffer_size,
            events_capacity: server.events_capacity,
            poll_interval: Duration::from_millis(server.poll_interval_ms),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence) and validate.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let server = toml_config.server;

        let port = cli.port.or(server.port).ok_or(ConfigError::MissingPort)?;
        if port == 0 {
            return Err(ConfigError::Invalid("port must be a positive integer"));
        }

        let config = Config {
            host: cli.host.unwrap_or(server.host),
            port,
            strategy: cli.strategy.unwrap_or(server.strategy),
            protocol: cli.protocol.unwrap_or(server.protocol),
            workers: cli.workers.unwrap_or(server.workers),
            max_connections: cli.max_connections.unwrap_or(server.max_connections),
            buffer_size: cli.buffer_size.unwrap_or(server.buffer_size),
            events_capacity: server.events_capacity,
            poll_interval: Duration::from_millis(server.poll_interval_ms),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        };

        if config.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be greater than zero"));
        }
        if config.workers == 0 {
            return Err(ConfigError::Invalid("workers must be greater than zero"));
        }
        if config.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be greater than zero",
            ));
        }
        if config.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than zero",
            ));
        }

        Ok(config)
    }

    /// Address string handed to the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    MissingPort,
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::MissingPort => {
                write!(f, "No port configured: pass --port or set [server] port")
            }
            ConfigError::Invalid(reason) => write!(f, "Invalid configuration: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["linewire"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, None);
        assert_eq!(config.server.strategy, Strategy::Reactive);
        assert_eq!(config.server.protocol, ProtocolType::Kv);
        assert_eq!(config.server.buffer_size, 4096);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "0.0.0.0"
            port = 7000
            strategy = "threaded"
            protocol = "ping"
            workers = 4
            buffer_size = 512
            poll_interval_ms = 10

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, Some(7000));
        assert_eq!(config.server.strategy, Strategy::Threaded);
        assert_eq!(config.server.protocol, ProtocolType::Ping);
        assert_eq!(config.server.workers, 4);
        assert_eq!(config.server.buffer_size, 512);
        assert_eq!(config.server.poll_interval_ms, 10);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: TomlConfig = toml::from_str(
            r#"
            [server]
            port = 7000
            strategy = "threaded"
            "#,
        )
        .unwrap();

        let config = Config::merge(cli(&["--port", "7100", "-s", "reactive"]), file).unwrap();
        assert_eq!(config.port, 7100);
        assert_eq!(config.strategy, Strategy::Reactive);
        assert_eq!(config.listen_addr(), "127.0.0.1:7100");
    }

    #[test]
    fn test_cli_log_level_overrides_file() {
        let file = || -> TomlConfig {
            toml::from_str(
                r#"
                [server]
                port = 7000

                [logging]
                level = "debug"
                "#,
            )
            .unwrap()
        };

        let config = Config::merge(cli(&["--log-level", "info"]), file()).unwrap();
        assert_eq!(config.log_level, "info");

        let config = Config::merge(cli(&[]), file()).unwrap();
        assert_eq!(config.log_level, "debug");

        let config = Config::merge(cli(&["-p", "7000"]), TomlConfig::default()).unwrap();
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_port_is_required() {
        let err = Config::merge(cli(&[]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingPort));

        let err = Config::merge(cli(&["--port", "0"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_buffer_rejected() {
        let err =
            Config::merge(cli(&["-p", "7000", "-b", "0"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
