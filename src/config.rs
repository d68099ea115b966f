//! Configuration module for the wordmux server.
//!
//! Values come from three layers: command-line flags, an optional TOML file,
//! and built-in defaults, in that order of precedence. The server runs
//! without any arguments.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Upper bound for `max_clients`. The table and the `poll` interest array
/// are allocated up front at this size.
pub const MAX_CLIENTS_LIMIT: usize = 65_536;

/// Upper bound for `buffer_size`, the per-read chunk.
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Readiness-detection strategy used by the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MultiplexerKind {
    /// Bitmask interest set (`select(2)`), bounded by `FD_SETSIZE`.
    Select,
    /// Event-array interest set (`poll(2)`).
    Poll,
}

/// Command-line arguments for the word-count server
#[derive(Parser, Debug)]
#[command(name = "wordmux")]
#[command(author = "wordmux authors")]
#[command(version = "0.1.0")]
#[command(about = "A readiness-multiplexed word-count server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (all interfaces by default)
    #[arg(long)]
    pub host: Option<String>,

    /// TCP port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Listen backlog
    #[arg(short, long)]
    pub backlog: Option<i32>,

    /// Maximum number of concurrent client connections
    #[arg(short = 'm', long)]
    pub max_clients: Option<usize>,

    /// Size of the per-read chunk in bytes
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Readiness strategy
    #[arg(long, value_enum)]
    pub multiplexer: Option<MultiplexerKind>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// On-disk layout of the optional config file
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[server]` table
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_multiplexer")]
    pub multiplexer: MultiplexerKind,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
            max_clients: default_max_clients(),
            buffer_size: default_buffer_size(),
            multiplexer: default_multiplexer(),
        }
    }
}

/// `[logging]` table
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
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4981
}

fn default_backlog() -> i32 {
    10
}

fn default_max_clients() -> usize {
    100
}

fn default_buffer_size() -> usize {
    1024
}

fn default_multiplexer() -> MultiplexerKind {
    MultiplexerKind::Poll
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Effective settings after merging every layer
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backlog: i32,
    pub max_clients: usize,
    pub buffer_size: usize,
    pub multiplexer: MultiplexerKind,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(None, TomlConfig::default())
    }
}

impl Config {
    /// Parse the command line, read the TOML file it names (if any), and
    /// merge both over the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // The file is optional
        let toml_config = match cli.config {
            Some(ref config_path) => load_toml(config_path)?,
            None => TomlConfig::default(),
        };

        let config = Self::merge(Some(cli), toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: Option<CliArgs>, toml_config: TomlConfig) -> Self {
        let server = toml_config.server;
        let Some(cli) = cli else {
            return Config {
                host: server.host,
                port: server.port,
                backlog: server.backlog,
                max_clients: server.max_clients,
                buffer_size: server.buffer_size,
                multiplexer: server.multiplexer,
                log_level: toml_config.logging.level,
            };
        };

        Config {
            host: cli.host.unwrap_or(server.host),
            port: cli.port.unwrap_or(server.port),
            backlog: cli.backlog.unwrap_or(server.backlog),
            max_clients: cli.max_clients.unwrap_or(server.max_clients),
            buffer_size: cli.buffer_size.unwrap_or(server.buffer_size),
            multiplexer: cli.multiplexer.unwrap_or(server.multiplexer),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// Reject values the event loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_clients == 0 {
            return Err(ConfigError::Invalid("max_clients must be at least 1"));
        }
        if self.max_clients > MAX_CLIENTS_LIMIT {
            return Err(ConfigError::Invalid("max_clients must not exceed 65536"));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be at least 1"));
        }
        if self.buffer_size > MAX_BUFFER_SIZE {
            return Err(ConfigError::Invalid("buffer_size must not exceed 16 MiB"));
        }
        Ok(())
    }

    /// The `host:port` string the listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn load_toml(path: &Path) -> Result<TomlConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
    toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
}

/// Why a configuration could not be produced
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
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
            ConfigError::Invalid(reason) => write!(f, "Invalid configuration: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}
