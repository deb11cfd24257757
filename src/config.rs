//! Configuration management for rexecd
//!
//! Handles loading and saving configuration from ~/.config/rexecd/config.toml
//! and resolving it into the runtime [`DaemonConfig`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration file name
const CONFIG_FILE: &str = "config.toml";

/// Application name for config directory
pub const APP_NAME: &str = "rexecd";

/// Default bind address
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// Default HTTPS port
pub const DEFAULT_HTTPS_PORT: u16 = 10080;

/// Default graceful shutdown timeout in seconds
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECONDS: u64 = 5;

/// Default auto-delete sweep interval in seconds
pub const DEFAULT_AUTO_DELETE_INTERVAL_SECONDS: u64 = 60;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Invalid bind address: {0}")]
    InvalidAddress(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Application configuration as stored on disk
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Daemon settings
    #[serde(default)]
    pub server: ServerSection,
}

/// The `[server]` table of the config file.
///
/// Every field is optional; unset fields fall back to the built-in defaults
/// when the file is resolved into a [`DaemonConfig`].
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ServerSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_port: Option<u16>,

    /// CA bundle used to verify client certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<PathBuf>,

    /// Server certificate chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,

    /// Server private key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_timeout_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_delete_interval_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_command: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub startup_args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_command: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shutdown_args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_menu: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

impl Config {
    /// Create a new empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the config file path
    ///
    /// Returns ~/.config/rexecd/config.toml on Linux
    pub fn config_path() -> ConfigResult<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Get the config directory path
    ///
    /// Returns ~/.config/rexecd on Linux
    pub fn config_dir() -> ConfigResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join(APP_NAME))
    }

    /// Load configuration from the default location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> ConfigResult<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from an explicit path
    ///
    /// Returns default config if file doesn't exist
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to the default location
    ///
    /// Creates the config directory if it doesn't exist
    pub fn save(&self) -> ConfigResult<()> {
        let path = Self::config_path()?;
        let dir = Self::config_dir()?;

        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }

        let contents = toml::to_string_pretty(self)?;
        fs::write(&path, contents)?;
        Ok(())
    }

    /// Check if any configuration is set
    pub fn is_empty(&self) -> bool {
        self.server == ServerSection::default()
    }

    /// Resolve the stored configuration into runtime settings.
    ///
    /// Certificate paths default to `<config_dir>/rexecd/certs/{ca,cert,key}.pem`.
    pub fn resolve(&self) -> ConfigResult<DaemonConfig> {
        let server = &self.server;

        let bind_address = server
            .bind_address
            .as_deref()
            .unwrap_or(DEFAULT_BIND_ADDRESS);
        let bind_address: IpAddr = bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(bind_address.to_string()))?;

        let shutdown_timeout = server
            .shutdown_timeout_seconds
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECONDS);
        let sweep_interval = server
            .auto_delete_interval_seconds
            .unwrap_or(DEFAULT_AUTO_DELETE_INTERVAL_SECONDS);
        if sweep_interval == 0 {
            return Err(ConfigError::InvalidValue {
                field: "auto_delete_interval_seconds",
                message: "must be greater than zero".to_string(),
            });
        }

        let certs_dir = || Self::config_dir().map(|dir| dir.join("certs"));
        let tls = TlsPaths {
            ca: match &server.ca {
                Some(path) => path.clone(),
                None => certs_dir()?.join("ca.pem"),
            },
            cert: match &server.cert {
                Some(path) => path.clone(),
                None => certs_dir()?.join("cert.pem"),
            },
            key: match &server.key {
                Some(path) => path.clone(),
                None => certs_dir()?.join("key.pem"),
            },
        };

        Ok(DaemonConfig {
            bind_address,
            port: server.https_port.unwrap_or(DEFAULT_HTTPS_PORT),
            tls,
            shutdown_timeout: Duration::from_secs(shutdown_timeout),
            sweep_interval: Duration::from_secs(sweep_interval),
            startup_hook: HookCommand::from_parts(&server.startup_command, &server.startup_args),
            shutdown_hook: HookCommand::from_parts(
                &server.shutdown_command,
                &server.shutdown_args,
            ),
            enable_menu: server.enable_menu.unwrap_or(false),
            verbose: server.verbose.unwrap_or(false),
            debug: server.debug.unwrap_or(false),
        })
    }
}

/// Locations of the PEM files used by the listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// An external command run at startup or shutdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl HookCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn from_parts(program: &Option<String>, args: &[String]) -> Option<Self> {
        program
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(|p| Self::new(p, args.to_vec()))
    }
}

/// Resolved runtime configuration for a daemon instance
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    pub bind_address: IpAddr,
    pub port: u16,
    pub tls: TlsPaths,
    pub shutdown_timeout: Duration,
    pub sweep_interval: Duration,
    pub startup_hook: Option<HookCommand>,
    pub shutdown_hook: Option<HookCommand>,
    pub enable_menu: bool,
    pub verbose: bool,
    pub debug: bool,
}

impl DaemonConfig {
    /// Runtime settings with defaults for everything except the TLS material.
    pub fn new(tls: TlsPaths) -> Self {
        Self {
            bind_address: IpAddr::from([127, 0, 0, 1]),
            port: DEFAULT_HTTPS_PORT,
            tls,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECONDS),
            sweep_interval: Duration::from_secs(DEFAULT_AUTO_DELETE_INTERVAL_SECONDS),
            startup_hook: None,
            shutdown_hook: None,
            enable_menu: false,
            verbose: false,
            debug: false,
        }
    }

    /// The `address:port` string the listener binds to
    pub fn listen_address(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.bind_address, self.port)
    }
}

impl From<&DaemonConfig> for Config {
    /// Spell out every setting, e.g. to write a starter config file.
    fn from(resolved: &DaemonConfig) -> Self {
        let (startup_command, startup_args) = match &resolved.startup_hook {
            Some(h) => (Some(h.program.clone()), h.args.clone()),
            None => (None, Vec::new()),
        };
        let (shutdown_command, shutdown_args) = match &resolved.shutdown_hook {
            Some(h) => (Some(h.program.clone()), h.args.clone()),
            None => (None, Vec::new()),
        };
        Self {
            server: ServerSection {
                bind_address: Some(resolved.bind_address.to_string()),
                https_port: Some(resolved.port),
                ca: Some(resolved.tls.ca.clone()),
                cert: Some(resolved.tls.cert.clone()),
                key: Some(resolved.tls.key.clone()),
                shutdown_timeout_seconds: Some(resolved.shutdown_timeout.as_secs()),
                auto_delete_interval_seconds: Some(resolved.sweep_interval.as_secs()),
                startup_command,
                startup_args,
                shutdown_command,
                shutdown_args,
                enable_menu: Some(resolved.enable_menu),
                verbose: Some(resolved.verbose),
                debug: Some(resolved.debug),
                log_file: None,
            },
        }
    }
}

/// Format the configuration for display
pub fn format_config(config: &DaemonConfig) -> String {
    fn hook(h: &Option<HookCommand>) -> String {
        match h {
            Some(h) if h.args.is_empty() => format!("\"{}\"", h.program),
            Some(h) => format!("\"{} {}\"", h.program, h.args.join(" ")),
            None => "(not set)".to_string(),
        }
    }

    let lines = vec![
        "Current configuration:".to_string(),
        String::new(),
        format!("  bind_address = \"{}\"", config.bind_address),
        format!("  https_port = {}", config.port),
        format!("  ca = \"{}\"", config.tls.ca.display()),
        format!("  cert = \"{}\"", config.tls.cert.display()),
        format!("  key = \"{}\"", config.tls.key.display()),
        format!(
            "  shutdown_timeout_seconds = {}",
            config.shutdown_timeout.as_secs()
        ),
        format!(
            "  auto_delete_interval_seconds = {}",
            config.sweep_interval.as_secs()
        ),
        format!("  startup_command = {}", hook(&config.startup_hook)),
        format!("  shutdown_command = {}", hook(&config.shutdown_hook)),
        format!("  enable_menu = {}", config.enable_menu),
        format!("  verbose = {}", config.verbose),
        format!("  debug = {}", config.debug),
    ];

    lines.join("\n")
}
