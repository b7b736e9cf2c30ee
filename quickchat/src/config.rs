//! Configuration system for the `QuickChat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/quickchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::channel::ChannelConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// No bearer token was configured.
    #[error("no token configured (use --token, QUICKCHAT_TOKEN or [network] token)")]
    MissingToken,

    /// The server URL is not a usable http(s) URL.
    #[error("invalid server url {url}: {reason}")]
    InvalidUrl {
        /// The configured value.
        url: String,
        /// Why it was refused.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    reconnect: ReconnectFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    server_url: Option<String>,
    token: Option<String>,
    connect_timeout_secs: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Exponential backoff between push-channel connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for the doubling delay.
    pub max_backoff: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ReconnectConfig {
    /// The delay that follows `current`.
    #[must_use]
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_backoff)
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP base URL of the server.
    pub server_url: String,
    /// Bearer token identifying the user.
    pub token: Option<String>,
    /// Timeout for opening the push channel.
    pub connect_timeout: Duration,
    /// Capacity of the channel-event and command queues.
    pub channel_capacity: usize,
    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:5000".to_string(),
            token: None,
            connect_timeout: Duration::from_secs(10),
            channel_capacity: 256,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            server_url: cli
                .server_url
                .clone()
                .or_else(|| file.network.server_url.clone())
                .unwrap_or(defaults.server_url),
            token: cli.token.clone().or_else(|| file.network.token.clone()),
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            channel_capacity: file
                .network
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            reconnect: ReconnectConfig {
                initial_backoff: file
                    .reconnect
                    .initial_backoff_ms
                    .map_or(defaults.reconnect.initial_backoff, Duration::from_millis),
                max_backoff: file
                    .reconnect
                    .max_backoff_ms
                    .map_or(defaults.reconnect.max_backoff, Duration::from_millis),
            },
        }
    }

    /// The parsed HTTP base URL.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidUrl`] unless `server_url` is an `http` or
    /// `https` URL.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidUrl {
            url: self.server_url.clone(),
            reason,
        };
        let url = Url::parse(&self.server_url).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(invalid(format!("unsupported scheme {other}"))),
        }
    }

    /// Build the push-channel settings.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingToken`] without a token, or
    /// [`ConfigError::InvalidUrl`] for a bad server URL.
    pub fn channel_config(&self) -> Result<ChannelConfig, ConfigError> {
        let token = self.token.clone().ok_or(ConfigError::MissingToken)?;
        let mut url = self.base_url()?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|()| ConfigError::InvalidUrl {
            url: self.server_url.clone(),
            reason: format!("cannot switch to {scheme}"),
        })?;
        url.path_segments_mut()
            .map_err(|()| ConfigError::InvalidUrl {
                url: self.server_url.clone(),
                reason: "cannot be a base".into(),
            })?
            .pop_if_empty()
            .push("ws");

        Ok(ChannelConfig {
            url,
            token,
            connect_timeout: self.connect_timeout,
            capacity: self.channel_capacity,
            reconnect: self.reconnect,
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "QuickChat direct messaging client")]
pub struct CliArgs {
    /// HTTP base URL of the server.
    #[arg(long, env = "QUICKCHAT_SERVER")]
    pub server_url: Option<String>,

    /// Bearer token issued for your user.
    #[arg(long, env = "QUICKCHAT_TOKEN")]
    pub token: Option<String>,

    /// Path to config file (default: `~/.config/quickchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "QUICKCHAT_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/quickchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("quickchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
