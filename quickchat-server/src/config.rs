//! Configuration system for the `QuickChat` server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/quickchat-server/config.toml`)
//! 4. Compiled defaults
//!
//! Registered users and their bearer tokens only come from the config file.

use std::path::PathBuf;

use quickchat_proto::message::MAX_TEXT_LEN;

/// Errors that can occur when loading server configuration.
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

    /// Two `[[users]]` entries share an id or a token.
    #[error("duplicate user entry: {0}")]
    DuplicateUser(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the server.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerConfigFile {
    server: ServerFileConfig,
    users: Vec<UserEntry>,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_text_len: Option<usize>,
}

/// One `[[users]]` entry: a registered user and the token they present.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct UserEntry {
    /// User identifier.
    pub id: String,
    /// Display name shown in peers' sidebars.
    pub full_name: String,
    /// Optional profile blurb.
    #[serde(default)]
    pub bio: Option<String>,
    /// Bearer token that authenticates this user.
    pub token: String,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "QuickChat message delivery server")]
pub struct ServerCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "QUICKCHAT_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/quickchat-server/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum message text length in bytes.
    #[arg(long)]
    pub max_text_len: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "QUICKCHAT_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:5000`).
    pub bind_addr: String,
    /// Maximum allowed message text length in bytes.
    pub max_text_len: usize,
    /// Log level filter string.
    pub log_level: String,
    /// Registered users.
    pub users: Vec<UserEntry>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            max_text_len: MAX_TEXT_LEN,
            log_level: "info".to_string(),
            users: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and a missing
    /// file is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read or
    /// parsed, or if two users share an id or a token.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, file);
        config.check_users()?;
        Ok(config)
    }

    /// Resolve a `ServerConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &ServerCliArgs, file: ServerConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or(file.server.bind_addr)
                .unwrap_or(defaults.bind_addr),
            max_text_len: cli
                .max_text_len
                .or(file.server.max_text_len)
                .unwrap_or(defaults.max_text_len),
            log_level: cli.log_level.clone(),
            users: file.users,
        }
    }

    fn check_users(&self) -> Result<(), ConfigError> {
        let mut ids = std::collections::HashSet::new();
        let mut tokens = std::collections::HashSet::new();
        for user in &self.users {
            if !ids.insert(user.id.as_str()) {
                return Err(ConfigError::DuplicateUser(format!("id {}", user.id)));
            }
            if !tokens.insert(user.token.as_str()) {
                return Err(ConfigError::DuplicateUser(format!(
                    "token of user {}",
                    user.id
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the server.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<ServerConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ServerConfigFile::default());
        };
        config_dir.join("quickchat-server").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
