//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use dash_ai::providers::DEFAULT_BASE_URL;

/// Environment variable overriding the service base URL
pub const BASE_URL_ENV: &str = "DASH_API_BASE_URL";

/// Configuration for dash
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the chat service
    pub base_url: Option<String>,
    /// Directory the conversation history is stored in
    pub data_dir: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dash")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for DASH_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("DASH_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read config file");
                Self::default()
            }
        }
    }

    /// Parse config file contents, falling back to defaults on error
    pub fn parse(content: &str) -> Self {
        match toml::from_str(content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse config file");
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            base_url: Some(DEFAULT_BASE_URL.to_string()),
            data_dir: None,
        };

        default_config.save()?;
        Ok(path)
    }

    /// Directory for the conversation history blob
    pub fn data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => expand_home(dir),
            None => dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("dash"),
        }
    }
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some("") => "",
        Some(rest) if rest.starts_with('/') => &rest[1..],
        _ => return PathBuf::from(path),
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}

/// Pick the base URL: command line, then environment, then config file,
/// then the local default. Blank values are skipped.
pub fn resolve_base_url(cli: Option<String>, env: Option<String>, config: &Config) -> String {
    [cli, env, config.base_url.clone()]
        .into_iter()
        .flatten()
        .map(|url| url.trim().to_string())
        .find(|url| !url.is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# dash configuration file
# Place at ~/.config/dash/config.toml (Linux) or set DASH_CONFIG_PATH

# Base URL of the chat service (DASH_API_BASE_URL overrides this)
base_url = "http://localhost:8000"

# Where the conversation history is kept (optional, "~/" is expanded)
# data_dir = "/home/me/.local/share/dash"
"#
}
