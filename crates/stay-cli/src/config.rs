//! Configuration file support

use serde::{Deserialize, Serialize};
use stay_api::ClientConfig;
use stay_chat::ChatConfig;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for stay
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend API root, e.g. `http://localhost:8000/api/v1`
    pub base_url: Option<String>,
    /// Timeout for ordinary requests, in seconds
    pub request_timeout_secs: Option<u64>,
    /// Timeout for a whole streamed reply, in seconds
    pub stream_timeout_secs: Option<u64>,
    /// Text shown in a reply when streaming fails
    pub failure_notice: Option<String>,
    /// Title for new conversations; the server derives one when unset
    pub default_title: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stay")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("STAY_CONFIG_PATH") {
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
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
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

        let defaults = ClientConfig::default();
        let default_config = Config {
            base_url: Some(defaults.base_url),
            request_timeout_secs: Some(defaults.request_timeout.as_secs()),
            stream_timeout_secs: Some(defaults.stream_timeout.as_secs()),
            failure_notice: None,
            default_title: None,
        };

        default_config.save()?;
        Ok(path)
    }

    /// Build the client config; `flag` wins over `STAY_API_BASE_URL`, which
    /// wins over the file
    pub fn client_config(&self, flag: Option<String>) -> ClientConfig {
        let env = std::env::var("STAY_API_BASE_URL").ok();
        self.client_config_from(flag, env)
    }

    fn client_config_from(&self, flag: Option<String>, env: Option<String>) -> ClientConfig {
        let mut config = ClientConfig::default();
        if let Some(base_url) = flag.or(env).or_else(|| self.base_url.clone()) {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = self.request_timeout_secs {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.stream_timeout_secs {
            config.stream_timeout = Duration::from_secs(secs);
        }
        config
    }

    /// Build the store config
    pub fn chat_config(&self) -> ChatConfig {
        let mut config = ChatConfig {
            default_title: self.default_title.clone(),
            ..ChatConfig::default()
        };
        if let Some(notice) = &self.failure_notice {
            config.failure_notice = notice.clone();
        }
        config
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# stay configuration file
# Place at ~/.config/stay/config.toml (Linux/Mac) or %APPDATA%\stay\config.toml (Windows)

# Backend API root (STAY_API_BASE_URL and --base-url take precedence)
base_url = "http://localhost:8000/api/v1"

# Timeout for ordinary requests, in seconds
request_timeout_secs = 30

# Timeout for a whole streamed reply, in seconds
stream_timeout_secs = 300

# Text shown in a reply when streaming fails (optional)
# failure_notice = "Sorry, something went wrong. Please try again."

# Title for new conversations (optional, the server derives one otherwise)
# default_title = "New conversation"
"#
}
