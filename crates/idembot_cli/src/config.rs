//! Configuration file support for idembot.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `IDEMBOT_`, e.g., `IDEMBOT_GITHUB_TOKEN`)
//! 3. Config file (~/.config/idembot/config.toml or ./idembot.toml)
//! 4. Built-in defaults
//!
//! Example config file:
//! ```toml
//! [github]
//! token = "ghp_..."  # or use IDEMBOT_GITHUB_TOKEN env var
//! url = "https://api.github.com"  # GitHub Enterprise: https://ghe.example.com/api/v3
//!
//! [cache]
//! root = "/var/cache/idembot"  # default: <setup file dir>/cache
//!
//! [poll]
//! attempts = 5
//! interval = 3000  # milliseconds
//!
//! [run]
//! policy = "fail-fast"  # or "continue"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use idembot::github::GITHUB_API_URL;
use idembot::poll::{DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL_MS};
use idembot::{FailurePolicy, PollConfig};
use serde::Deserialize;

/// Legacy token variable, still honoured.
const LEGACY_TOKEN_VAR: &str = "AUTH_TOKEN";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub github: GitHubConfig,
    pub cache: CacheConfig,
    pub poll: PollSettings,
    pub run: RunConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// API token. Can also be set via IDEMBOT_GITHUB_TOKEN.
    pub token: Option<String>,
    /// API base URL.
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Snapshot store root.
    pub root: Option<PathBuf>,
}

/// Mergeability polling bounds.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub attempts: u32,
    /// Milliseconds between attempts.
    pub interval: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_POLL_ATTEMPTS,
            interval: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub policy: FailurePolicy,
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/idembot/config.toml)
    /// 3. Local config file (./idembot.toml)
    /// 4. Environment variables with IDEMBOT_ prefix
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(proj_dirs) = ProjectDirs::from("", "", "idembot") {
            let xdg_config = proj_dirs.config_dir().join("config.toml");
            if xdg_config.exists() {
                tracing::debug!("Loading config from {:?}", xdg_config);
                builder = builder.add_source(
                    File::from(xdg_config)
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }

        let local_config = PathBuf::from("idembot.toml");
        if local_config.exists() {
            tracing::debug!("Loading config from ./idembot.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // e.g., IDEMBOT_GITHUB_TOKEN -> github.token
        builder = builder.add_source(
            Environment::with_prefix("IDEMBOT")
                .separator("_")
                .try_parsing(true),
        );

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to deserialize config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to build config: {}", e);
                Config::default()
            }
        }
    }

    /// The GitHub token, falling back to the legacy `AUTH_TOKEN` variable.
    pub fn github_token(&self) -> Option<String> {
        self.github
            .token
            .clone()
            .or_else(|| std::env::var(LEGACY_TOKEN_VAR).ok())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn api_url(&self) -> &str {
        self.github.url.as_deref().unwrap_or(GITHUB_API_URL)
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig::new(
            self.poll.attempts.max(1),
            Duration::from_millis(self.poll.interval),
        )
    }

    /// Where snapshots live.
    ///
    /// An explicit `cache.root` wins. Otherwise the cache sits next to the
    /// setup file when there is one, else in the state directory.
    pub fn cache_root(&self, setup_file: Option<&Path>) -> Option<PathBuf> {
        if let Some(root) = &self.cache.root {
            return Some(root.clone());
        }
        if let Some(file) = setup_file {
            let dir = file
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            return Some(dir.join("cache"));
        }
        Self::default_state_dir().map(|dir| dir.join("cache"))
    }

    /// Get the default state directory path.
    ///
    /// On Linux, this is `$XDG_STATE_HOME/idembot` or `~/.local/state/idembot`.
    /// On macOS/Windows, falls back to the data directory.
    pub fn default_state_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "idembot").map(|dirs| {
            dirs.state_dir()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| dirs.data_dir().to_path_buf())
        })
    }
}
