// Runtime settings, read once from the environment in `main` and then
// overridden by command-line flags.

use std::path::PathBuf;
use std::time::Duration;

/// Production API gateway.
pub const DEFAULT_API_URL: &str = "https://api.stupidassistant.com";

/// Request timeout when `ASSISTANT_HTTP_TIMEOUT_SECS` is unset or invalid.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub const ENV_API_URL: &str = "ASSISTANT_API_URL";
pub const ENV_CONFIG_DIR: &str = "ASSISTANT_CONFIG_DIR";
pub const ENV_TIMEOUT: &str = "ASSISTANT_HTTP_TIMEOUT_SECS";

const APP_DIR: &str = "assistant-cli";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Base URL without a trailing slash.
    pub api_url: String,
    /// Directory holding the key/value state file.
    pub config_dir: PathBuf,
    pub timeout: Duration,
}

impl Settings {
    /// Settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Settings from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let api_url = lookup(ENV_API_URL)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.into());
        let config_dir = lookup(ENV_CONFIG_DIR)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_config_dir);
        let timeout = lookup(ENV_TIMEOUT)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self {
            api_url: normalize_url(&api_url),
            config_dir,
            timeout: Duration::from_secs(timeout),
        }
    }

    pub fn with_api_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url {
            self.api_url = normalize_url(&url);
        }
        self
    }
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn default_config_dir() -> PathBuf {
    if let Some(dir) = dirs::config_dir() {
        return dir.join(APP_DIR);
    }
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(format!(".{APP_DIR}"))
}
