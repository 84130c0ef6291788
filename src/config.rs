use std::path::{Path, PathBuf};

use figment::value::{Dict, Map};
use figment::{Error as FigmentError, Figment, Metadata, Profile, Provider};
use serde::{Deserialize, Serialize};

/// Retry/backoff tunables for [`crate::rpc::http_client::HttpServerClient`],
/// broken out so tests can shrink the delays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            base_delay_ms: 500,
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

/// Engine configuration, loaded with layered TOML + environment providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_endpoint: String,
    pub data_dir: PathBuf,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Per-HTTP-request timeout, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Total wall-clock budget for one sync run, in seconds.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_run_timeout_secs() -> u64 {
    60
}

impl Config {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("dnote.db")
    }

    /// Builds a `Config` from an optional TOML file path, layered under
    /// environment variables prefixed `NOTED_` (e.g. `NOTED_API_ENDPOINT`).
    pub fn load(config_path: Option<&std::path::Path>) -> Result<Self, FigmentError> {
        let mut figment = Figment::from(Self::default());
        if let Some(path) = config_path {
            figment = figment.merge(figment::providers::Toml::file(path));
        }
        figment = figment.merge(figment::providers::Env::prefixed("NOTED_"));
        figment.extract()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_endpoint: "https://api.getdnote.com".into(),
            data_dir: default_data_dir(),
            retry: RetryConfig::default(),
            request_timeout_secs: default_request_timeout_secs(),
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Provider for Config {
    fn metadata(&self) -> Metadata {
        Metadata::named("noted-sync config")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, FigmentError> {
        figment::providers::Serialized::defaults(self).data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_retry_tunables() {
        let config = Config::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 500);
    }

    #[test]
    fn db_path_joins_data_dir() {
        let mut config = Config::default();
        config.data_dir = PathBuf::from("/tmp/noted");
        assert_eq!(config.db_path(), PathBuf::from("/tmp/noted/dnote.db"));
    }
}
