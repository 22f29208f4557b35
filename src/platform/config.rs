//! `fuzzstate.toml` config loading.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{FuzzStateError, FuzzStateResult, HumanDuration};

pub const BASE_URL_ENV: &str = "FUZZSTATE_BASE_URL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceBackend {
    /// Talk to the live service over HTTP.
    Host,
    /// In-memory double implementing the same REST contract.
    Scripted,
}

impl clap::ValueEnum for ServiceBackend {
    fn value_variants<'a>() -> &'a [Self] {
        &[Self::Host, Self::Scripted]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            Self::Host => clap::builder::PossibleValue::new("host"),
            Self::Scripted => clap::builder::PossibleValue::new("scripted"),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Base URL of the service under test.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for internal calls (mirror warm-up, disposable entity creation).
    #[serde(default = "default_request_timeout")]
    pub request_timeout: HumanDuration,

    /// Page size used when warming the entity mirror.
    #[serde(default = "default_warm_page_limit")]
    pub warm_page_limit: u32,

    /// Prefix for generated unique entity names.
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    #[serde(default = "default_backend")]
    pub backend: ServiceBackend,

    /// Write the case trace here when the session finishes. Unset = nothing persisted.
    #[serde(default)]
    pub trace_out: Option<PathBuf>,

    /// Delete entities created by the bridge itself when the session finishes.
    #[serde(default)]
    pub teardown_cleanup: bool,

    /// Seed for deterministic name suffixes. Unset = UUIDv4 suffixes.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_request_timeout() -> HumanDuration {
    HumanDuration(Duration::from_secs(5))
}

fn default_warm_page_limit() -> u32 {
    100
}

fn default_name_prefix() -> String {
    "fuzz-".to_string()
}

fn default_backend() -> ServiceBackend {
    ServiceBackend::Host
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
            warm_page_limit: default_warm_page_limit(),
            name_prefix: default_name_prefix(),
            backend: default_backend(),
            trace_out: None,
            teardown_cleanup: false,
            seed: None,
        }
    }
}

impl Config {
    /// Strict load: unreadable or unparsable files are errors.
    pub fn load(path: &Path) -> FuzzStateResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<Config>(&raw)
            .map_err(|err| FuzzStateError::Config(format!("failed to parse config {}: {err}", path.display())))
    }

    /// Missing files mean defaults; any other failure is logged and also falls back to defaults.
    pub fn load_optional(path: &Path) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(FuzzStateError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(FuzzStateError::Io(err)) => {
                tracing::warn!("failed to read config {}: {err}", path.display());
                Self::default()
            }
            Err(err) => {
                tracing::warn!("{err}");
                Self::default()
            }
        }
    }

    /// Applies `FUZZSTATE_BASE_URL` on top of file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(BASE_URL_ENV) {
            let url = url.trim();
            if !url.is_empty() {
                self.base_url = url.to_string();
            }
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        self.request_timeout.0
    }

    /// `base_url` without a trailing slash, ready for path concatenation.
    pub fn base_url_trimmed(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!("fuzzstate-missing-{}.toml", uuid::Uuid::new_v4()));
        let cfg = Config::load_optional(&path);
        assert_eq!(cfg.base_url, "http://localhost:8080");
        assert_eq!(cfg.timeout(), Duration::from_secs(5));
        assert_eq!(cfg.warm_page_limit, 100);
        assert_eq!(cfg.backend, ServiceBackend::Host);
        assert!(cfg.trace_out.is_none());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let path = std::env::temp_dir().join(format!("fuzzstate-cfg-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "base_url = \"http://127.0.0.1:9000/\"\nrequest_timeout = \"750ms\"\nbackend = \"scripted\"\nseed = 7\n",
        )
        .expect("write config");
        let cfg = Config::load_optional(&path);
        assert_eq!(cfg.base_url_trimmed(), "http://127.0.0.1:9000");
        assert_eq!(cfg.timeout(), Duration::from_millis(750));
        assert_eq!(cfg.backend, ServiceBackend::Scripted);
        assert_eq!(cfg.seed, Some(7));
        assert_eq!(cfg.name_prefix, "fuzz-");
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!("fuzzstate-bad-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "request_timeout = \"soon\"").expect("write config");
        let cfg = Config::load_optional(&path);
        assert_eq!(cfg.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn strict_load_reports_parse_and_read_failures() {
        let path = std::env::temp_dir().join(format!("fuzzstate-strict-{}.toml", uuid::Uuid::new_v4()));
        assert!(matches!(Config::load(&path), Err(FuzzStateError::Io(_))));

        std::fs::write(&path, "warm_page_limit = \"many\"").expect("write config");
        match Config::load(&path) {
            Err(FuzzStateError::Config(msg)) => assert!(msg.contains("failed to parse config")),
            other => panic!("expected config error, got {other:?}"),
        }
    }
}
