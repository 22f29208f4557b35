//! Environment and version metadata for `fuzzstate env` / `fuzzstate version`.

use serde::{Deserialize, Serialize};

use crate::Config;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvInfo {
    pub os: String,
    pub arch: String,
    pub fuzzstate: VersionInfo,
    pub config: Config,
    pub name_source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_date: Option<String>,
}

pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: option_env!("FUZZSTATE_COMMIT").map(|s| s.to_string()),
        build_date: option_env!("FUZZSTATE_BUILD_DATE").map(|s| s.to_string()),
    }
}

pub fn env_info(config: &Config) -> EnvInfo {
    let name_source = match config.seed {
        Some(seed) => format!("chacha20(seed={seed})"),
        None => "uuid_v4".to_string(),
    };
    EnvInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        fuzzstate: version_info(),
        config: config.clone(),
        name_source,
    }
}
