use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Built-in default for the upper delay bound, in seconds.
pub const DEFAULT_MAX_DELAY: f64 = 30.0;
/// Built-in default for the lower delay bound, in seconds.
pub const DEFAULT_MIN_DELAY: f64 = 0.0;

/// Backoff bounds as supplied by a caller (the `backoff` key on a request)
/// or by the `[backoff]` section of `config.toml`. All fields are optional;
/// unset fields fall back to the installed defaults.
///
/// There is deliberately no retry-count field here: the count is owned by
/// the engine and carried across attempts, so a caller-supplied `backoff`
/// key can never reset it mid-flight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Maximum number of retries; 0 means unlimited.
    pub max_retries: Option<u32>,
    /// Upper bound on a single backoff delay, in seconds.
    pub max_delay: Option<f64>,
    /// Lower bound on a single backoff delay, in seconds. Callers must keep
    /// `min_delay <= max_delay`.
    pub min_delay: Option<f64>,
}

/// Global configuration loaded from `~/.config/ebm/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EbmConfig {
    /// Default backoff bounds applied when a request carries no `backoff`
    /// key (or carries a partial one).
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Scope prefix for the instrumentation span around the backoff wait,
    /// used when the request itself names none.
    #[serde(default)]
    pub scope_prefix: Option<String>,
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("ebm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<EbmConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = EbmConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    load_from(&path)
}

/// Load configuration from an explicit path.
pub fn load_from(path: &Path) -> Result<EbmConfig> {
    let data = fs::read_to_string(path)?;
    let cfg: EbmConfig = toml::from_str(&data)?;
    Ok(cfg)
}
