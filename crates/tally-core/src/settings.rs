use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{load_config, Config};
use crate::util::env_string;

pub const DEFAULT_TTL_SECS: u64 = 3600;
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_TRIALS: usize = 10_000;
pub const DEFAULT_SPRINT_LENGTH_DAYS: u32 = 14;
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 85.0;

/// Fully resolved settings handed to the store and metrics constructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<PathBuf>,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
    /// 0 means writes without an explicit TTL never expire.
    pub default_ttl_secs: u64,
    pub chunk_size: usize,
    pub trials: usize,
    pub sprint_length_days: u32,
    pub confidence_level: f64,
}

impl Settings {
    pub fn default_ttl(&self) -> Option<std::time::Duration> {
        (self.default_ttl_secs > 0).then(|| std::time::Duration::from_secs(self.default_ttl_secs))
    }

    /// Layers: built-in defaults, then `cfg`, then values from `env`.
    /// Unparseable env values are logged and ignored.
    pub fn resolve<F>(cfg: Option<&Config>, config_path: Option<PathBuf>, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let (default_state, default_logs) = default_dirs();
        let storage = cfg.map(|c| c.storage.clone()).unwrap_or_default();
        let forecast = cfg.map(|c| c.forecast.clone()).unwrap_or_default();

        let state_dir = env("TALLY_STATE_DIR")
            .or(storage.root)
            .map(PathBuf::from)
            .unwrap_or(default_state);
        let logs_dir = env("TALLY_LOGS_DIR")
            .map(PathBuf::from)
            .unwrap_or(default_logs);

        Self {
            config_path,
            state_dir,
            logs_dir,
            default_ttl_secs: parsed(&env, "TALLY_CACHE_TTL_SECS")
                .or(storage.default_ttl_secs)
                .unwrap_or(DEFAULT_TTL_SECS),
            chunk_size: parsed(&env, "TALLY_CHUNK_SIZE")
                .filter(|n: &usize| *n > 0)
                .or(storage.chunk_size)
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            trials: parsed(&env, "TALLY_MC_TRIALS")
                .filter(|n: &usize| *n > 0)
                .or(forecast.trials)
                .unwrap_or(DEFAULT_TRIALS),
            sprint_length_days: parsed(&env, "TALLY_SPRINT_DAYS")
                .filter(|n: &u32| *n > 0)
                .or(forecast.sprint_length_days)
                .unwrap_or(DEFAULT_SPRINT_LENGTH_DAYS),
            confidence_level: forecast
                .confidence_level
                .unwrap_or(DEFAULT_CONFIDENCE_LEVEL),
        }
    }
}

fn parsed<T: std::str::FromStr, F: Fn(&str) -> Option<String>>(env: &F, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}

fn default_dirs() -> (PathBuf, PathBuf) {
    // ProjectDirs anchors per-user paths (XDG, Known Folders); fall back to HOME.
    match directories::ProjectDirs::from("dev", "tally", "tally") {
        Some(dirs) => (
            dirs.data_local_dir().to_path_buf(),
            dirs.data_local_dir().join("logs"),
        ),
        None => {
            let base = std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(".tally");
            (base.clone(), base.join("logs"))
        }
    }
}

/// Reads `TALLY_CONFIG` (if set) and overlays the process environment.
/// An invalid config file is logged and skipped.
pub fn effective_settings() -> Settings {
    let config_path = env_string("TALLY_CONFIG").map(PathBuf::from);
    let cfg = config_path.as_ref().and_then(|p| match load_config(p) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::error!("invalid config {}: {:#}", p.display(), e);
            None
        }
    });
    Settings::resolve(cfg.as_ref(), config_path, env_string)
}
