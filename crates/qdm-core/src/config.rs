use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Intra-fetch retry parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per part fetch (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 0.25,
            max_delay_secs: 5,
        }
    }
}

impl RetryConfig {
    /// A `base_delay_secs` that is not a finite duration (inf, NaN or too large)
    /// falls back to the built-in default; negative values mean no delay.
    pub fn to_policy(&self) -> RetryPolicy {
        let base_delay = Duration::try_from_secs_f64(self.base_delay_secs.max(0.0))
            .unwrap_or_else(|_| {
                tracing::warn!(
                    base_delay_secs = self.base_delay_secs,
                    "retry base delay out of range; using default"
                );
                RetryPolicy::default().base_delay
            });
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

/// Engine configuration loaded from `~/.config/qdm/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Size of each part in bytes; the last part holds the remainder.
    pub chunk_size: u64,
    /// Worker threads per download. Derived from CPU parallelism and part count when unset.
    #[serde(default)]
    pub workers: Option<usize>,
    /// Window used for the instantaneous speed sample, in milliseconds.
    #[serde(default = "default_progress_window_ms")]
    pub progress_window_ms: u64,
    /// Number of speed samples in the moving average.
    #[serde(default = "default_speed_samples")]
    pub speed_samples: usize,
    /// How often the manager re-evaluates queue time windows, in seconds.
    #[serde(default = "default_schedule_tick_secs")]
    pub schedule_tick_secs: u64,
    /// Fixed timeout for the capability probe.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Connect timeout for part and whole-file fetches.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Max retries given to queues created without an explicit value.
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// Optional fetch-level retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

fn default_progress_window_ms() -> u64 {
    1000
}

fn default_speed_samples() -> usize {
    5
}

fn default_schedule_tick_secs() -> u64 {
    60
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    1
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            workers: None,
            progress_window_ms: default_progress_window_ms(),
            speed_samples: default_speed_samples(),
            schedule_tick_secs: default_schedule_tick_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            default_max_retries: default_max_retries(),
            retry: None,
        }
    }
}

impl EngineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.clone().unwrap_or_default().to_policy()
    }

    pub fn progress_window(&self) -> Duration {
        Duration::from_millis(self.progress_window_ms.max(1))
    }

    pub fn schedule_tick(&self) -> Duration {
        Duration::from_secs(self.schedule_tick_secs.max(1))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("qdm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<EngineConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = EngineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: EngineConfig = toml::from_str(&data)?;
    Ok(cfg)
}
