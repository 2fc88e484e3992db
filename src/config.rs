//! Application configuration.
//!
//! Every tunable constant in the pipeline lives here: deadzone, poll
//! cadence, retry bounds, bus backlog, counter bucket length and the
//! macro library location. The file is TOML under the platform config
//! directory; a default is written on first run so there is always
//! something to edit. Loading never aborts startup - a broken file
//! logs a warning and falls back to defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::capture::CaptureSettings;
use crate::counter::CounterSettings;
use crate::event::DEFAULT_DEADZONE;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not resolve a platform config directory")]
    NoConfigDir,

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub deadzone: f32,
    pub poll_interval_us: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        let defaults = CaptureSettings::default();
        Self {
            deadzone: defaults.deadzone,
            poll_interval_us: defaults.poll_interval_us,
            max_retries: defaults.max_retries,
            retry_base_delay_ms: defaults.retry_base_delay_ms,
            retry_max_delay_ms: defaults.retry_max_delay_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Queue depth per subscriber before overflow drops kick in.
    pub backlog: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { backlog: 256 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    pub bucket_ms: u64,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            bucket_ms: CounterSettings::default().bucket_ms,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroConfig {
    /// Macro library directory. Empty means the platform data dir.
    pub dir: PathBuf,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PadloopConfig {
    pub capture: CaptureConfig,
    pub bus: BusConfig,
    pub counter: CounterConfig,
    pub macros: MacroConfig,
}

impl PadloopConfig {
    /// Clamp nonsense values back to defaults, with a warning each.
    pub fn validated(mut self) -> Self {
        if !(0.0..1.0).contains(&self.capture.deadzone) {
            warn!(
                "Configured deadzone {} is out of [0, 1), using {}",
                self.capture.deadzone, DEFAULT_DEADZONE
            );
            self.capture.deadzone = DEFAULT_DEADZONE;
        }
        if self.counter.bucket_ms == 0 {
            let fallback = CounterConfig::default().bucket_ms;
            warn!("Counter bucket of 0ms is invalid, using {}ms", fallback);
            self.counter.bucket_ms = fallback;
        }
        if self.bus.backlog == 0 {
            let fallback = BusConfig::default().backlog;
            warn!("Bus backlog of 0 is invalid, using {}", fallback);
            self.bus.backlog = fallback;
        }
        self
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            deadzone: self.capture.deadzone,
            poll_interval_us: self.capture.poll_interval_us,
            max_retries: self.capture.max_retries,
            retry_base_delay_ms: self.capture.retry_base_delay_ms,
            retry_max_delay_ms: self.capture.retry_max_delay_ms,
        }
    }

    pub fn counter_settings(&self) -> CounterSettings {
        CounterSettings {
            bucket_ms: self.counter.bucket_ms,
        }
    }

    /// Macro library directory, resolving the platform default.
    pub fn macro_dir(&self) -> PathBuf {
        if self.macros.dir.as_os_str().is_empty() {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("padloop")
                .join("macros")
        } else {
            self.macros.dir.clone()
        }
    }
}

/// Path of the config file under the platform config directory.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    Ok(dir.join("padloop").join("config.toml"))
}

/// Write a default config file if none exists yet.
pub fn ensure_default_config() -> Result<PathBuf, ConfigError> {
    let path = config_path()?;
    if !path.exists() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(&PadloopConfig::default())?;
        fs::write(&path, rendered)?;
        info!("Wrote default config to {}", path.display());
    }
    Ok(path)
}

/// Parse a config file from an explicit path.
pub fn load_from(path: &Path) -> Result<PadloopConfig, ConfigError> {
    let raw = fs::read_to_string(path)?;
    Ok(toml::from_str(&raw)?)
}

/// Load the platform config, falling back to defaults on any failure.
pub fn load_or_default() -> PadloopConfig {
    match config_path().and_then(|path| load_from(&path)) {
        Ok(config) => config,
        Err(err) => {
            warn!("Could not load config ({}), using defaults", err);
            PadloopConfig::default()
        }
    }
}
