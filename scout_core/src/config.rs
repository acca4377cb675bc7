//! Configuration file support for Scout.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/scout/config.toml`.

use crate::merge::DEFAULT_MAX_AGE_MS;
use crate::units::{GlucoseUnits, RoundingStyle};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub merge: MergeConfig,

    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub thresholds: ThresholdsConfig,

    #[serde(default)]
    pub alarms: AlarmsConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Snapshot reconciliation and partitioning windows
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Cached timestamp-keyed records older than this are pruned on delta updates
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: i64,

    /// Records newer than `now - recent_cutoff_ms` go to the recent partition
    #[serde(default = "default_recent_cutoff_ms")]
    pub recent_cutoff_ms: i64,

    /// Records older than `now - recent_max_ms` are left out of partitions
    #[serde(default = "default_recent_max_ms")]
    pub recent_max_ms: i64,

    #[serde(default = "default_true")]
    pub split_treatments: bool,

    /// Merge device status deltas instead of replacing the cached set
    #[serde(default)]
    pub advanced_devicestatus: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_age_ms: default_max_age_ms(),
            recent_cutoff_ms: default_recent_cutoff_ms(),
            recent_max_ms: default_recent_max_ms(),
            split_treatments: true,
            advanced_devicestatus: false,
        }
    }
}

/// Display preferences
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default)]
    pub units: GlucoseUnits,

    /// `default` renders every point grey; `colors` adds an in-range colour
    #[serde(default = "default_theme")]
    pub theme: String,

    #[serde(default)]
    pub rounding_style: RoundingStyle,

    #[serde(default = "default_history_hours")]
    pub history_hours: i64,

    /// IANA zone used for profiles that declare none; host local time if unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            units: GlucoseUnits::default(),
            theme: default_theme(),
            rounding_style: RoundingStyle::default(),
            history_hours: default_history_hours(),
            timezone: None,
        }
    }
}

/// Glucose thresholds in mg/dL
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ThresholdsConfig {
    #[serde(default = "default_bg_high")]
    pub bg_high: f64,

    #[serde(default = "default_bg_target_top")]
    pub bg_target_top: f64,

    #[serde(default = "default_bg_target_bottom")]
    pub bg_target_bottom: f64,

    #[serde(default = "default_bg_low")]
    pub bg_low: f64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            bg_high: default_bg_high(),
            bg_target_top: default_bg_target_top(),
            bg_target_bottom: default_bg_target_bottom(),
            bg_low: default_bg_low(),
        }
    }
}

/// Stale-data alarm configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlarmsConfig {
    #[serde(default = "default_true")]
    pub timeago_warn: bool,

    #[serde(default = "default_timeago_warn_mins")]
    pub timeago_warn_mins: i64,

    #[serde(default = "default_true")]
    pub timeago_urgent: bool,

    #[serde(default = "default_timeago_urgent_mins")]
    pub timeago_urgent_mins: i64,
}

impl Default for AlarmsConfig {
    fn default() -> Self {
        Self {
            timeago_warn: true,
            timeago_warn_mins: default_timeago_warn_mins(),
            timeago_urgent: true,
            timeago_urgent_mins: default_timeago_urgent_mins(),
        }
    }
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("scout")
}

fn default_max_age_ms() -> i64 {
    DEFAULT_MAX_AGE_MS
}

fn default_recent_cutoff_ms() -> i64 {
    3 * 60 * 60 * 1000
}

fn default_recent_max_ms() -> i64 {
    DEFAULT_MAX_AGE_MS
}

fn default_true() -> bool {
    true
}

fn default_theme() -> String {
    "default".into()
}

fn default_history_hours() -> i64 {
    48
}

fn default_bg_high() -> f64 {
    260.0
}

fn default_bg_target_top() -> f64 {
    180.0
}

fn default_bg_target_bottom() -> f64 {
    80.0
}

fn default_bg_low() -> f64 {
    55.0
}

fn default_timeago_warn_mins() -> i64 {
    15
}

fn default_timeago_urgent_mins() -> i64 {
    30
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Reject windows and thresholds that cannot work together
    pub fn validate(&self) -> Result<()> {
        if self.merge.max_age_ms <= 0 {
            return Err(Error::Config("merge.max_age_ms must be positive".into()));
        }
        if self.merge.recent_cutoff_ms < 0 || self.merge.recent_max_ms < 0 {
            return Err(Error::Config("merge windows must not be negative".into()));
        }
        if self.display.history_hours <= 0 {
            return Err(Error::Config("display.history_hours must be positive".into()));
        }
        let t = &self.thresholds;
        if !(t.bg_low <= t.bg_target_bottom
            && t.bg_target_bottom <= t.bg_target_top
            && t.bg_target_top <= t.bg_high)
        {
            return Err(Error::Config(format!(
                "thresholds must be ordered low <= target_bottom <= target_top <= high, \
                 got {} / {} / {} / {}",
                t.bg_low, t.bg_target_bottom, t.bg_target_top, t.bg_high
            )));
        }
        Ok(())
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("scout").join("config.toml")
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}
