use crate::domain::models::UpdateRate;
use crate::domain::motion::TimestampClock;
use crate::infrastructure::bluetooth::protocol::LOCAL_NAME;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ble_motion_tracker".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Which radio stack drives the peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RadioBackend {
    /// Platform GATT server (Windows only)
    #[default]
    Native,
    /// In-memory radio with a simulated central
    Loopback,
}

/// Which sensor feeds the motion source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionBackend {
    /// Platform orientation sensor (Windows only)
    #[default]
    Native,
    /// Generated attitude, polled on a timer
    Synthetic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticMotionSettings {
    #[serde(default = "default_yaw_rate")]
    pub yaw_rate_deg_per_sec: f64,
    #[serde(default = "default_tilt_amplitude")]
    pub tilt_amplitude_deg: f64,
}

impl Default for SyntheticMotionSettings {
    fn default() -> Self {
        Self {
            yaw_rate_deg_per_sec: default_yaw_rate(),
            tilt_amplitude_deg: default_tilt_amplitude(),
        }
    }
}

fn default_yaw_rate() -> f64 {
    30.0
}
fn default_tilt_amplitude() -> f64 {
    15.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Peripheral
    #[serde(default = "default_local_name")]
    pub local_name: String,
    #[serde(default)]
    pub update_rate: UpdateRate,
    #[serde(default = "default_true")]
    pub enable_user_interface_service: bool,
    #[serde(default)]
    pub timestamp_clock: TimestampClock,

    // Backends
    #[serde(default)]
    pub radio_backend: RadioBackend,
    #[serde(default)]
    pub motion_backend: MotionBackend,
    #[serde(default)]
    pub synthetic: SyntheticMotionSettings,

    // Recording
    #[serde(default = "default_false")]
    pub record_samples: bool,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            local_name: default_local_name(),
            update_rate: UpdateRate::DEFAULT,
            enable_user_interface_service: true,
            timestamp_clock: TimestampClock::default(),
            radio_backend: RadioBackend::default(),
            motion_backend: MotionBackend::default(),
            synthetic: SyntheticMotionSettings::default(),
            record_samples: false,
            log_settings: LogSettings::default(),
        }
    }
}

fn default_local_name() -> String {
    LOCAL_NAME.to_string()
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load settings from `settings_path`, falling back to defaults
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BleMotionTracker");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }
}
