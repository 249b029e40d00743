//! Configuration management for spotpressd
//!
//! Handles loading, validation, and reload of JSON configuration files.
//! Configuration is stored at `~/.config/spotpress/config.json`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::device_class::DeviceKind;
use crate::gesture::GestureConfig;
use crate::output::DEFAULT_DEVICE_NAME;

// ============================================================================
// Constants
// ============================================================================

/// Default config directory name
const CONFIG_DIR: &str = "spotpress";

/// Default config file name
const CONFIG_FILE: &str = "config.json";

/// Bounds for any gesture interval, in milliseconds
const GESTURE_MS_MIN: u64 = 10;
const GESTURE_MS_MAX: u64 = 5000;

/// KEY_LEFTSHIFT, KEY_F5
const DEFAULT_PRESENTATION_CHORD: [u16; 2] = [42, 63];

// ============================================================================
// Gesture timing overrides
// ============================================================================

/// Per-device timing override. Unset fields keep the device default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GestureOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub double_click_ms: Option<u64>,

    /// Ignored for devices that resolve clicks on release
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_press_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_ms: Option<u64>,
}

impl GestureOverride {
    /// Clamp every set interval into a sane range
    pub fn validate(&mut self) {
        for value in [&mut self.double_click_ms, &mut self.long_press_ms, &mut self.repeat_ms]
            .into_iter()
            .flatten()
        {
            *value = (*value).clamp(GESTURE_MS_MIN, GESTURE_MS_MAX);
        }
    }

    /// Apply this override on top of a device's defaults
    pub fn apply(&self, base: GestureConfig) -> GestureConfig {
        let mut config = base;
        if let Some(ms) = self.double_click_ms {
            config.double_click = Duration::from_millis(ms);
        }
        if let (Some(ms), Some(_)) = (self.long_press_ms, config.long_press) {
            config.long_press = Some(Duration::from_millis(ms));
        }
        if let Some(ms) = self.repeat_ms {
            config.repeat = Duration::from_millis(ms);
        }
        config
    }
}

// ============================================================================
// Hotplug
// ============================================================================

/// How long a freshly created node may take to become readable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotplugConfig {
    #[serde(default = "default_settle_retries")]
    pub settle_retries: u32,

    #[serde(default = "default_settle_interval")]
    pub settle_interval_ms: u64,
}

fn default_settle_retries() -> u32 { 10 }
fn default_settle_interval() -> u64 { 100 }

impl Default for HotplugConfig {
    fn default() -> Self {
        Self {
            settle_retries: default_settle_retries(),
            settle_interval_ms: default_settle_interval(),
        }
    }
}

impl HotplugConfig {
    pub fn validate(&mut self) {
        self.settle_retries = self.settle_retries.clamp(1, 100);
        self.settle_interval_ms = self.settle_interval_ms.clamp(10, 2000);
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }
}

// ============================================================================
// Overlay defaults
// ============================================================================

/// Initial overlay sizes and palette indices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayDefaults {
    #[serde(default = "default_spotlight_size")]
    pub spotlight_size: i32,

    #[serde(default = "default_magnify_size")]
    pub magnify_size: i32,

    #[serde(default = "default_magnify_zoom")]
    pub magnify_zoom: i32,

    #[serde(default = "default_laser_size")]
    pub laser_size: i32,

    #[serde(default = "default_line_width")]
    pub line_width: i32,

    #[serde(default)]
    pub laser_color: i32,

    #[serde(default)]
    pub pen_color: i32,

    #[serde(default)]
    pub shade_color: i32,
}

fn default_spotlight_size() -> i32 { 20 }
fn default_magnify_size() -> i32 { 25 }
fn default_magnify_zoom() -> i32 { 2 }
fn default_laser_size() -> i32 { 10 }
fn default_line_width() -> i32 { 5 }

impl Default for OverlayDefaults {
    fn default() -> Self {
        Self {
            spotlight_size: default_spotlight_size(),
            magnify_size: default_magnify_size(),
            magnify_zoom: default_magnify_zoom(),
            laser_size: default_laser_size(),
            line_width: default_line_width(),
            laser_color: 0,
            pen_color: 0,
            shade_color: 0,
        }
    }
}

// ============================================================================
// Main Configuration
// ============================================================================

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Timing overrides keyed by device id (e.g. `"baseus-orange-dot-ai"`)
    #[serde(default)]
    pub gestures: BTreeMap<String, GestureOverride>,

    #[serde(default)]
    pub hotplug: HotplugConfig,

    #[serde(default)]
    pub overlay: OverlayDefaults,

    /// Make a newly connected remote active when only the virtual pointer is
    #[serde(default = "default_true")]
    pub auto_activate: bool,

    /// Key codes sent to start a presentation
    #[serde(default = "default_presentation_chord")]
    pub presentation_chord: Vec<u16>,

    /// Name of the uinput device
    #[serde(default = "default_virtual_device_name")]
    pub virtual_device_name: String,

    /// Configuration file path (not serialized)
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

fn default_true() -> bool { true }

fn default_presentation_chord() -> Vec<u16> {
    DEFAULT_PRESENTATION_CHORD.to_vec()
}

fn default_virtual_device_name() -> String {
    DEFAULT_DEVICE_NAME.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gestures: BTreeMap::new(),
            hotplug: HotplugConfig::default(),
            overlay: OverlayDefaults::default(),
            auto_activate: true,
            presentation_chord: default_presentation_chord(),
            virtual_device_name: default_virtual_device_name(),
            config_path: None,
        }
    }
}

impl Config {
    /// Get the default config directory path
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(CONFIG_DIR))
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|p| p.join(CONFIG_FILE))
    }

    /// Load configuration from the default location
    ///
    /// Returns default config if file doesn't exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_config_path() {
            Some(path) => Self::load(&path),
            None => {
                tracing::warn!("Could not determine config directory, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from file path
    ///
    /// Returns default config if file doesn't exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            let mut config = Self::default();
            config.config_path = Some(path.to_path_buf());
            return Ok(config);
        }

        let contents = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        let mut config: Config =
            serde_json::from_str(&contents).map_err(ConfigError::ParseError)?;

        config.validate()?;
        config.config_path = Some(path.to_path_buf());

        tracing::info!(
            path = %path.display(),
            overrides = config.gestures.len(),
            auto_activate = config.auto_activate,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Clamp values and reject what cannot be clamped
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        for (id, gesture) in self.gestures.iter_mut() {
            if id.parse::<DeviceKind>().is_err() {
                tracing::warn!(device = %id, "Gesture override for unknown device ignored");
            }
            gesture.validate();
        }
        self.hotplug.validate();

        if self.presentation_chord.is_empty() {
            return Err(ConfigError::ValidationError(
                "presentation_chord must name at least one key".to_string(),
            ));
        }
        if self.virtual_device_name.trim().is_empty() {
            self.virtual_device_name = default_virtual_device_name();
        }
        Ok(())
    }

    /// Gesture timings for `kind`, with any override applied
    pub fn gesture_config(&self, kind: DeviceKind) -> GestureConfig {
        let base = kind.class().gestures;
        match self.gestures.get(kind.id()) {
            Some(over) => over.apply(base),
            None => base,
        }
    }
}

// ============================================================================
// Shared Config (for reload)
// ============================================================================

use std::sync::{Arc, RwLock};

/// Thread-safe shared configuration for reload support
pub type SharedConfig = Arc<RwLock<Config>>;

/// Create a new shared config with defaults
pub fn new_shared_config() -> SharedConfig {
    Arc::new(RwLock::new(Config::default()))
}

/// Create a shared config from `path`, or the default location
pub fn load_shared_config(path: Option<&Path>) -> Result<SharedConfig, ConfigError> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    Ok(Arc::new(RwLock::new(config)))
}

/// Re-read the file behind `shared` and swap it in
pub fn reload_shared_config(shared: &SharedConfig) -> Result<(), ConfigError> {
    let path = shared
        .read()
        .map_err(|_| ConfigError::ValidationError("config lock poisoned".to_string()))?
        .config_path
        .clone();

    let fresh = match path {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    let mut guard = shared
        .write()
        .map_err(|_| ConfigError::ValidationError("config lock poisoned".to_string()))?;
    *guard = fresh;
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration error type
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading/writing file
    IoError(std::io::Error),
    /// JSON parsing error
    ParseError(serde_json::Error),
    /// Validation error
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "I/O error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
            ConfigError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::IoError(e) => Some(e),
            ConfigError::ParseError(e) => Some(e),
            ConfigError::ValidationError(_) => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.auto_activate);
        assert_eq!(config.presentation_chord, vec![42, 63]);
        assert_eq!(config.virtual_device_name, "Virtual Spotlight Mouse");
        assert_eq!(config.hotplug.settle_retries, 10);
        assert_eq!(config.hotplug.settle_interval_ms, 100);
    }

    #[test]
    fn test_config_json_minimal() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.gestures.is_empty());
        assert_eq!(config.overlay, OverlayDefaults::default());
    }

    #[test]
    fn test_gesture_override_applies() {
        let json = r#"{
            "gestures": {
                "baseus-orange-dot-ai": { "double_click_ms": 300, "long_press_ms": 800 }
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let gestures = config.gesture_config(DeviceKind::BaseusOrangeDotAi);
        assert_eq!(gestures.double_click, Duration::from_millis(300));
        assert_eq!(gestures.long_press, Some(Duration::from_millis(800)));
        assert_eq!(gestures.repeat, Duration::from_millis(50));

        // Untouched device keeps its defaults
        assert_eq!(
            config.gesture_config(DeviceKind::GenericVrBox),
            DeviceKind::GenericVrBox.class().gestures
        );
    }

    #[test]
    fn test_long_press_override_ignored_when_release_resolved() {
        let over = GestureOverride {
            long_press_ms: Some(700),
            ..Default::default()
        };
        let applied = over.apply(GestureConfig::release_resolved(300));
        assert_eq!(applied.long_press, None);
    }

    #[test]
    fn test_validation_clamps() {
        let json = r#"{
            "gestures": { "asa-smart-control": { "double_click_ms": 1, "repeat_ms": 999999 } },
            "hotplug": { "settle_retries": 0, "settle_interval_ms": 1 },
            "virtual_device_name": "  "
        }"#;
        let mut config: Config = serde_json::from_str(json).unwrap();
        config.validate().unwrap();

        let over = &config.gestures["asa-smart-control"];
        assert_eq!(over.double_click_ms, Some(GESTURE_MS_MIN));
        assert_eq!(over.repeat_ms, Some(GESTURE_MS_MAX));
        assert_eq!(config.hotplug.settle_retries, 1);
        assert_eq!(config.hotplug.settle_interval_ms, 10);
        assert_eq!(config.virtual_device_name, DEFAULT_DEVICE_NAME);
    }

    #[test]
    fn test_empty_chord_rejected() {
        let mut config: Config = serde_json::from_str(r#"{"presentation_chord": []}"#).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.config_path.as_deref(), Some(path.as_path()));
        assert!(config.auto_activate);
    }

    #[test]
    fn test_reload_shared_picks_up_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let shared = load_shared_config(Some(path.as_path())).unwrap();
        assert!(shared.read().unwrap().auto_activate);

        fs::write(&path, r#"{ "auto_activate": false }"#).unwrap();
        reload_shared_config(&shared).unwrap();
        assert!(!shared.read().unwrap().auto_activate);
    }

    #[test]
    fn test_parse_error_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::ParseError(_))));
    }
}
