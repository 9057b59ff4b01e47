//! Configuration management for the step recorder.
//!
//! Loads configuration from TOML files and provides runtime defaults.
//! All duplicate windows, throttle intervals and the similarity threshold
//! are tunable here.

use crate::types::{ActionKind, ThrottleClass};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub aggregator: AggregatorConfig,

    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    #[serde(default)]
    pub privacy: PrivacyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Whether the recorder is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: default_log_level(),
        }
    }
}

/// Duplicate-suppression and merge windows, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Debounce delay before pending records are merged and committed
    #[serde(default = "default_merge_window")]
    pub merge_window_ms: u64,

    #[serde(default = "default_discrete_window")]
    pub click_window_ms: u64,

    #[serde(default = "default_discrete_window")]
    pub keyboard_window_ms: u64,

    #[serde(default = "default_navigation_window")]
    pub navigate_window_ms: u64,

    #[serde(default = "default_navigation_window")]
    pub form_submit_window_ms: u64,

    #[serde(default = "default_continuous_window")]
    pub input_window_ms: u64,

    #[serde(default = "default_continuous_window")]
    pub ui_change_window_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            merge_window_ms: default_merge_window(),
            click_window_ms: default_discrete_window(),
            keyboard_window_ms: default_discrete_window(),
            navigate_window_ms: default_navigation_window(),
            form_submit_window_ms: default_navigation_window(),
            input_window_ms: default_continuous_window(),
            ui_change_window_ms: default_continuous_window(),
        }
    }
}

impl AggregatorConfig {
    pub fn merge_window(&self) -> Duration {
        Duration::from_millis(self.merge_window_ms)
    }

    /// Duplicate window for a kind; `None` means records of that kind are never rejected
    pub fn duplicate_window_ms(&self, kind: ActionKind) -> Option<u64> {
        match kind {
            ActionKind::Click => Some(self.click_window_ms),
            ActionKind::Keyboard => Some(self.keyboard_window_ms),
            ActionKind::Navigate => Some(self.navigate_window_ms),
            ActionKind::FormSubmit => Some(self.form_submit_window_ms),
            ActionKind::Input => Some(self.input_window_ms),
            ActionKind::UiChange => Some(self.ui_change_window_ms),
            ActionKind::ScreenState | ActionKind::Other => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Captures at or above this similarity (percent) reuse the last kept frame
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Minimum time between captures for ordinary pages
    #[serde(default = "default_standard_interval")]
    pub standard_interval_ms: u64,

    /// Minimum time between captures for progressively rendering pages
    #[serde(default = "default_progressive_interval")]
    pub progressive_interval_ms: u64,

    /// Capture attempts per request
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between failed attempts
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Upper bound on the total wait of one request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Screenshot command (argv); must write an encoded image to stdout
    #[serde(default)]
    pub capture_command: Option<Vec<String>>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            standard_interval_ms: default_standard_interval(),
            progressive_interval_ms: default_progressive_interval(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff(),
            request_timeout_ms: default_request_timeout(),
            capture_command: None,
        }
    }
}

impl AcquisitionConfig {
    pub fn interval(&self, class: ThrottleClass) -> Duration {
        match class {
            ThrottleClass::Standard => Duration::from_millis(self.standard_interval_ms),
            ThrottleClass::Progressive => Duration::from_millis(self.progressive_interval_ms),
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyConfig {
    /// Glob patterns matched (case-insensitively) against the subject path
    #[serde(default = "default_sensitive_patterns")]
    pub sensitive_patterns: Vec<String>,

    /// Replace the recorded value of sensitive fields with a mask
    #[serde(default = "default_true")]
    pub mask_sensitive_values: bool,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            sensitive_patterns: default_sensitive_patterns(),
            mask_sensitive_values: true,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_merge_window() -> u64 {
    500
}

fn default_discrete_window() -> u64 {
    800
}

fn default_navigation_window() -> u64 {
    1000
}

fn default_continuous_window() -> u64 {
    2000
}

fn default_similarity_threshold() -> f64 {
    90.0
}

fn default_standard_interval() -> u64 {
    500
}

fn default_progressive_interval() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    200
}

fn default_request_timeout() -> u64 {
    5000
}

fn default_sensitive_patterns() -> Vec<String> {
    // Short tokens must follow a separator so they don't match inside words
    [
        "*password*",
        "*passwd*",
        "*passcode*",
        "*card[-_]num*",
        "*cardnum*",
        "*credit[-_]card*",
        "*creditcard*",
        "*cvv*",
        "*cvc*",
        "*[-_#=]ssn*",
        "*secret*",
        "*token*",
        "*[-_#=]otp*",
        "*one-time*",
        "*onetime*",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        Self::load_from_path(Self::default_config_path())
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: PathBuf) -> Self {
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("No config file found at {:?}, using defaults", path);
                Self::default()
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("step-recorder")
            .join("config.toml")
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: PathBuf) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?;

        std::fs::write(&path, contents)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.general.enabled);
        assert_eq!(config.aggregator.merge_window_ms, 500);
        assert_eq!(config.aggregator.duplicate_window_ms(ActionKind::Click), Some(800));
        assert_eq!(config.aggregator.duplicate_window_ms(ActionKind::Navigate), Some(1000));
        assert_eq!(config.aggregator.duplicate_window_ms(ActionKind::Input), Some(2000));
        assert_eq!(config.aggregator.duplicate_window_ms(ActionKind::ScreenState), None);
        assert_eq!(config.acquisition.similarity_threshold, 90.0);
        assert_eq!(config.acquisition.max_attempts, 3);
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[general]
log_level = "debug"

[aggregator]
merge_window_ms = 250
click_window_ms = 400

[acquisition]
similarity_threshold = 95.5
capture_command = ["grim", "-"]
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert!(config.general.enabled);
        assert_eq!(config.aggregator.merge_window(), Duration::from_millis(250));
        assert_eq!(config.aggregator.click_window_ms, 400);
        // Unset fields keep their defaults
        assert_eq!(config.aggregator.input_window_ms, 2000);
        assert_eq!(config.acquisition.similarity_threshold, 95.5);
        assert_eq!(
            config.acquisition.capture_command,
            Some(vec!["grim".to_string(), "-".to_string()])
        );
    }

    #[test]
    fn test_throttle_intervals() {
        let config = AcquisitionConfig::default();
        assert!(config.interval(ThrottleClass::Progressive) > config.interval(ThrottleClass::Standard));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.aggregator.merge_window_ms = 750;
        config.save_to_path(path.clone()).unwrap();

        let loaded = Config::load_from_path(path);
        assert_eq!(loaded.aggregator.merge_window_ms, 750);
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is [not toml").unwrap();

        let config = Config::load_from_path(path);
        assert_eq!(config.aggregator.merge_window_ms, 500);
    }

    #[test]
    fn test_sensitive_patterns_default() {
        let config = Config::default();
        assert!(config.privacy.sensitive_patterns.iter().any(|p| p.contains("password")));
        assert!(config.privacy.mask_sensitive_values);
    }
}
