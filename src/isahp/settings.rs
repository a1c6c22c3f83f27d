//! Settings module for process-level configuration.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsahpSettings {
    /// Directory holding event-sequence datasets.
    /// If not set, callers supply paths explicitly.
    pub data_dir: Option<PathBuf>,
}

impl Default for IsahpSettings {
    fn default() -> Self {
        Self { data_dir: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestingSettings {
    /// Force consistency tests to run regardless of platform.
    pub force_consistency_tests: bool,

    /// Indicates if running in continuous integration environment.
    pub ci: bool,
}

impl Default for TestingSettings {
    fn default() -> Self {
        Self {
            force_consistency_tests: false,
            ci: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Model/data settings
    pub isahp: IsahpSettings,

    /// Testing/Development settings
    pub testing: TestingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            isahp: IsahpSettings::default(),
            testing: TestingSettings::default(),
        }
    }
}

impl Settings {
    /// Create a new Settings instance from environment variables and config
    /// files. Environment variables are prefixed with "ISAHP_".
    pub fn new() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("isahp.data_dir", None::<String>)?
            .set_default("testing.force_consistency_tests", false)?
            .set_default("testing.ci", false)?
            .add_source(File::with_name(".env").required(false))
            .add_source(Environment::with_prefix("ISAHP").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}

/// Global settings instance
static SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Get the global settings instance, initializing it if necessary.
pub fn settings() -> &'static Settings {
    SETTINGS.get_or_init(|| Settings::new().unwrap_or_else(|_| Settings::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.isahp.data_dir, None);
        assert!(!settings.testing.force_consistency_tests);
        assert!(!settings.testing.ci);
    }

    #[test]
    fn test_settings_serialization() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).expect("Should serialize to JSON");
        let deserialized: Settings =
            serde_json::from_str(&json).expect("Should deserialize from JSON");

        assert_eq!(deserialized.isahp.data_dir, settings.isahp.data_dir);
        assert_eq!(deserialized.testing.ci, settings.testing.ci);
    }

    #[test]
    fn test_settings_new_with_defaults() {
        let settings = Settings::new().unwrap_or_else(|_| Settings::default());
        assert!(settings.isahp.data_dir.is_none());
        assert!(!settings.testing.ci);
    }

    #[test]
    fn test_global_settings_singleton() {
        let settings1 = settings();
        let settings2 = settings();
        assert_eq!(settings1 as *const Settings, settings2 as *const Settings);
    }
}
