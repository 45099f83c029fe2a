use crate::error::ConfigError;
use crate::timing::{DEFAULT_MAX_SUBDIVISION, DEFAULT_SAMPLE_RATE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Playback rate; persisted beat frames are rescaled to it on load.
    pub sample_rate: u32,
    /// Finest beat subdivision the quantizer snaps to.
    pub max_subdivision: u32,
    pub trigger_buffer_capacity: usize,
    /// Fallback when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            max_subdivision: DEFAULT_MAX_SUBDIVISION,
            trigger_buffer_capacity: 1024,
            log_filter: "info".into(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ron_string = fs::read_to_string(path)?;
        let config: EngineConfig = ron::from_str(&ron_string)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, ron_string)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive".into()));
        }
        if self.max_subdivision == 0 {
            return Err(ConfigError::Invalid("max_subdivision must be positive".into()));
        }
        if self.trigger_buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "trigger_buffer_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings").join("engine.ron");
        let config = EngineConfig {
            sample_rate: 48_000,
            max_subdivision: 16,
            trigger_buffer_capacity: 256,
            log_filter: "beatgrid=debug".into(),
        };

        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: EngineConfig = ron::from_str("(sample_rate: 96000)").unwrap();
        assert_eq!(config.sample_rate, 96_000);
        assert_eq!(config.max_subdivision, 64);
        assert_eq!(config.trigger_buffer_capacity, 1024);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_rejects_zero_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.ron");
        fs::write(&path, "(sample_rate: 0)").unwrap();
        assert!(matches!(
            EngineConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.ron");
        fs::write(&path, "(sample_rate: \"fast\")").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            EngineConfig::load(&dir.path().join("absent.ron")),
            Err(ConfigError::Io(_))
        ));
    }
}
