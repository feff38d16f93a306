//! Key/value access to persisted preferences

use parking_lot::RwLock;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

use super::{load_config, save_config, AppConfig};
use crate::output::OutputMode;

/// Errors raised by configuration stores
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: ConfigKey, value: String },
    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),
    #[error("failed to persist configuration: {0:#}")]
    Persist(anyhow::Error),
}

/// Preference keys consumed by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    EnginePath,
    DefaultLanguage,
    DefaultOutputMode,
    DefaultGrayscale,
    DefaultBinarize,
    PageSegmentationMode,
    EngineMode,
    LastLanguage,
    LastOutputMode,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 9] = [
        ConfigKey::EnginePath,
        ConfigKey::DefaultLanguage,
        ConfigKey::DefaultOutputMode,
        ConfigKey::DefaultGrayscale,
        ConfigKey::DefaultBinarize,
        ConfigKey::PageSegmentationMode,
        ConfigKey::EngineMode,
        ConfigKey::LastLanguage,
        ConfigKey::LastOutputMode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::EnginePath => "engine.path",
            ConfigKey::DefaultLanguage => "ocr.language",
            ConfigKey::DefaultOutputMode => "output.default_mode",
            ConfigKey::DefaultGrayscale => "ocr.grayscale",
            ConfigKey::DefaultBinarize => "ocr.binarize",
            ConfigKey::PageSegmentationMode => "ocr.page_segmentation_mode",
            ConfigKey::EngineMode => "ocr.engine_mode",
            ConfigKey::LastLanguage => "output.last_language",
            ConfigKey::LastOutputMode => "output.last_mode",
        }
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}

/// Configuration collaborator: string values under typed keys
pub trait ConfigStore {
    /// Current value, `None` when unset
    fn get(&self, key: ConfigKey) -> Option<String>;
    /// Set a value; an empty string clears optional keys
    fn set(&self, key: ConfigKey, value: &str) -> Result<(), ConfigError>;
    /// Typed view of every value, read fresh for each command
    fn snapshot(&self) -> AppConfig;
}

fn parse_bool(key: ConfigKey, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_mode_number(key: ConfigKey, value: &str, max: u8) -> Result<u8, ConfigError> {
    value
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|n| *n <= max)
        .ok_or_else(|| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
}

fn parse_output_mode(key: ConfigKey, value: &str) -> Result<OutputMode, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Read a key from a typed configuration
pub fn read_key(config: &AppConfig, key: ConfigKey) -> Option<String> {
    match key {
        ConfigKey::EnginePath => config.engine.path.as_ref().map(|p| p.display().to_string()),
        ConfigKey::DefaultLanguage => Some(config.ocr.language.clone()),
        ConfigKey::DefaultOutputMode => Some(config.output.default_mode.to_string()),
        ConfigKey::DefaultGrayscale => Some(config.ocr.grayscale.to_string()),
        ConfigKey::DefaultBinarize => Some(config.ocr.binarize.to_string()),
        ConfigKey::PageSegmentationMode => Some(config.ocr.page_segmentation_mode.to_string()),
        ConfigKey::EngineMode => Some(config.ocr.engine_mode.to_string()),
        ConfigKey::LastLanguage => config.output.last_language.clone(),
        ConfigKey::LastOutputMode => config.output.last_mode.map(|m| m.to_string()),
    }
}

/// Write a key into a typed configuration
pub fn write_key(config: &mut AppConfig, key: ConfigKey, value: &str) -> Result<(), ConfigError> {
    match key {
        ConfigKey::EnginePath => config.engine.path = non_empty(value).map(PathBuf::from),
        ConfigKey::DefaultLanguage => {
            config.ocr.language = non_empty(value).ok_or_else(|| ConfigError::InvalidValue {
                key,
                value: value.to_string(),
            })?
        }
        ConfigKey::DefaultOutputMode => config.output.default_mode = parse_output_mode(key, value)?,
        ConfigKey::DefaultGrayscale => config.ocr.grayscale = parse_bool(key, value)?,
        ConfigKey::DefaultBinarize => config.ocr.binarize = parse_bool(key, value)?,
        ConfigKey::PageSegmentationMode => {
            config.ocr.page_segmentation_mode = parse_mode_number(key, value, 13)?
        }
        ConfigKey::EngineMode => config.ocr.engine_mode = parse_mode_number(key, value, 3)?,
        ConfigKey::LastLanguage => config.output.last_language = non_empty(value),
        ConfigKey::LastOutputMode => {
            config.output.last_mode = match non_empty(value) {
                Some(v) => Some(parse_output_mode(key, &v)?),
                None => None,
            }
        }
    }
    Ok(())
}

/// Store backed by a TOML file, written through on every `set`
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
    config: RwLock<AppConfig>,
}

impl FileConfigStore {
    /// Open the store at `path`, starting from defaults when the file is missing or unreadable
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = if path.exists() {
            match load_config(&path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    tracing::warn!("Ignoring unreadable configuration {:?}: {:#}", path, e);
                    AppConfig::default()
                }
            }
        } else {
            info!("Using default configuration");
            AppConfig::default()
        };

        Self {
            path,
            config: RwLock::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for FileConfigStore {
    fn get(&self, key: ConfigKey) -> Option<String> {
        read_key(&self.config.read(), key)
    }

    fn set(&self, key: ConfigKey, value: &str) -> Result<(), ConfigError> {
        let mut config = self.config.write();
        let mut updated = config.clone();
        write_key(&mut updated, key, value)?;
        save_config(&updated, &self.path).map_err(ConfigError::Persist)?;
        debug!("Configuration {} updated", key);
        *config = updated;
        Ok(())
    }

    fn snapshot(&self) -> AppConfig {
        self.config.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::open(dir.path().join("config.toml"));
        assert_eq!(store.get(ConfigKey::DefaultLanguage).as_deref(), Some("eng"));
        assert_eq!(store.get(ConfigKey::EnginePath), None);
        assert_eq!(store.get(ConfigKey::DefaultOutputMode).as_deref(), Some("at_cursor"));
    }

    #[test]
    fn test_set_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let store = FileConfigStore::open(&path);

        store.set(ConfigKey::EnginePath, "/usr/bin/tesseract").unwrap();
        store.set(ConfigKey::DefaultBinarize, "yes").unwrap();
        store.set(ConfigKey::LastOutputMode, "to_clipboard").unwrap();

        let reopened = FileConfigStore::open(&path);
        let config = reopened.snapshot();
        assert_eq!(config.engine.path, Some(PathBuf::from("/usr/bin/tesseract")));
        assert!(config.ocr.binarize);
        assert_eq!(config.output.last_mode, Some(OutputMode::CopyToClipboard));
    }

    #[test]
    fn test_invalid_value_leaves_config_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::open(dir.path().join("config.toml"));

        let err = store.set(ConfigKey::PageSegmentationMode, "14").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert_eq!(store.get(ConfigKey::PageSegmentationMode).as_deref(), Some("3"));

        assert!(store.set(ConfigKey::DefaultGrayscale, "maybe").is_err());
        assert!(store.set(ConfigKey::DefaultLanguage, "  ").is_err());
    }

    #[test]
    fn test_empty_value_clears_engine_path() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileConfigStore::open(dir.path().join("config.toml"));
        store.set(ConfigKey::EnginePath, "/opt/tesseract").unwrap();
        store.set(ConfigKey::EnginePath, "").unwrap();
        assert_eq!(store.get(ConfigKey::EnginePath), None);
    }

    #[test]
    fn test_key_names_round_trip() {
        for key in ConfigKey::ALL {
            assert_eq!(key.as_str().parse::<ConfigKey>().unwrap(), key);
        }
        assert!("ocr.colour".parse::<ConfigKey>().is_err());
    }
}
