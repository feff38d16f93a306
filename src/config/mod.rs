//! Application Configuration
//!
//! User preferences stored in TOML format. Values are read at the start of
//! every command, nothing here is cached across runs.

pub mod store;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::OutputMode;
use crate::recognition::OcrOptions;

pub use store::{ConfigError, ConfigKey, ConfigStore, FileConfigStore};

/// Default OCR language (Tesseract language code)
pub const DEFAULT_LANGUAGE: &str = "eng";
/// Fully automatic page segmentation, no orientation detection
pub const DEFAULT_PSM: u8 = 3;
/// Engine picks whatever mode is available
pub const DEFAULT_OEM: u8 = 3;
/// Hard limit on a single recognition call
pub const DEFAULT_RECOGNITION_TIMEOUT_SECS: u64 = 120;

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// OCR engine settings
    pub engine: EngineConfig,
    /// Default recognition options
    pub ocr: OcrDefaults,
    /// Output settings
    pub output: OutputConfig,
}

/// OCR engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine executable; discovered on PATH when unset
    pub path: Option<PathBuf>,
    /// Seconds before a recognition call is abandoned
    pub recognition_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: None,
            recognition_timeout_secs: DEFAULT_RECOGNITION_TIMEOUT_SECS,
        }
    }
}

/// Default recognition options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrDefaults {
    /// Language code, `+`-joined for several languages
    pub language: String,
    /// Page segmentation mode (0-13)
    pub page_segmentation_mode: u8,
    /// Engine mode (0-3)
    pub engine_mode: u8,
    /// Convert to grayscale before recognition
    pub grayscale: bool,
    /// Binarize before recognition
    pub binarize: bool,
}

impl Default for OcrDefaults {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            page_segmentation_mode: DEFAULT_PSM,
            engine_mode: DEFAULT_OEM,
            grayscale: false,
            binarize: false,
        }
    }
}

/// Output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output mode offered first
    pub default_mode: OutputMode,
    /// Offer the last used language and mode instead of the defaults
    pub remember_last: bool,
    /// Language chosen in the last run
    pub last_language: Option<String>,
    /// Output mode chosen in the last run
    pub last_mode: Option<OutputMode>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_mode: OutputMode::InsertAtCursor,
            remember_last: true,
            last_language: None,
            last_mode: None,
        }
    }
}

impl AppConfig {
    /// Recognition options to offer the user
    pub fn ocr_options(&self) -> OcrOptions {
        let language = if self.output.remember_last {
            self.output
                .last_language
                .clone()
                .unwrap_or_else(|| self.ocr.language.clone())
        } else {
            self.ocr.language.clone()
        };

        OcrOptions {
            language,
            page_segmentation_mode: self.ocr.page_segmentation_mode,
            engine_mode: self.ocr.engine_mode,
            grayscale: self.ocr.grayscale,
            binarize: self.ocr.binarize,
        }
    }

    /// Output mode to offer the user
    pub fn preferred_output_mode(&self) -> OutputMode {
        if self.output.remember_last {
            self.output.last_mode.unwrap_or(self.output.default_mode)
        } else {
            self.output.default_mode
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
