//! Storage Layer
//!
//! Locations for the configuration file and the per-session scratch space
//! that holds images while a pipeline run owns them.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tempfile::{TempDir, TempPath};

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("org", "picture-ocr", "PictureOcr")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Default location of the configuration file
pub fn default_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.toml"))
}

/// Scratch directory for the temporary images of one session, removed on drop
pub fn session_temp_dir() -> Result<TempDir> {
    let dir = tempfile::Builder::new()
        .prefix("picture-ocr-")
        .tempdir()
        .context("Failed to create session scratch directory")?;

    Ok(dir)
}

/// Allocate an empty scratch file in `dir`, deleted when the returned path drops
pub fn scratch_file(dir: &Path, prefix: &str, ext: &str) -> Result<TempPath> {
    let file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(&format!(".{}", ext))
        .tempfile_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    Ok(file.into_temp_path())
}
