//! Image preprocessing filters for OCR
//!
//! Optional grayscale conversion and Otsu binarization, applied to a
//! temporary copy so the resolved image stays untouched.

use anyhow::{Context, Result};
use image::{GrayImage, ImageFormat};
use imageproc::contrast::otsu_level;
use std::path::Path;
use tempfile::TempPath;
use tracing::debug;

use super::OcrOptions;
use crate::storage::scratch_file;

/// Write a preprocessed copy of `source` into `temp_dir`
///
/// Returns `None` when `options` asks for no preprocessing. Binarization
/// works on luminance, so it implies grayscale.
pub fn prepare_for_recognition(
    source: &Path,
    options: &OcrOptions,
    temp_dir: &Path,
) -> Result<Option<TempPath>> {
    if !options.needs_preprocessing() {
        return Ok(None);
    }

    debug!(
        "OCR preprocessing: grayscale={}, binarize={}",
        options.grayscale, options.binarize
    );

    let decoded = image::open(source)
        .with_context(|| format!("Failed to decode {}", source.display()))?;
    let (width, height) = (decoded.width(), decoded.height());
    let mut data = decoded.to_rgba8().into_raw();

    flatten_alpha(&mut data);
    let mut gray = to_luma(&data, width, height)?;
    if options.binarize {
        apply_binarize(&mut gray);
    }

    let target = scratch_file(temp_dir, "pocr-prep-", "png")?;
    gray.save_with_format(&target, ImageFormat::Png)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    Ok(Some(target))
}

/// Composite RGBA pixels onto a white background
fn flatten_alpha(data: &mut [u8]) {
    for chunk in data.chunks_exact_mut(4) {
        let alpha = chunk[3] as f32 / 255.0;
        for i in 0..3 {
            let val = chunk[i] as f32;
            chunk[i] = (val * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        }
        chunk[3] = 255;
    }
}

/// Collapse RGBA to one luminance channel
fn to_luma(data: &[u8], width: u32, height: u32) -> Result<GrayImage> {
    let luma: Vec<u8> = data
        .chunks_exact(4)
        .map(|chunk| {
            // Standard luminance weights
            (0.299 * chunk[0] as f32 + 0.587 * chunk[1] as f32 + 0.114 * chunk[2] as f32) as u8
        })
        .collect();
    GrayImage::from_raw(width, height, luma).context("pixel buffer does not match image size")
}

/// Map every pixel to black or white around the Otsu level
fn apply_binarize(image: &mut GrayImage) {
    let level = otsu_level(image);
    debug!("Otsu threshold level {}", level);
    for pixel in image.pixels_mut() {
        pixel.0[0] = if pixel.0[0] > level { 255 } else { 0 };
    }
}
