//! Supported raster formats

use anyhow::{anyhow, Context, Result};
use image::{ImageFormat, ImageReader};
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Raster formats the pipeline accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormatTag {
    Png,
    Jpeg,
    Tiff,
    Bmp,
    Gif,
    WebP,
}

impl ImageFormatTag {
    pub const ALL: [ImageFormatTag; 6] = [
        ImageFormatTag::Png,
        ImageFormatTag::Jpeg,
        ImageFormatTag::Tiff,
        ImageFormatTag::Bmp,
        ImageFormatTag::Gif,
        ImageFormatTag::WebP,
    ];

    /// Match a file extension, case-insensitively
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(ImageFormatTag::Png),
            "jpg" | "jpeg" => Some(ImageFormatTag::Jpeg),
            "tif" | "tiff" => Some(ImageFormatTag::Tiff),
            "bmp" => Some(ImageFormatTag::Bmp),
            "gif" => Some(ImageFormatTag::Gif),
            "webp" => Some(ImageFormatTag::WebP),
            _ => None,
        }
    }

    /// Match the extension of `path`
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Canonical file extension
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormatTag::Png => "png",
            ImageFormatTag::Jpeg => "jpg",
            ImageFormatTag::Tiff => "tiff",
            ImageFormatTag::Bmp => "bmp",
            ImageFormatTag::Gif => "gif",
            ImageFormatTag::WebP => "webp",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormatTag::Png => "image/png",
            ImageFormatTag::Jpeg => "image/jpeg",
            ImageFormatTag::Tiff => "image/tiff",
            ImageFormatTag::Bmp => "image/bmp",
            ImageFormatTag::Gif => "image/gif",
            ImageFormatTag::WebP => "image/webp",
        }
    }

    pub fn from_image_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Png => Some(ImageFormatTag::Png),
            ImageFormat::Jpeg => Some(ImageFormatTag::Jpeg),
            ImageFormat::Tiff => Some(ImageFormatTag::Tiff),
            ImageFormat::Bmp => Some(ImageFormatTag::Bmp),
            ImageFormat::Gif => Some(ImageFormatTag::Gif),
            ImageFormat::WebP => Some(ImageFormatTag::WebP),
            _ => None,
        }
    }

    pub fn image_format(&self) -> ImageFormat {
        match self {
            ImageFormatTag::Png => ImageFormat::Png,
            ImageFormatTag::Jpeg => ImageFormat::Jpeg,
            ImageFormatTag::Tiff => ImageFormat::Tiff,
            ImageFormatTag::Bmp => ImageFormat::Bmp,
            ImageFormatTag::Gif => ImageFormat::Gif,
            ImageFormatTag::WebP => ImageFormat::WebP,
        }
    }
}

impl fmt::Display for ImageFormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Format and pixel dimensions read from an image file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageProbe {
    pub format: ImageFormatTag,
    pub width: u32,
    pub height: u32,
}

/// Sniff the content of `path` and read its dimensions without a full decode
pub fn probe_image(path: &Path) -> Result<ImageProbe> {
    let reader = ImageReader::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?
        .with_guessed_format()
        .context("Failed to read image header")?;

    let detected = reader
        .format()
        .ok_or_else(|| anyhow!("content is not a recognizable image"))?;
    let format = ImageFormatTag::from_image_format(detected)
        .ok_or_else(|| anyhow!("{:?} images are not supported", detected))?;

    let (width, height) = reader.into_dimensions().context("Failed to decode image header")?;
    if width == 0 || height == 0 {
        return Err(anyhow!("image has no pixels"));
    }

    Ok(ImageProbe {
        format,
        width,
        height,
    })
}
