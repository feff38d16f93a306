//! Export routes for a selected picture, most structured first

use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;
use tempfile::TempPath;

use super::formats::{probe_image, ImageFormatTag, ImageProbe};
use super::placeholder::write_placeholder;
use crate::fallback::Strategy;
use crate::host::{ExportRequest, ExportService, HostDocument, SelectionHandle};
use crate::storage::scratch_file;

pub const PRIMARY_EXPORT: &str = "graphic-export-filter";
pub const ALTERNATE_EXPORT: &str = "alternate-export-filter";
pub const GRAPHIC_PROVIDER: &str = "graphic-provider";
pub const BITMAP_BUFFER: &str = "bitmap-buffer";
pub const LINKED_FILE: &str = "linked-file-copy";
pub const PLACEHOLDER: &str = "placeholder";

/// Everything an export route needs
pub struct ExportContext<'a> {
    pub host: &'a dyn HostDocument,
    pub selection: &'a SelectionHandle,
    pub temp_dir: &'a Path,
    pub request: ExportRequest,
}

/// A file produced by one of the routes
#[derive(Debug)]
pub struct ExportedImage {
    pub path: TempPath,
    pub probe: ImageProbe,
    /// Set when the file is a placeholder rather than the picture
    pub diagnostic: Option<String>,
}

/// All routes in the order they are attempted
pub fn export_strategies<'a>() -> [Strategy<ExportContext<'a>, ExportedImage>; 6] {
    [
        Strategy::new(PRIMARY_EXPORT, export_primary),
        Strategy::new(ALTERNATE_EXPORT, export_alternate),
        Strategy::new(GRAPHIC_PROVIDER, export_graphic_provider),
        Strategy::new(BITMAP_BUFFER, export_bitmap_buffer),
        Strategy::new(LINKED_FILE, export_linked_file),
        Strategy::new(PLACEHOLDER, export_placeholder),
    ]
}

/// Accept a route's output only if it is a non-empty, readable image
fn verified(path: TempPath) -> Result<ExportedImage> {
    let size = std::fs::metadata(&path)
        .with_context(|| format!("Exported file {} is missing", path.display()))?
        .len();
    if size == 0 {
        bail!("export produced an empty file");
    }
    let probe = probe_image(&path)?;
    Ok(ExportedImage {
        path,
        probe,
        diagnostic: None,
    })
}

fn target_for_request(ctx: &ExportContext<'_>) -> Result<TempPath> {
    let ext = match ctx.request.mime_type {
        "image/jpeg" => "jpg",
        "image/tiff" => "tiff",
        "image/bmp" => "bmp",
        _ => "png",
    };
    scratch_file(ctx.temp_dir, "pocr-export-", ext)
}

fn export_with_service(ctx: &ExportContext<'_>, service: ExportService) -> Result<ExportedImage> {
    let target = target_for_request(ctx)?;
    ctx.host
        .export_graphic(service, ctx.selection, &target, &ctx.request)
        .with_context(|| format!("{} refused export", service.service_name()))?;
    verified(target)
}

fn export_primary(ctx: &ExportContext<'_>) -> Result<ExportedImage> {
    export_with_service(ctx, ExportService::GraphicExportFilter)
}

fn export_alternate(ctx: &ExportContext<'_>) -> Result<ExportedImage> {
    export_with_service(ctx, ExportService::AlternateExportFilter)
}

fn export_graphic_provider(ctx: &ExportContext<'_>) -> Result<ExportedImage> {
    let target = target_for_request(ctx)?;
    ctx.host
        .store_graphic(ctx.selection, &target, ctx.request.mime_type)
        .context("graphic provider store failed")?;
    verified(target)
}

fn export_bitmap_buffer(ctx: &ExportContext<'_>) -> Result<ExportedImage> {
    let bytes = ctx.host.bitmap_bytes(ctx.selection)?;
    if bytes.is_empty() {
        bail!("bitmap buffer is empty");
    }
    let format = image::guess_format(&bytes)
        .ok()
        .and_then(ImageFormatTag::from_image_format)
        .ok_or_else(|| anyhow!("bitmap buffer is not in a supported format"))?;

    let target = scratch_file(ctx.temp_dir, "pocr-bitmap-", format.extension())?;
    std::fs::write(&target, &bytes).context("Failed to write bitmap buffer")?;
    verified(target)
}

fn export_linked_file(ctx: &ExportContext<'_>) -> Result<ExportedImage> {
    let source = ctx
        .host
        .linked_file(ctx.selection)?
        .ok_or_else(|| anyhow!("picture is embedded, not linked"))?;
    if !source.is_file() {
        bail!("linked file {} does not exist", source.display());
    }
    let format = ImageFormatTag::from_path(&source)
        .ok_or_else(|| anyhow!("linked file {} has an unsupported extension", source.display()))?;

    let target = scratch_file(ctx.temp_dir, "pocr-linked-", format.extension())?;
    std::fs::copy(&source, &target)
        .with_context(|| format!("Failed to copy {}", source.display()))?;
    verified(target)
}

fn export_placeholder(ctx: &ExportContext<'_>) -> Result<ExportedImage> {
    let message = format!(
        "Could not export the selected picture ({}). Try saving it as a file and use OCR from file.",
        ctx.selection
    );
    let target = scratch_file(ctx.temp_dir, "pocr-placeholder-", "png")?;
    let (width, height) = write_placeholder(&message, &target)?;

    Ok(ExportedImage {
        path: target,
        probe: ImageProbe {
            format: ImageFormatTag::Png,
            width,
            height,
        },
        diagnostic: Some(message),
    })
}
