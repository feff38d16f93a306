//! Image Source Resolver
//!
//! Turns a selection or a file path into a decodable image file in session
//! scratch space. The resulting [`ResolvedImage`] owns that file and deletes
//! it when dropped, so a pipeline run releases it on every exit path.

pub mod formats;
pub mod placeholder;
pub mod strategies;

use std::path::{Path, PathBuf};
use tempfile::TempPath;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fallback::first_success;
use crate::host::{ExportRequest, HostDocument, SelectionHandle};
use crate::storage::scratch_file;

pub use formats::{probe_image, ImageFormatTag, ImageProbe};
use strategies::{export_strategies, ExportContext, PLACEHOLDER};

/// Where the image comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSourceDescriptor {
    /// The picture currently selected in the host
    Selection(SelectionHandle),
    /// An image file on disk
    FilePath(PathBuf),
}

impl ImageSourceDescriptor {
    pub fn is_selection(&self) -> bool {
        matches!(self, ImageSourceDescriptor::Selection(_))
    }

    /// Selection handle for selection sources
    pub fn selection(&self) -> Option<&SelectionHandle> {
        match self {
            ImageSourceDescriptor::Selection(handle) => Some(handle),
            ImageSourceDescriptor::FilePath(_) => None,
        }
    }

    /// Short label used in logs
    pub fn label(&self) -> String {
        match self {
            ImageSourceDescriptor::Selection(handle) => format!("selection:{}", handle),
            ImageSourceDescriptor::FilePath(path) => format!("file:{}", path.display()),
        }
    }
}

/// How the resolved file was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionRoute {
    /// Copied from a file path
    FileCopy,
    /// Exported from the selection by the named strategy
    Export(&'static str),
}

/// Resolution failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("no object is selected")]
    NoSelection,
    #[error("the selected object is not a picture ({0})")]
    UnsupportedObject(String),
    #[error("the selected picture could not be exported: {0}")]
    ExportFailed(String),
    #[error("image file not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("temporary storage unavailable: {0}")]
    TempStorage(String),
}

/// A decodable image file owned by one pipeline run
#[derive(Debug)]
pub struct ResolvedImage {
    path: TempPath,
    format: ImageFormatTag,
    width: u32,
    height: u32,
    route: AcquisitionRoute,
    diagnostic: Option<String>,
}

impl ResolvedImage {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ImageFormatTag {
        self.format
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn route(&self) -> AcquisitionRoute {
        self.route
    }

    /// True when export fell back to a diagnostic placeholder
    pub fn is_placeholder(&self) -> bool {
        self.diagnostic.is_some()
    }

    /// Message embedded in a placeholder image
    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }
}

/// Resolves image sources into scratch files under `temp_dir`
#[derive(Debug, Clone)]
pub struct ImageResolver {
    temp_dir: PathBuf,
    export_request: ExportRequest,
}

impl ImageResolver {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            export_request: ExportRequest::default(),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Resolve `descriptor` into an owned image file
    pub fn resolve(
        &self,
        descriptor: &ImageSourceDescriptor,
        host: &dyn HostDocument,
    ) -> Result<ResolvedImage, ResolutionError> {
        match descriptor {
            ImageSourceDescriptor::FilePath(path) => self.resolve_file(path),
            ImageSourceDescriptor::Selection(handle) => self.resolve_selection(handle, host),
        }
    }

    fn resolve_file(&self, path: &Path) -> Result<ResolvedImage, ResolutionError> {
        if !path.is_file() {
            return Err(ResolutionError::FileNotFound(path.to_path_buf()));
        }

        let by_extension = ImageFormatTag::from_path(path).ok_or_else(|| {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_else(|| "no extension".to_string());
            ResolutionError::UnsupportedFormat(ext)
        })?;

        let probe = probe_image(path)
            .map_err(|e| ResolutionError::UnsupportedFormat(format!("{}: {:#}", path.display(), e)))?;
        if probe.format != by_extension {
            warn!(
                "{} has a .{} extension but contains {} data",
                path.display(),
                by_extension,
                probe.format
            );
        }

        let target = scratch_file(&self.temp_dir, "pocr-source-", probe.format.extension())
            .map_err(|e| ResolutionError::TempStorage(format!("{:#}", e)))?;
        std::fs::copy(path, &target).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ResolutionError::FileNotFound(path.to_path_buf()),
            _ => ResolutionError::TempStorage(format!("copy of {} failed: {}", path.display(), e)),
        })?;

        info!(
            "Resolved {} as {} {}x{}",
            path.display(),
            probe.format,
            probe.width,
            probe.height
        );

        Ok(ResolvedImage {
            path: target,
            format: probe.format,
            width: probe.width,
            height: probe.height,
            route: AcquisitionRoute::FileCopy,
            diagnostic: None,
        })
    }

    fn resolve_selection(
        &self,
        handle: &SelectionHandle,
        host: &dyn HostDocument,
    ) -> Result<ResolvedImage, ResolutionError> {
        let selection = match host.current_selection() {
            Ok(Some(selection)) => selection,
            Ok(None) => return Err(ResolutionError::NoSelection),
            Err(e) => {
                warn!("Could not read the host selection: {:#}", e);
                return Err(ResolutionError::NoSelection);
            }
        };

        if &selection.handle != handle {
            debug!("Selection changed from {} to {}", handle, selection.handle);
            return Err(ResolutionError::NoSelection);
        }
        if !selection.kind.is_picture() {
            return Err(ResolutionError::UnsupportedObject(format!("{:?}", selection.kind)));
        }

        let ctx = ExportContext {
            host,
            selection: handle,
            temp_dir: &self.temp_dir,
            request: self.export_request,
        };

        let strategies = export_strategies();
        match first_success("export", &ctx, &strategies) {
            Ok(success) => {
                let exported = success.value;
                if success.strategy == PLACEHOLDER {
                    warn!(
                        "Every export route failed for {}, using a diagnostic placeholder",
                        handle
                    );
                } else {
                    info!(
                        "Exported {} via {} ({} {}x{})",
                        handle,
                        success.strategy,
                        exported.probe.format,
                        exported.probe.width,
                        exported.probe.height
                    );
                }
                Ok(ResolvedImage {
                    path: exported.path,
                    format: exported.probe.format,
                    width: exported.probe.width,
                    height: exported.probe.height,
                    route: AcquisitionRoute::Export(success.strategy),
                    diagnostic: exported.diagnostic,
                })
            }
            Err(exhausted) => Err(ResolutionError::ExportFailed(exhausted.to_string())),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::host::{Fault, MemoryDocument};
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    /// Encoded 12x8 test picture
    pub(crate) fn picture_bytes(format: ImageFormat) -> Vec<u8> {
        let image = RgbImage::from_fn(12, 8, |x, y| Rgb([(x * 20) as u8, (y * 30) as u8, 90]));
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, format).unwrap();
        bytes.into_inner()
    }

    fn files_in(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_resolve_every_supported_file_format() {
        let inputs = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let resolver = ImageResolver::new(scratch.path());
        let host = MemoryDocument::new();

        for tag in ImageFormatTag::ALL {
            let path = inputs.path().join(format!("input.{}", tag.extension()));
            std::fs::write(&path, picture_bytes(tag.image_format())).unwrap();

            let resolved = resolver
                .resolve(&ImageSourceDescriptor::FilePath(path.clone()), &host)
                .unwrap();
            assert_eq!(resolved.format(), tag);
            assert_eq!(resolved.dimensions(), (12, 8));
            assert_eq!(resolved.route(), AcquisitionRoute::FileCopy);
            assert!(resolved.path().starts_with(scratch.path()));
            assert_ne!(resolved.path(), path.as_path());

            let copy = resolved.path().to_path_buf();
            assert!(copy.exists());
            drop(resolved);
            assert!(!copy.exists());
        }
        assert_eq!(files_in(scratch.path()), 0);
    }

    #[test]
    fn test_missing_file() {
        let scratch = tempfile::tempdir().unwrap();
        let resolver = ImageResolver::new(scratch.path());
        let err = resolver
            .resolve(
                &ImageSourceDescriptor::FilePath(PathBuf::from("/nonexistent/receipt.png")),
                &MemoryDocument::new(),
            )
            .unwrap_err();
        assert!(matches!(err, ResolutionError::FileNotFound(_)));
    }

    #[test]
    fn test_extension_not_allowed() {
        let inputs = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let path = inputs.path().join("scan.pdf");
        std::fs::write(&path, b"%PDF-1.7").unwrap();

        let err = ImageResolver::new(scratch.path())
            .resolve(&ImageSourceDescriptor::FilePath(path), &MemoryDocument::new())
            .unwrap_err();
        assert_eq!(err, ResolutionError::UnsupportedFormat("pdf".to_string()));
        assert_eq!(files_in(scratch.path()), 0);
    }

    #[test]
    fn test_undecodable_content() {
        let inputs = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let path = inputs.path().join("broken.png");
        std::fs::write(&path, b"not really a png").unwrap();

        let err = ImageResolver::new(scratch.path())
            .resolve(&ImageSourceDescriptor::FilePath(path), &MemoryDocument::new())
            .unwrap_err();
        assert!(matches!(err, ResolutionError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_selection_uses_primary_export() {
        let scratch = tempfile::tempdir().unwrap();
        let host = MemoryDocument::new();
        let handle = host.select_picture(picture_bytes(ImageFormat::Jpeg));

        let resolved = ImageResolver::new(scratch.path())
            .resolve(&ImageSourceDescriptor::Selection(handle), &host)
            .unwrap();
        assert_eq!(resolved.route(), AcquisitionRoute::Export(strategies::PRIMARY_EXPORT));
        assert_eq!(resolved.format(), ImageFormatTag::Png);
        assert!(!resolved.is_placeholder());
    }

    #[test]
    fn test_selection_falls_through_to_bitmap_buffer() {
        let scratch = tempfile::tempdir().unwrap();
        let host = MemoryDocument::new();
        let handle = host.select_picture(picture_bytes(ImageFormat::Bmp));
        host.inject(Fault::PrimaryExport);
        host.inject(Fault::AlternateExport);
        host.inject(Fault::GraphicStore);

        let resolved = ImageResolver::new(scratch.path())
            .resolve(&ImageSourceDescriptor::Selection(handle), &host)
            .unwrap();
        assert_eq!(resolved.route(), AcquisitionRoute::Export(strategies::BITMAP_BUFFER));
        assert_eq!(resolved.format(), ImageFormatTag::Bmp);
        // failed attempts leave nothing behind
        drop(resolved);
        assert_eq!(files_in(scratch.path()), 0);
    }

    #[test]
    fn test_linked_picture_is_copied() {
        let inputs = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let linked = inputs.path().join("linked.gif");
        std::fs::write(&linked, picture_bytes(ImageFormat::Gif)).unwrap();

        let host = MemoryDocument::new();
        let handle = host.select_linked_picture(&linked);

        let resolved = ImageResolver::new(scratch.path())
            .resolve(&ImageSourceDescriptor::Selection(handle), &host)
            .unwrap();
        assert_eq!(resolved.route(), AcquisitionRoute::Export(strategies::LINKED_FILE));
        assert_eq!(resolved.format(), ImageFormatTag::Gif);
    }

    #[test]
    fn test_placeholder_when_every_export_fails() {
        let scratch = tempfile::tempdir().unwrap();
        let host = MemoryDocument::new();
        let handle = host.select_picture(picture_bytes(ImageFormat::Png));
        for fault in [
            Fault::PrimaryExport,
            Fault::AlternateExport,
            Fault::GraphicStore,
            Fault::Bitmap,
            Fault::LinkedFile,
        ] {
            host.inject(fault);
        }

        let resolved = ImageResolver::new(scratch.path())
            .resolve(&ImageSourceDescriptor::Selection(handle), &host)
            .unwrap();
        assert!(resolved.is_placeholder());
        assert_eq!(resolved.route(), AcquisitionRoute::Export(PLACEHOLDER));
        assert!(resolved.diagnostic().unwrap().contains("Could not export"));
        assert!(image::open(resolved.path()).is_ok());
    }

    #[test]
    fn test_export_failed_when_scratch_space_is_gone() {
        let scratch = tempfile::tempdir().unwrap();
        let missing = scratch.path().join("removed");
        let host = MemoryDocument::new();
        let handle = host.select_picture(picture_bytes(ImageFormat::Png));

        let err = ImageResolver::new(&missing)
            .resolve(&ImageSourceDescriptor::Selection(handle), &host)
            .unwrap_err();
        match err {
            ResolutionError::ExportFailed(message) => {
                assert!(message.contains("all 6 strategies failed"));
                assert!(message.contains(PLACEHOLDER));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_non_picture_selection() {
        let scratch = tempfile::tempdir().unwrap();
        let host = MemoryDocument::new();
        let handle = host.select_shape();

        let err = ImageResolver::new(scratch.path())
            .resolve(&ImageSourceDescriptor::Selection(handle), &host)
            .unwrap_err();
        assert!(matches!(err, ResolutionError::UnsupportedObject(_)));
        assert_eq!(files_in(scratch.path()), 0);
    }

    #[test]
    fn test_empty_or_changed_selection() {
        let scratch = tempfile::tempdir().unwrap();
        let resolver = ImageResolver::new(scratch.path());
        let host = MemoryDocument::new();
        let stale = host.select_picture(picture_bytes(ImageFormat::Png));
        host.select_picture(picture_bytes(ImageFormat::Png));

        let err = resolver
            .resolve(&ImageSourceDescriptor::Selection(stale.clone()), &host)
            .unwrap_err();
        assert_eq!(err, ResolutionError::NoSelection);

        host.clear_selection();
        let err = resolver
            .resolve(&ImageSourceDescriptor::Selection(stale), &host)
            .unwrap_err();
        assert_eq!(err, ResolutionError::NoSelection);
    }
}
