//! Host document capabilities
//!
//! The editing host exposes its document, selection and clipboard through an
//! object model whose calls may fail for reasons outside our control. Each
//! capability the pipeline needs is a narrow trait; adapters implement them
//! over whatever the real host object offers, and strategies only depend on
//! the capability they use.

pub mod memory;

use anyhow::Result;
use std::fmt;
use std::path::{Path, PathBuf};

pub use memory::{Fault, MemoryDocument, PictureData};

/// Opaque identity of the object selected in the host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectionHandle(pub String);

impl fmt::Display for SelectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of object the selection points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectedObjectKind {
    /// An embedded or linked picture
    Picture,
    /// A drawing shape that is not a picture
    Shape,
    /// A text range
    Text,
    /// Anything else the host reports
    Other(String),
}

impl SelectedObjectKind {
    pub fn is_picture(&self) -> bool {
        matches!(self, SelectedObjectKind::Picture)
    }
}

/// Snapshot of the host's current selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub handle: SelectionHandle,
    pub kind: SelectedObjectKind,
}

/// Target raster format requested from export facilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportRequest {
    /// Mime type of the file to produce
    pub mime_type: &'static str,
    /// Requested resolution in dots per inch
    pub dpi: u32,
}

impl Default for ExportRequest {
    fn default() -> Self {
        Self {
            mime_type: "image/png",
            dpi: 300,
        }
    }
}

/// Names under which hosts expose the structured graphic export facility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportService {
    /// The dedicated graphic export filter
    GraphicExportFilter,
    /// The same filter registered under its alternate service name
    AlternateExportFilter,
}

impl ExportService {
    pub fn service_name(&self) -> &'static str {
        match self {
            ExportService::GraphicExportFilter => "com.sun.star.drawing.GraphicExportFilter",
            ExportService::AlternateExportFilter => "com.sun.star.drawing.GraphicExporter",
        }
    }
}

/// Read access to the current selection
pub trait SelectionSource {
    fn current_selection(&self) -> Result<Option<Selection>>;
}

/// Structured graphic export
pub trait GraphicExport {
    fn export_graphic(
        &self,
        service: ExportService,
        selection: &SelectionHandle,
        target: &Path,
        request: &ExportRequest,
    ) -> Result<()>;
}

/// Generic graphic provider store operation
pub trait GraphicStore {
    fn store_graphic(&self, selection: &SelectionHandle, target: &Path, mime_type: &str) -> Result<()>;
}

/// In-memory bitmap held by the selected object
pub trait BitmapBuffer {
    fn bitmap_bytes(&self, selection: &SelectionHandle) -> Result<Vec<u8>>;
}

/// Pictures that reference a file on disk rather than embedding it
pub trait LinkedGraphic {
    fn linked_file(&self, selection: &SelectionHandle) -> Result<Option<PathBuf>>;
}

/// Text insertion at the user's editing position
pub trait CursorInsertion {
    /// Insert through the live view cursor
    fn insert_at_view_cursor(&self, text: &str) -> Result<()>;
    /// Insert through a text-model cursor placed at the end of the body
    fn insert_at_body_end(&self, text: &str) -> Result<()>;
    /// Lowest-level insert-string primitive, bypassing cursor objects
    fn insert_string(&self, text: &str) -> Result<()>;
    /// Bring the document window back to the foreground
    fn focus_window(&self) -> Result<()>;
    /// Number of characters in the document body, used to observe insertions
    fn body_char_count(&self) -> Result<usize>;
}

/// Text frame creation
pub trait FrameCreation {
    fn create_text_frame(&self, text: &str) -> Result<()>;
}

/// Replacement of the selected graphic with text
pub trait GraphicReplacement {
    fn replace_graphic(&self, selection: &SelectionHandle, text: &str) -> Result<()>;
}

/// System clipboard
pub trait Clipboard {
    fn set_clipboard_text(&self, text: &str) -> Result<()>;
}

/// Everything the pipeline may ask of a host document
pub trait HostDocument:
    SelectionSource
    + GraphicExport
    + GraphicStore
    + BitmapBuffer
    + LinkedGraphic
    + CursorInsertion
    + FrameCreation
    + GraphicReplacement
    + Clipboard
{
}

impl<T> HostDocument for T where
    T: SelectionSource
        + GraphicExport
        + GraphicStore
        + BitmapBuffer
        + LinkedGraphic
        + CursorInsertion
        + FrameCreation
        + GraphicReplacement
        + Clipboard
{
}
