//! In-memory host document
//!
//! A headless implementation of every host capability. It backs the command
//! line front end and lets tests make any single capability fail on demand.

use anyhow::{anyhow, bail, Context, Result};
use image::ImageFormat;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::{
    BitmapBuffer, Clipboard, CursorInsertion, ExportRequest, ExportService, FrameCreation,
    GraphicExport, GraphicReplacement, GraphicStore, LinkedGraphic, SelectedObjectKind, Selection,
    SelectionHandle, SelectionSource,
};

/// A host operation that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Reading the selection errors out
    Selection,
    /// Reading the selection panics
    SelectionPanics,
    PrimaryExport,
    AlternateExport,
    GraphicStore,
    Bitmap,
    LinkedFile,
    /// The view cursor errors out
    ViewCursor,
    /// The view cursor was invalidated and comes back after the window regains focus
    StaleViewCursor,
    /// The view cursor accepts text but nothing lands in the document
    SilentViewCursor,
    BodyCursor,
    InsertString,
    Focus,
    FrameCreation,
    Replacement,
    Clipboard,
}

/// Picture payload held by the document
#[derive(Debug, Clone)]
pub struct PictureData {
    /// Encoded image bytes for embedded pictures
    pub bytes: Option<Vec<u8>>,
    /// Source file for linked pictures
    pub linked_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct SelectedObject {
    selection: Selection,
    picture: Option<PictureData>,
    /// Byte offset in the body where the object is anchored
    anchor: usize,
}

#[derive(Debug, Default)]
struct DocumentState {
    body: String,
    cursor: usize,
    frames: Vec<String>,
    selection: Option<SelectedObject>,
    clipboard: Option<String>,
    faults: HashSet<Fault>,
    closed: bool,
    focus_requests: u32,
    next_handle: u32,
}

impl DocumentState {
    fn check(&self, fault: Fault) -> Result<()> {
        if self.closed {
            bail!("document is closed");
        }
        if self.faults.contains(&fault) {
            bail!("host refused operation ({:?})", fault);
        }
        Ok(())
    }

    fn insert_at(&mut self, offset: usize, text: &str) {
        let offset = offset.min(self.body.len());
        self.body.insert_str(offset, text);
        self.cursor = offset + text.len();
        // the selected picture moves with the text in front of it
        if let Some(selected) = self.selection.as_mut() {
            if offset <= selected.anchor {
                selected.anchor += text.len();
            }
        }
    }

    fn selected_picture(&self, handle: &SelectionHandle) -> Result<&PictureData> {
        let selected = self
            .selection
            .as_ref()
            .filter(|s| &s.selection.handle == handle)
            .ok_or_else(|| anyhow!("object '{}' is no longer selected", handle))?;
        selected
            .picture
            .as_ref()
            .ok_or_else(|| anyhow!("object '{}' is not a picture", handle))
    }

    fn allocate_handle(&mut self, prefix: &str) -> SelectionHandle {
        self.next_handle += 1;
        SelectionHandle(format!("{}-{}", prefix, self.next_handle))
    }
}

/// In-memory document implementing every host capability
#[derive(Debug, Default)]
pub struct MemoryDocument {
    state: Mutex<DocumentState>,
}

impl MemoryDocument {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a document with the cursor at the end of `text`
    pub fn with_text(text: &str) -> Self {
        let doc = Self::new();
        {
            let mut state = doc.state.lock();
            state.body = text.to_string();
            state.cursor = text.len();
        }
        doc
    }

    /// Move the cursor, clamped to the body and snapped back to a character boundary
    pub fn set_cursor(&self, offset: usize) {
        let mut state = self.state.lock();
        let mut offset = offset.min(state.body.len());
        while !state.body.is_char_boundary(offset) {
            offset -= 1;
        }
        state.cursor = offset;
    }

    /// Select an embedded picture anchored at the cursor
    pub fn select_picture(&self, bytes: Vec<u8>) -> SelectionHandle {
        self.select_picture_data(PictureData {
            bytes: Some(bytes),
            linked_path: None,
        })
    }

    /// Select a picture that links to a file on disk
    pub fn select_linked_picture(&self, path: impl Into<PathBuf>) -> SelectionHandle {
        self.select_picture_data(PictureData {
            bytes: None,
            linked_path: Some(path.into()),
        })
    }

    /// Select a picture with an explicit payload
    pub fn select_picture_data(&self, picture: PictureData) -> SelectionHandle {
        let mut state = self.state.lock();
        let handle = state.allocate_handle("picture");
        let anchor = state.cursor;
        state.selection = Some(SelectedObject {
            selection: Selection {
                handle: handle.clone(),
                kind: SelectedObjectKind::Picture,
            },
            picture: Some(picture),
            anchor,
        });
        handle
    }

    /// Select a drawing shape that is not a picture
    pub fn select_shape(&self) -> SelectionHandle {
        let mut state = self.state.lock();
        let handle = state.allocate_handle("shape");
        let anchor = state.cursor;
        state.selection = Some(SelectedObject {
            selection: Selection {
                handle: handle.clone(),
                kind: SelectedObjectKind::Shape,
            },
            picture: None,
            anchor,
        });
        handle
    }

    pub fn clear_selection(&self) {
        self.state.lock().selection = None;
    }

    /// Make an operation fail until cleared
    pub fn inject(&self, fault: Fault) {
        self.state.lock().faults.insert(fault);
    }

    pub fn clear_fault(&self, fault: Fault) {
        self.state.lock().faults.remove(&fault);
    }

    /// Make the whole document unavailable
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    pub fn text(&self) -> String {
        self.state.lock().body.clone()
    }

    pub fn cursor(&self) -> usize {
        self.state.lock().cursor
    }

    pub fn frames(&self) -> Vec<String> {
        self.state.lock().frames.clone()
    }

    pub fn clipboard(&self) -> Option<String> {
        self.state.lock().clipboard.clone()
    }

    pub fn focus_requests(&self) -> u32 {
        self.state.lock().focus_requests
    }
}

/// Decode `bytes` and write them to `target` in the requested format
fn write_encoded(bytes: &[u8], target: &Path, mime_type: &str) -> Result<()> {
    let format = ImageFormat::from_mime_type(mime_type)
        .ok_or_else(|| anyhow!("unsupported export mime type '{}'", mime_type))?;
    let decoded = image::load_from_memory(bytes).context("Failed to decode picture data")?;
    decoded
        .save_with_format(target, format)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    Ok(())
}

impl SelectionSource for MemoryDocument {
    fn current_selection(&self) -> Result<Option<Selection>> {
        let state = self.state.lock();
        if state.faults.contains(&Fault::SelectionPanics) {
            panic!("selection supplier disposed");
        }
        state.check(Fault::Selection)?;
        Ok(state.selection.as_ref().map(|s| s.selection.clone()))
    }
}

impl GraphicExport for MemoryDocument {
    fn export_graphic(
        &self,
        service: ExportService,
        selection: &SelectionHandle,
        target: &Path,
        request: &ExportRequest,
    ) -> Result<()> {
        let state = self.state.lock();
        let fault = match service {
            ExportService::GraphicExportFilter => Fault::PrimaryExport,
            ExportService::AlternateExportFilter => Fault::AlternateExport,
        };
        state.check(fault)?;
        let picture = state.selected_picture(selection)?;
        let bytes = picture
            .bytes
            .as_deref()
            .ok_or_else(|| anyhow!("{} cannot export a linked graphic", service.service_name()))?;
        write_encoded(bytes, target, request.mime_type)
    }
}

impl GraphicStore for MemoryDocument {
    fn store_graphic(&self, selection: &SelectionHandle, target: &Path, mime_type: &str) -> Result<()> {
        let state = self.state.lock();
        state.check(Fault::GraphicStore)?;
        let picture = state.selected_picture(selection)?;
        let bytes = picture
            .bytes
            .as_deref()
            .ok_or_else(|| anyhow!("graphic provider has no data for a linked graphic"))?;
        write_encoded(bytes, target, mime_type)
    }
}

impl BitmapBuffer for MemoryDocument {
    fn bitmap_bytes(&self, selection: &SelectionHandle) -> Result<Vec<u8>> {
        let state = self.state.lock();
        state.check(Fault::Bitmap)?;
        state
            .selected_picture(selection)?
            .bytes
            .clone()
            .ok_or_else(|| anyhow!("selected object holds no bitmap"))
    }
}

impl LinkedGraphic for MemoryDocument {
    fn linked_file(&self, selection: &SelectionHandle) -> Result<Option<PathBuf>> {
        let state = self.state.lock();
        state.check(Fault::LinkedFile)?;
        Ok(state.selected_picture(selection)?.linked_path.clone())
    }
}

impl CursorInsertion for MemoryDocument {
    fn insert_at_view_cursor(&self, text: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check(Fault::ViewCursor)?;
        if state.faults.contains(&Fault::StaleViewCursor) {
            bail!("view cursor has been disposed");
        }
        if state.faults.contains(&Fault::SilentViewCursor) {
            return Ok(());
        }
        let cursor = state.cursor;
        state.insert_at(cursor, text);
        Ok(())
    }

    fn insert_at_body_end(&self, text: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check(Fault::BodyCursor)?;
        let end = state.body.len();
        state.insert_at(end, text);
        Ok(())
    }

    fn insert_string(&self, text: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check(Fault::InsertString)?;
        let cursor = state.cursor;
        state.insert_at(cursor, text);
        Ok(())
    }

    fn focus_window(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.check(Fault::Focus)?;
        state.focus_requests += 1;
        state.faults.remove(&Fault::StaleViewCursor);
        Ok(())
    }

    fn body_char_count(&self) -> Result<usize> {
        let state = self.state.lock();
        if state.closed {
            bail!("document is closed");
        }
        Ok(state.body.chars().count())
    }
}

impl FrameCreation for MemoryDocument {
    fn create_text_frame(&self, text: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check(Fault::FrameCreation)?;
        state.frames.push(text.to_string());
        Ok(())
    }
}

impl GraphicReplacement for MemoryDocument {
    fn replace_graphic(&self, selection: &SelectionHandle, text: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check(Fault::Replacement)?;
        let anchor = match &state.selection {
            Some(s) if &s.selection.handle == selection && s.selection.kind.is_picture() => s.anchor,
            _ => bail!("object '{}' is not the selected picture", selection),
        };
        state.selection = None;
        state.insert_at(anchor, text);
        Ok(())
    }
}

impl Clipboard for MemoryDocument {
    fn set_clipboard_text(&self, text: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.check(Fault::Clipboard)?;
        state.clipboard = Some(text.to_string());
        Ok(())
    }
}
