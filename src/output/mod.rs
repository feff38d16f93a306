//! Output Writer
//!
//! Places recognized text into the host document. Cursor insertion goes
//! through an ordered list of strategies because the host's cursor objects
//! are the least reliable part of its API.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fallback::{first_success, Strategy};
use crate::host::{HostDocument, SelectionHandle};

/// Pause after re-focusing the document window before retrying
pub const FOCUS_SETTLE: Duration = Duration::from_millis(250);

/// Where recognized text goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputMode {
    #[serde(rename = "at_cursor")]
    InsertAtCursor,
    #[serde(rename = "new_textbox")]
    NewTextBox,
    #[serde(rename = "replace_image")]
    ReplaceSelection,
    #[serde(rename = "to_clipboard")]
    CopyToClipboard,
}

impl OutputMode {
    pub const ALL: [OutputMode; 4] = [
        OutputMode::InsertAtCursor,
        OutputMode::NewTextBox,
        OutputMode::ReplaceSelection,
        OutputMode::CopyToClipboard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputMode::InsertAtCursor => "at_cursor",
            OutputMode::NewTextBox => "new_textbox",
            OutputMode::ReplaceSelection => "replace_image",
            OutputMode::CopyToClipboard => "to_clipboard",
        }
    }

    /// Only valid for text recognized from a selected picture
    pub fn requires_selection(&self) -> bool {
        matches!(self, OutputMode::ReplaceSelection)
    }
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "at_cursor" | "cursor" => Ok(OutputMode::InsertAtCursor),
            "new_textbox" | "textbox" => Ok(OutputMode::NewTextBox),
            "replace_image" | "replace" => Ok(OutputMode::ReplaceSelection),
            "to_clipboard" | "clipboard" => Ok(OutputMode::CopyToClipboard),
            other => Err(format!("unknown output mode '{}'", other)),
        }
    }
}

/// Text to place, where to place it, and the selection it came from
#[derive(Debug, Clone)]
pub struct OutputRequest {
    pub text: String,
    pub mode: OutputMode,
    /// Picture the text was recognized from; required by `ReplaceSelection`
    pub origin: Option<SelectionHandle>,
}

/// Classified write failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WriteFailureKind {
    InsertionImpossible,
    FrameCreationFailed,
    NotReplaceable,
    ClipboardUnavailable,
}

impl fmt::Display for WriteFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WriteFailureKind::InsertionImpossible => "text could not be inserted",
            WriteFailureKind::FrameCreationFailed => "text box could not be created",
            WriteFailureKind::NotReplaceable => "picture cannot be replaced",
            WriteFailureKind::ClipboardUnavailable => "clipboard unavailable",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct WriteError {
    pub kind: WriteFailureKind,
    pub message: String,
}

impl WriteError {
    pub fn new(kind: WriteFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Result of one write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Text was placed; `route` names the mechanism that did it
    Success { route: &'static str },
    Failure(WriteError),
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, WriteOutcome::Success { .. })
    }

    pub fn into_result(self) -> Result<&'static str, WriteError> {
        match self {
            WriteOutcome::Success { route } => Ok(route),
            WriteOutcome::Failure(e) => Err(e),
        }
    }
}

struct InsertContext<'a> {
    host: &'a dyn HostDocument,
    text: &'a str,
    settle: Duration,
}

/// Run `insert` and require the body to have grown
fn observed(ctx: &InsertContext<'_>, insert: impl FnOnce() -> Result<()>) -> Result<()> {
    let before = ctx.host.body_char_count()?;
    insert()?;
    let after = ctx.host.body_char_count()?;
    if after == before && !ctx.text.is_empty() {
        bail!("insertion reported success but the document did not change");
    }
    Ok(())
}

fn insert_view_cursor(ctx: &InsertContext<'_>) -> Result<()> {
    observed(ctx, || ctx.host.insert_at_view_cursor(ctx.text))
}

fn insert_body_end(ctx: &InsertContext<'_>) -> Result<()> {
    observed(ctx, || ctx.host.insert_at_body_end(ctx.text))
}

fn insert_raw_string(ctx: &InsertContext<'_>) -> Result<()> {
    observed(ctx, || ctx.host.insert_string(ctx.text))
}

fn refocus_and_retry(ctx: &InsertContext<'_>) -> Result<()> {
    ctx.host.focus_window()?;
    std::thread::sleep(ctx.settle);
    insert_view_cursor(ctx)
}

fn insertion_strategies<'a>() -> [Strategy<InsertContext<'a>, ()>; 4] {
    [
        Strategy::new("view-cursor", insert_view_cursor),
        Strategy::new("body-end-cursor", insert_body_end),
        Strategy::new("insert-string", insert_raw_string),
        Strategy::new("refocus-view-cursor", refocus_and_retry),
    ]
}

/// Writes text into a host document
#[derive(Debug, Clone)]
pub struct OutputWriter {
    settle: Duration,
}

impl Default for OutputWriter {
    fn default() -> Self {
        Self {
            settle: FOCUS_SETTLE,
        }
    }
}

impl OutputWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the pause used by the refocus strategy
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Place `request.text` according to `request.mode`
    pub fn write(&self, request: &OutputRequest, host: &dyn HostDocument) -> WriteOutcome {
        debug!(
            "Writing {} characters with mode {}",
            request.text.chars().count(),
            request.mode
        );
        let result = match request.mode {
            OutputMode::InsertAtCursor => self.insert_at_cursor(request, host),
            OutputMode::NewTextBox => host
                .create_text_frame(&request.text)
                .map(|_| "text-frame")
                .map_err(|e| WriteError::new(WriteFailureKind::FrameCreationFailed, format!("{:#}", e))),
            OutputMode::ReplaceSelection => self.replace_selection(request, host),
            OutputMode::CopyToClipboard => host
                .set_clipboard_text(&request.text)
                .map(|_| "clipboard")
                .map_err(|e| WriteError::new(WriteFailureKind::ClipboardUnavailable, format!("{:#}", e))),
        };

        match result {
            Ok(route) => {
                info!("Text written via {}", route);
                WriteOutcome::Success { route }
            }
            Err(e) => {
                warn!("Write failed: {}", e);
                WriteOutcome::Failure(e)
            }
        }
    }

    fn insert_at_cursor(
        &self,
        request: &OutputRequest,
        host: &dyn HostDocument,
    ) -> Result<&'static str, WriteError> {
        let ctx = InsertContext {
            host,
            text: &request.text,
            settle: self.settle,
        };
        let strategies = insertion_strategies();
        first_success("insert", &ctx, &strategies)
            .map(|success| success.strategy)
            .map_err(|exhausted| {
                WriteError::new(WriteFailureKind::InsertionImpossible, exhausted.to_string())
            })
    }

    fn replace_selection(
        &self,
        request: &OutputRequest,
        host: &dyn HostDocument,
    ) -> Result<&'static str, WriteError> {
        let not_replaceable = |message: String| WriteError::new(WriteFailureKind::NotReplaceable, message);

        let origin = request
            .origin
            .as_ref()
            .ok_or_else(|| not_replaceable("text did not come from a selected picture".to_string()))?;

        let current = host
            .current_selection()
            .map_err(|e| not_replaceable(format!("selection unavailable: {:#}", e)))?;
        match current {
            Some(selection) if &selection.handle == origin && selection.kind.is_picture() => {}
            Some(selection) => {
                return Err(not_replaceable(format!(
                    "selection changed to {} since recognition started",
                    selection.handle
                )))
            }
            None => return Err(not_replaceable("the picture is no longer selected".to_string())),
        }

        host.replace_graphic(origin, &request.text)
            .map_err(|e| not_replaceable(format!("{:#}", e)))?;
        Ok("replace-graphic")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Fault, MemoryDocument};

    fn writer() -> OutputWriter {
        OutputWriter::new().with_settle(Duration::from_millis(1))
    }

    fn request(text: &str, mode: OutputMode) -> OutputRequest {
        OutputRequest {
            text: text.to_string(),
            mode,
            origin: None,
        }
    }

    #[test]
    fn test_output_mode_names() {
        for mode in OutputMode::ALL {
            assert_eq!(mode.as_str().parse::<OutputMode>().unwrap(), mode);
        }
        assert_eq!("clipboard".parse::<OutputMode>().unwrap(), OutputMode::CopyToClipboard);
        assert!("sideways".parse::<OutputMode>().is_err());
        assert_eq!(
            serde_json::to_string(&OutputMode::ReplaceSelection).unwrap(),
            "\"replace_image\""
        );
        assert!(OutputMode::ReplaceSelection.requires_selection());
        assert!(!OutputMode::NewTextBox.requires_selection());
    }

    #[test]
    fn test_insert_at_view_cursor() {
        let host = MemoryDocument::with_text("Hello world");
        host.set_cursor(6);

        let outcome = writer().write(&request("big ", OutputMode::InsertAtCursor), &host);
        assert_eq!(outcome, WriteOutcome::Success { route: "view-cursor" });
        assert_eq!(host.text(), "Hello big world");
    }

    #[test]
    fn test_silent_cursor_falls_back_to_body_end() {
        let host = MemoryDocument::with_text("Header");
        host.set_cursor(0);
        host.inject(Fault::SilentViewCursor);

        let outcome = writer().write(&request(" TOTAL", OutputMode::InsertAtCursor), &host);
        assert_eq!(outcome, WriteOutcome::Success { route: "body-end-cursor" });
        assert_eq!(host.text(), "Header TOTAL");
    }

    #[test]
    fn test_insert_string_fallback() {
        let host = MemoryDocument::with_text("ab");
        host.set_cursor(1);
        host.inject(Fault::ViewCursor);
        host.inject(Fault::BodyCursor);

        let outcome = writer().write(&request("X", OutputMode::InsertAtCursor), &host);
        assert_eq!(outcome, WriteOutcome::Success { route: "insert-string" });
        assert_eq!(host.text(), "aXb");
    }

    #[test]
    fn test_refocus_recovers_stale_cursor() {
        let host = MemoryDocument::with_text("");
        host.inject(Fault::StaleViewCursor);
        host.inject(Fault::BodyCursor);
        host.inject(Fault::InsertString);

        let outcome = writer().write(&request("recovered", OutputMode::InsertAtCursor), &host);
        assert_eq!(outcome, WriteOutcome::Success { route: "refocus-view-cursor" });
        assert_eq!(host.text(), "recovered");
        assert_eq!(host.focus_requests(), 1);
    }

    #[test]
    fn test_insertion_impossible() {
        let host = MemoryDocument::with_text("unchanged");
        host.inject(Fault::ViewCursor);
        host.inject(Fault::BodyCursor);
        host.inject(Fault::InsertString);

        let outcome = writer().write(&request("text", OutputMode::InsertAtCursor), &host);
        match outcome {
            WriteOutcome::Failure(e) => {
                assert_eq!(e.kind, WriteFailureKind::InsertionImpossible);
                assert!(e.message.contains("all 4 strategies failed"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(host.text(), "unchanged");
    }

    #[test]
    fn test_new_text_box() {
        let host = MemoryDocument::new();
        let outcome = writer().write(&request("framed", OutputMode::NewTextBox), &host);
        assert!(outcome.is_success());
        assert_eq!(host.frames(), vec!["framed".to_string()]);

        host.inject(Fault::FrameCreation);
        let err = writer()
            .write(&request("again", OutputMode::NewTextBox), &host)
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind, WriteFailureKind::FrameCreationFailed);
        assert_eq!(host.frames().len(), 1);
    }

    #[test]
    fn test_clipboard() {
        let host = MemoryDocument::with_text("body");
        let outcome = writer().write(&request("copied", OutputMode::CopyToClipboard), &host);
        assert!(outcome.is_success());
        assert_eq!(host.clipboard().as_deref(), Some("copied"));
        assert_eq!(host.text(), "body");

        host.inject(Fault::Clipboard);
        let err = writer()
            .write(&request("again", OutputMode::CopyToClipboard), &host)
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind, WriteFailureKind::ClipboardUnavailable);
    }

    #[test]
    fn test_replace_selection() {
        let host = MemoryDocument::with_text("before after");
        host.set_cursor(7);
        let handle = host.select_picture(vec![1, 2, 3]);

        let outcome = writer().write(
            &OutputRequest {
                text: "TEXT ".to_string(),
                mode: OutputMode::ReplaceSelection,
                origin: Some(handle),
            },
            &host,
        );
        assert_eq!(outcome, WriteOutcome::Success { route: "replace-graphic" });
        assert_eq!(host.text(), "before TEXT after");
    }

    #[test]
    fn test_replace_requires_same_selection() {
        let host = MemoryDocument::new();
        let original = host.select_picture(vec![1]);
        host.select_picture(vec![2]);

        let err = writer()
            .write(
                &OutputRequest {
                    text: "x".to_string(),
                    mode: OutputMode::ReplaceSelection,
                    origin: Some(original),
                },
                &host,
            )
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind, WriteFailureKind::NotReplaceable);

        let err = writer()
            .write(&request("x", OutputMode::ReplaceSelection), &host)
            .into_result()
            .unwrap_err();
        assert_eq!(err.kind, WriteFailureKind::NotReplaceable);
    }
}
