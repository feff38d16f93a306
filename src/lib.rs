//! picture-ocr - text extraction for document pictures
//!
//! Takes the picture selected in a document-editing host, or an image file,
//! runs it through an external Tesseract-compatible OCR engine and writes the
//! recognized text back into the document.
//!
//! The pipeline is built from four pieces:
//! - [`acquire`] turns a selection or file into a temporary image file
//! - [`recognition`] runs the engine and classifies its failures
//! - [`output`] places the text at the cursor, in a text box, over the picture or on the clipboard
//! - [`pipeline`] sequences them, and [`commands`] maps host commands onto runs
//!
//! Host access goes through the capability traits in [`host`]; an in-memory
//! implementation backs the command line front end and the tests.

pub mod acquire;
pub mod commands;
pub mod config;
pub mod fallback;
pub mod host;
pub mod output;
pub mod pipeline;
pub mod recognition;
pub mod storage;

pub use acquire::{ImageResolver, ImageSourceDescriptor, ResolutionError, ResolvedImage};
pub use commands::{CommandId, CommandResult, CommandRouter, Severity, UiPrompt};
pub use config::{AppConfig, ConfigKey, ConfigStore, FileConfigStore};
pub use host::{HostDocument, MemoryDocument, SelectionHandle};
pub use output::{OutputMode, OutputRequest, OutputWriter, WriteError, WriteFailureKind, WriteOutcome};
pub use pipeline::{Pipeline, PipelineError, RunOutcome, RunReport, RunRequest, RunState};
pub use recognition::{
    OcrEngine, OcrFailureKind, OcrInvoker, OcrOptions, OcrResult, Recognition, RecognitionError,
    TesseractEngine,
};
