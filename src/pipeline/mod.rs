//! Pipeline Orchestrator
//!
//! Sequences resolution, recognition and writing for one invocation:
//!
//! ```text
//! Idle -> Resolving -> Recognizing -> Writing -> Done
//!                 \            \           \
//!                  +------------+-----------+--> Failed
//! ```
//!
//! A failing stage stops the run before anything is written. The resolved
//! image is owned by the run and removed on every exit path, panics from
//! host adapters included.

use serde::{Serialize, Serializer};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use crate::acquire::{ImageResolver, ImageSourceDescriptor, ResolutionError};
use crate::config::{AppConfig, EngineConfig};
use crate::host::HostDocument;
use crate::output::{OutputMode, OutputRequest, OutputWriter, WriteError, WriteFailureKind};
use crate::recognition::{
    AvailabilityCache, OcrEngine, OcrFailureKind, OcrInvoker, OcrOptions, RecognitionError,
    TesseractEngine,
};

/// Stage of one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Resolving,
    Recognizing,
    Writing,
    Done,
    Failed,
}

/// Any failure that ends a run
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Recognition(#[from] RecognitionError),
    #[error(transparent)]
    Write(#[from] WriteError),
    /// Export only produced a placeholder carrying this diagnostic
    #[error("picture export degraded: {0}")]
    ExportDegraded(String),
    #[error("unclassified failure: {0}")]
    Unclassified(String),
}

impl PipelineError {
    /// Stage that failed
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Resolution(_) | PipelineError::ExportDegraded(_) => "resolution",
            PipelineError::Recognition(_) => "recognition",
            PipelineError::Write(_) => "output",
            PipelineError::Unclassified(_) => "unknown",
        }
    }

    /// One message suitable for a dialog
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Resolution(e) => match e {
                ResolutionError::NoSelection => {
                    "Please select a picture in the document first.".to_string()
                }
                ResolutionError::UnsupportedObject(_) => {
                    "The selected object is not a picture.".to_string()
                }
                ResolutionError::ExportFailed(_) => "The selected picture could not be exported. \
                     Save it as a file and use OCR from file."
                    .to_string(),
                ResolutionError::FileNotFound(path) => {
                    format!("Image file not found: {}", path.display())
                }
                ResolutionError::UnsupportedFormat(_) => {
                    "This image format is not supported. Use PNG, JPEG, TIFF, BMP, GIF or WebP."
                        .to_string()
                }
                ResolutionError::TempStorage(detail) => {
                    format!("Temporary storage is not available: {}", detail)
                }
            },
            PipelineError::Recognition(e) => match e.kind {
                OcrFailureKind::EngineNotFound => format!(
                    "The OCR engine (Tesseract) was not found. \
                     Install it or set its path in Settings. {}",
                    e.message
                ),
                OcrFailureKind::EngineCrashed => format!("The OCR engine failed: {}", e.message),
                OcrFailureKind::UnsupportedLanguage => {
                    format!("The selected OCR language is not installed. {}", e.message)
                }
                OcrFailureKind::Timeout => {
                    format!("The OCR engine took too long and was stopped. {}", e.message)
                }
            },
            PipelineError::Write(e) => match e.kind {
                WriteFailureKind::InsertionImpossible => {
                    "The text could not be inserted into the document.".to_string()
                }
                WriteFailureKind::FrameCreationFailed => {
                    "A text box could not be created in the document.".to_string()
                }
                WriteFailureKind::NotReplaceable => {
                    "Only a picture that is still selected can be replaced with text.".to_string()
                }
                WriteFailureKind::ClipboardUnavailable => {
                    "The clipboard is not available.".to_string()
                }
            },
            PipelineError::ExportDegraded(diagnostic) => diagnostic.clone(),
            PipelineError::Unclassified(_) => {
                "An unexpected error occurred. See the log for details.".to_string()
            }
        }
    }
}

/// Message carried by a caught panic payload
pub(crate) fn panic_detail(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn serialize_error<S: Serializer>(error: &PipelineError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&error.to_string())
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Text was placed in the document
    Written {
        mode: OutputMode,
        chars: usize,
        route: &'static str,
    },
    /// The engine found no text; nothing was written
    NoTextFound,
    Failed(#[serde(serialize_with = "serialize_error")] PipelineError),
}

/// Everything known about a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub source: String,
    pub state: RunState,
    /// Every state entered, in order
    pub transitions: Vec<RunState>,
    /// Recognized text, when recognition succeeded
    pub text: Option<String>,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn is_done(&self) -> bool {
        self.state == RunState::Done
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match &self.outcome {
            RunOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Input of one run
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub source: ImageSourceDescriptor,
    pub options: OcrOptions,
    pub mode: OutputMode,
}

/// Builds the engine for the engine configuration of a run
pub type EngineFactory =
    Box<dyn Fn(&EngineConfig) -> Result<Arc<dyn OcrEngine>, RecognitionError> + Send + Sync>;

fn tesseract_factory(config: &EngineConfig) -> Result<Arc<dyn OcrEngine>, RecognitionError> {
    Ok(Arc::new(TesseractEngine::from_config(config)?))
}

struct RunTrace {
    transitions: Vec<RunState>,
    text: Option<String>,
}

impl RunTrace {
    fn enter(&mut self, state: RunState) {
        info!("-> {:?}", state);
        self.transitions.push(state);
    }
}

/// Runs the resolve, recognize, write sequence
pub struct Pipeline {
    resolver: ImageResolver,
    engine_factory: EngineFactory,
    availability: Arc<AvailabilityCache>,
    writer: OutputWriter,
}

impl Pipeline {
    /// Pipeline using the Tesseract engine and scratch space under `temp_dir`
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            resolver: ImageResolver::new(temp_dir),
            engine_factory: Box::new(tesseract_factory),
            availability: Arc::new(AvailabilityCache::new()),
            writer: OutputWriter::new(),
        }
    }

    pub fn with_engine_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&EngineConfig) -> Result<Arc<dyn OcrEngine>, RecognitionError> + Send + Sync + 'static,
    {
        self.engine_factory = Box::new(factory);
        self
    }

    pub fn with_writer(mut self, writer: OutputWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn with_availability(mut self, availability: Arc<AvailabilityCache>) -> Self {
        self.availability = availability;
        self
    }

    /// Shared engine availability cache
    pub fn availability(&self) -> &Arc<AvailabilityCache> {
        &self.availability
    }

    /// Engine for `config`, as the next run would use it
    pub fn engine(&self, config: &EngineConfig) -> Result<Arc<dyn OcrEngine>, RecognitionError> {
        (self.engine_factory)(config)
    }

    /// Execute one run to completion
    pub fn run(&self, host: &dyn HostDocument, request: &RunRequest, config: &AppConfig) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let source = request.source.label();
        let span = info_span!("ocr_run", run_id = %run_id, source = %source);
        let _enter = span.enter();

        let mut trace = RunTrace {
            transitions: vec![RunState::Idle],
            text: None,
        };

        let result = catch_unwind(AssertUnwindSafe(|| self.execute(host, request, config, &mut trace)));
        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!("Run failed in {}: {}", e.stage(), e);
                RunOutcome::Failed(e)
            }
            Err(panic) => {
                let detail = panic_detail(panic.as_ref());
                error!("Run aborted by a panic: {}", detail);
                RunOutcome::Failed(PipelineError::Unclassified(detail))
            }
        };

        let state = match outcome {
            RunOutcome::Failed(_) => RunState::Failed,
            _ => RunState::Done,
        };
        trace.enter(state);

        RunReport {
            run_id,
            source,
            state,
            transitions: trace.transitions,
            text: trace.text,
            outcome,
        }
    }

    fn execute(
        &self,
        host: &dyn HostDocument,
        request: &RunRequest,
        config: &AppConfig,
        trace: &mut RunTrace,
    ) -> Result<RunOutcome, PipelineError> {
        if request.mode.requires_selection() && !request.source.is_selection() {
            return Err(WriteError::new(
                WriteFailureKind::NotReplaceable,
                "text recognized from a file cannot replace a picture",
            )
            .into());
        }

        trace.enter(RunState::Resolving);
        let image = self.resolver.resolve(&request.source, host)?;
        if let Some(diagnostic) = image.diagnostic() {
            return Err(PipelineError::ExportDegraded(diagnostic.to_string()));
        }

        trace.enter(RunState::Recognizing);
        let engine = (self.engine_factory)(&config.engine)?;
        let invoker = OcrInvoker::new(engine.as_ref(), &self.availability, self.resolver.temp_dir());
        let recognition = invoker.invoke(&image, &request.options)?;
        drop(image);

        if recognition.text.is_empty() {
            info!("No text found in the image");
            return Ok(RunOutcome::NoTextFound);
        }
        trace.text = Some(recognition.text.clone());

        trace.enter(RunState::Writing);
        let output = OutputRequest {
            text: recognition.text,
            mode: request.mode,
            origin: request.source.selection().cloned(),
        };
        let chars = output.text.chars().count();
        let route = self.writer.write(&output, host).into_result()?;

        Ok(RunOutcome::Written {
            mode: request.mode,
            chars,
            route,
        })
    }
}
