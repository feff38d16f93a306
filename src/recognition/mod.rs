//! OCR Invoker
//!
//! Runs the external OCR engine on a resolved image and classifies whatever
//! goes wrong. Engine availability is checked against a process-wide cache
//! before any preprocessing or recognition work is done.

pub mod availability;
pub mod catalog;
pub mod preprocess;
pub mod tesseract;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::acquire::ResolvedImage;
use crate::config::{DEFAULT_LANGUAGE, DEFAULT_OEM, DEFAULT_PSM};

pub use availability::{AvailabilityCache, EngineAvailability};
pub use tesseract::{
    available_languages, check_engine_path, find_engine_executable, is_language_available,
    TesseractEngine,
};

/// Recognition options, fixed for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrOptions {
    /// Language code, `+`-joined for several languages
    pub language: String,
    /// Page segmentation mode (0-13)
    pub page_segmentation_mode: u8,
    /// Engine mode (0-3)
    pub engine_mode: u8,
    pub grayscale: bool,
    pub binarize: bool,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            page_segmentation_mode: DEFAULT_PSM,
            engine_mode: DEFAULT_OEM,
            grayscale: false,
            binarize: false,
        }
    }
}

impl OcrOptions {
    /// Individual language codes
    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.language.split('+').map(str::trim).filter(|l| !l.is_empty())
    }

    pub fn needs_preprocessing(&self) -> bool {
        self.grayscale || self.binarize
    }
}

/// Classified recognition failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OcrFailureKind {
    EngineNotFound,
    EngineCrashed,
    UnsupportedLanguage,
    Timeout,
}

impl fmt::Display for OcrFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OcrFailureKind::EngineNotFound => "OCR engine not found",
            OcrFailureKind::EngineCrashed => "OCR engine failed",
            OcrFailureKind::UnsupportedLanguage => "language not installed",
            OcrFailureKind::Timeout => "OCR engine timed out",
        };
        f.write_str(label)
    }
}

/// A recognition failure with the raw diagnostic from the engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct RecognitionError {
    pub kind: OcrFailureKind,
    pub message: String,
}

impl RecognitionError {
    pub fn new(kind: OcrFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn engine_not_found(message: impl Into<String>) -> Self {
        Self::new(OcrFailureKind::EngineNotFound, message)
    }
}

/// Text recognized in one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recognition {
    /// Trimmed text, possibly empty
    pub text: String,
    /// Mean word confidence, when the engine reports one
    pub confidence: Option<f32>,
}

pub type OcrResult = Result<Recognition, RecognitionError>;

/// An external OCR engine
pub trait OcrEngine {
    /// Executable this engine runs
    fn path(&self) -> &Path;
    /// First line of the engine's version banner
    fn probe_version(&self) -> Result<String, RecognitionError>;
    /// Raw text recognized in `image`
    fn recognize(&self, image: &Path, options: &OcrOptions) -> Result<String, RecognitionError>;
    /// Installed language codes, unsorted
    fn list_languages(&self) -> Result<Vec<String>, RecognitionError>;
}

/// `+`-joined codes of `[A-Za-z0-9_-]`; no part may be empty or read as an engine flag
fn valid_language_code(code: &str) -> bool {
    code.split('+').all(|part| {
        !part.is_empty()
            && !part.starts_with('-')
            && part.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
    })
}

/// Closest installed language to `requested`, if any is close enough
pub fn suggest_language(requested: &str, installed: &[String]) -> Option<String> {
    installed
        .iter()
        .filter(|lang| lang.as_str() != requested)
        .map(|lang| (strsim::jaro_winkler(requested, lang), lang))
        .filter(|(score, _)| *score >= 0.7)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, lang)| lang.clone())
}

/// Runs one recognition against a checked engine
pub struct OcrInvoker<'a> {
    engine: &'a dyn OcrEngine,
    availability: &'a AvailabilityCache,
    temp_dir: PathBuf,
}

impl<'a> OcrInvoker<'a> {
    pub fn new(
        engine: &'a dyn OcrEngine,
        availability: &'a AvailabilityCache,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            engine,
            availability,
            temp_dir: temp_dir.into(),
        }
    }

    /// Recognize the text in `image`; the image file itself is never modified
    pub fn invoke(&self, image: &ResolvedImage, options: &OcrOptions) -> OcrResult {
        let availability = self.availability.ensure(self.engine)?;
        debug!(
            "Using OCR engine {} ({})",
            availability.path.display(),
            availability.version
        );

        if !valid_language_code(&options.language) || options.languages().next().is_none() {
            return Err(RecognitionError::new(
                OcrFailureKind::UnsupportedLanguage,
                format!("'{}' is not a valid language code", options.language),
            ));
        }

        // Keep the preprocessed copy alive until recognition is done
        let prepared = match preprocess::prepare_for_recognition(image.path(), options, &self.temp_dir)
        {
            Ok(copy) => copy,
            Err(e) => {
                warn!("Preprocessing failed, recognizing the unprocessed image: {:#}", e);
                None
            }
        };
        let input: &Path = prepared.as_deref().unwrap_or_else(|| image.path());

        info!(
            "Recognizing {} (lang={}, psm={}, oem={})",
            input.display(),
            options.language,
            options.page_segmentation_mode,
            options.engine_mode
        );

        match self.engine.recognize(input, options) {
            Ok(raw) => {
                let text = raw.trim().to_string();
                info!("Recognized {} characters", text.chars().count());
                Ok(Recognition {
                    text,
                    confidence: None,
                })
            }
            Err(mut e) => {
                if e.kind == OcrFailureKind::UnsupportedLanguage {
                    self.add_language_hint(&mut e, options);
                }
                warn!("Recognition failed: {}", e);
                Err(e)
            }
        }
    }

    fn add_language_hint(&self, error: &mut RecognitionError, options: &OcrOptions) {
        let installed = available_languages(self.engine);
        let missing: Vec<&str> = options
            .languages()
            .filter(|lang| !installed.iter().any(|i| i == lang))
            .collect();

        for lang in missing {
            match suggest_language(lang, &installed) {
                Some(suggestion) => error.message.push_str(&format!(
                    "\n'{}' is not installed; did you mean '{}'?",
                    lang, suggestion
                )),
                None => error.message.push_str(&format!(
                    "\n'{}' is not installed (available: {})",
                    lang,
                    installed.join(", ")
                )),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::acquire::{ImageResolver, ImageSourceDescriptor};
    use crate::host::MemoryDocument;
    use image::{Rgb, RgbImage};
    use parking_lot::Mutex;

    /// Scripted engine recording every call
    pub(crate) struct FakeEngine {
        pub path: PathBuf,
        pub version: Result<String, RecognitionError>,
        pub output: Result<String, RecognitionError>,
        pub languages: Vec<String>,
        pub probes: Mutex<u32>,
        pub recognized: Mutex<Vec<PathBuf>>,
    }

    impl FakeEngine {
        pub(crate) fn returning(text: &str) -> Self {
            Self {
                path: PathBuf::from("/fake/tesseract"),
                version: Ok("tesseract 5.3.4".to_string()),
                output: Ok(text.to_string()),
                languages: vec!["eng".to_string(), "deu".to_string(), "osd".to_string()],
                probes: Mutex::new(0),
                recognized: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing(error: RecognitionError) -> Self {
            Self {
                output: Err(error),
                ..Self::returning("")
            }
        }

        pub(crate) fn missing() -> Self {
            Self {
                version: Err(RecognitionError::engine_not_found("No such file or directory")),
                ..Self::returning("")
            }
        }

        pub(crate) fn recognize_calls(&self) -> usize {
            self.recognized.lock().len()
        }
    }

    impl OcrEngine for FakeEngine {
        fn path(&self) -> &Path {
            &self.path
        }

        fn probe_version(&self) -> Result<String, RecognitionError> {
            *self.probes.lock() += 1;
            self.version.clone()
        }

        fn recognize(&self, image: &Path, _options: &OcrOptions) -> Result<String, RecognitionError> {
            assert!(image.exists(), "engine input must exist while recognizing");
            self.recognized.lock().push(image.to_path_buf());
            self.output.clone()
        }

        fn list_languages(&self) -> Result<Vec<String>, RecognitionError> {
            Ok(self.languages.clone())
        }
    }

    fn resolved_image(scratch: &Path) -> (tempfile::TempDir, ResolvedImage) {
        let inputs = tempfile::tempdir().unwrap();
        let path = inputs.path().join("page.png");
        RgbImage::from_fn(16, 16, |x, _| if x < 8 { Rgb([20, 20, 20]) } else { Rgb([240, 240, 240]) })
            .save(&path)
            .unwrap();
        let image = ImageResolver::new(scratch)
            .resolve(&ImageSourceDescriptor::FilePath(path), &MemoryDocument::new())
            .unwrap();
        (inputs, image)
    }

    #[test]
    fn test_invoke_trims_text() {
        let scratch = tempfile::tempdir().unwrap();
        let (_inputs, image) = resolved_image(scratch.path());
        let engine = FakeEngine::returning("  TOTAL: 42.00\n\n");
        let cache = AvailabilityCache::new();

        let result = OcrInvoker::new(&engine, &cache, scratch.path())
            .invoke(&image, &OcrOptions::default())
            .unwrap();
        assert_eq!(result.text, "TOTAL: 42.00");
        assert_eq!(result.confidence, None);
        assert_eq!(engine.recognized.lock()[0], image.path());
    }

    #[test]
    fn test_empty_text_is_success() {
        let scratch = tempfile::tempdir().unwrap();
        let (_inputs, image) = resolved_image(scratch.path());
        let engine = FakeEngine::returning(" \n ");
        let cache = AvailabilityCache::new();

        let result = OcrInvoker::new(&engine, &cache, scratch.path())
            .invoke(&image, &OcrOptions::default())
            .unwrap();
        assert!(result.text.is_empty());
    }

    #[test]
    fn test_missing_engine_skips_recognition() {
        let scratch = tempfile::tempdir().unwrap();
        let (_inputs, image) = resolved_image(scratch.path());
        let engine = FakeEngine::missing();
        let cache = AvailabilityCache::new();
        let options = OcrOptions {
            binarize: true,
            ..OcrOptions::default()
        };

        let err = OcrInvoker::new(&engine, &cache, scratch.path())
            .invoke(&image, &options)
            .unwrap_err();
        assert_eq!(err.kind, OcrFailureKind::EngineNotFound);
        assert_eq!(engine.recognize_calls(), 0);
        // only the resolved copy, no preprocessed file
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_preprocessing_uses_a_separate_copy() {
        let scratch = tempfile::tempdir().unwrap();
        let (_inputs, image) = resolved_image(scratch.path());
        let original = std::fs::read(image.path()).unwrap();
        let engine = FakeEngine::returning("text");
        let cache = AvailabilityCache::new();
        let options = OcrOptions {
            grayscale: true,
            binarize: true,
            ..OcrOptions::default()
        };

        OcrInvoker::new(&engine, &cache, scratch.path())
            .invoke(&image, &options)
            .unwrap();

        let used = engine.recognized.lock()[0].clone();
        assert_ne!(used, image.path());
        assert!(!used.exists());
        assert_eq!(std::fs::read(image.path()).unwrap(), original);
    }

    #[test]
    fn test_invalid_language_code() {
        let scratch = tempfile::tempdir().unwrap();
        let (_inputs, image) = resolved_image(scratch.path());
        let engine = FakeEngine::returning("text");
        let cache = AvailabilityCache::new();
        for code in ["eng; rm", "--version", "eng+-psm", "+eng", ""] {
            let options = OcrOptions {
                language: code.to_string(),
                ..OcrOptions::default()
            };
            let err = OcrInvoker::new(&engine, &cache, scratch.path())
                .invoke(&image, &options)
                .unwrap_err();
            assert_eq!(err.kind, OcrFailureKind::UnsupportedLanguage, "{:?}", code);
        }
        assert_eq!(engine.recognize_calls(), 0);
        assert!(valid_language_code("chi_sim+eng"));
        assert!(valid_language_code("sr-Latn"));
    }

    #[test]
    fn test_unsupported_language_suggests_installed_one() {
        let scratch = tempfile::tempdir().unwrap();
        let (_inputs, image) = resolved_image(scratch.path());
        let engine = FakeEngine::failing(RecognitionError::new(
            OcrFailureKind::UnsupportedLanguage,
            "Failed loading language 'deux'",
        ));
        let cache = AvailabilityCache::new();
        let options = OcrOptions {
            language: "deux".to_string(),
            ..OcrOptions::default()
        };

        let err = OcrInvoker::new(&engine, &cache, scratch.path())
            .invoke(&image, &options)
            .unwrap_err();
        assert_eq!(err.kind, OcrFailureKind::UnsupportedLanguage);
        assert!(err.message.starts_with("Failed loading language 'deux'"));
        assert!(err.message.contains("did you mean 'deu'"));
    }

    #[test]
    fn test_suggest_language() {
        let installed = vec!["eng".to_string(), "deu".to_string(), "chi_sim".to_string()];
        assert_eq!(suggest_language("engl", &installed).as_deref(), Some("eng"));
        assert_eq!(suggest_language("chi_sm", &installed).as_deref(), Some("chi_sim"));
        assert_eq!(suggest_language("xyz", &installed), None);
    }

    #[test]
    fn test_options_languages() {
        let options = OcrOptions {
            language: "deu+eng".to_string(),
            ..OcrOptions::default()
        };
        assert_eq!(options.languages().collect::<Vec<_>>(), vec!["deu", "eng"]);
        assert!(!options.needs_preprocessing());
    }
}
