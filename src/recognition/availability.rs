//! Process-wide record of whether the configured engine works

use parking_lot::RwLock;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{OcrEngine, RecognitionError};

/// Result of probing one engine executable
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineAvailability {
    pub path: PathBuf,
    pub version: String,
    pub working: bool,
}

/// Cached availability of the last probed engine
///
/// Only a working engine short-circuits the probe; a failed probe is
/// repeated on the next run so a freshly installed engine is picked up.
#[derive(Debug, Default)]
pub struct AvailabilityCache {
    entry: RwLock<Option<EngineAvailability>>,
}

impl AvailabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached entry for `path`
    pub fn get(&self, path: &Path) -> Option<EngineAvailability> {
        self.entry
            .read()
            .as_ref()
            .filter(|entry| entry.path == path)
            .cloned()
    }

    pub fn store(&self, availability: EngineAvailability) {
        *self.entry.write() = Some(availability);
    }

    /// Forget the cached entry, e.g. after the engine path changed
    pub fn invalidate(&self) {
        if self.entry.write().take().is_some() {
            debug!("Engine availability cache invalidated");
        }
    }

    /// Return a working availability for `engine`, probing it if needed
    pub fn ensure(&self, engine: &dyn OcrEngine) -> Result<EngineAvailability, RecognitionError> {
        if let Some(cached) = self.get(engine.path()).filter(|entry| entry.working) {
            return Ok(cached);
        }

        match engine.probe_version() {
            Ok(version) => {
                info!("OCR engine {} is {}", engine.path().display(), version);
                let availability = EngineAvailability {
                    path: engine.path().to_path_buf(),
                    version,
                    working: true,
                };
                self.store(availability.clone());
                Ok(availability)
            }
            Err(e) => {
                warn!("OCR engine {} is not usable: {}", engine.path().display(), e.message);
                self.store(EngineAvailability {
                    path: engine.path().to_path_buf(),
                    version: String::new(),
                    working: false,
                });
                Err(RecognitionError::engine_not_found(format!(
                    "{}: {}",
                    engine.path().display(),
                    e.message
                )))
            }
        }
    }
}
