//! Tesseract command-line engine
//!
//! Runs `<engine> <image> stdout -l <lang> --psm <n> --oem <n>` and maps
//! process failures onto [`OcrFailureKind`].

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::ffi::OsStr;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{OcrEngine, OcrFailureKind, OcrOptions, RecognitionError};
use crate::config::{EngineConfig, DEFAULT_LANGUAGE};

/// Executable name looked up on `PATH`
pub const ENGINE_EXECUTABLE: &str = "tesseract";
/// Limit for `--version` and `--list-langs`
pub const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long pipes may stay open once the engine has exited
const READ_GRACE: Duration = Duration::from_millis(500);

/// Places checked when the engine is not on `PATH`
#[cfg(windows)]
const STANDARD_LOCATIONS: &[&str] = &[
    r"C:\Program Files\Tesseract-OCR\tesseract.exe",
    r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe",
];
#[cfg(not(windows))]
const STANDARD_LOCATIONS: &[&str] = &[
    "/usr/local/bin/tesseract",
    "/opt/homebrew/bin/tesseract",
    "/usr/bin/tesseract",
];

/// Stderr fragments the engine prints when traineddata is missing
const LANGUAGE_FAILURE_MARKERS: &[&str] = &[
    "Failed loading language",
    "couldn't load any languages",
    "Error opening data file",
];

/// Tesseract invoked as a child process
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    path: PathBuf,
    timeout: Duration,
}

impl TesseractEngine {
    pub fn new(path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }

    /// Engine for the configured path, or the discovered one when unset
    ///
    /// A configured path is used as-is; an invalid one is reported rather
    /// than replaced by a discovered engine.
    pub fn from_config(config: &EngineConfig) -> Result<Self, RecognitionError> {
        let timeout = Duration::from_secs(config.recognition_timeout_secs.max(1));
        match &config.path {
            Some(path) => Ok(Self::new(path, timeout)),
            None => find_engine_executable(None)
                .map(|path| Self::new(path, timeout))
                .ok_or_else(|| {
                    RecognitionError::engine_not_found(format!(
                        "{} was not found on PATH or in the standard locations",
                        ENGINE_EXECUTABLE
                    ))
                }),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl OcrEngine for TesseractEngine {
    fn path(&self) -> &Path {
        &self.path
    }

    fn probe_version(&self) -> Result<String, RecognitionError> {
        if !self.path.is_file() {
            return Err(RecognitionError::engine_not_found(format!(
                "file not found: {}",
                self.path.display()
            )));
        }

        let output = run_with_timeout(&self.path, ["--version"], VERSION_PROBE_TIMEOUT)
            .map_err(|e| RecognitionError::engine_not_found(e.message))?;
        if !output.status.success() {
            return Err(RecognitionError::engine_not_found(format!(
                "--version exited with {}: {}",
                output.status,
                output.stderr.trim()
            )));
        }

        // Older releases print the banner on stderr
        let banner = first_line(&output.stdout)
            .or_else(|| first_line(&output.stderr))
            .unwrap_or("Version info unavailable");
        Ok(banner.to_string())
    }

    fn recognize(&self, image: &Path, options: &OcrOptions) -> Result<String, RecognitionError> {
        let psm = options.page_segmentation_mode.to_string();
        let oem = options.engine_mode.to_string();
        let args: [&OsStr; 8] = [
            image.as_os_str(),
            OsStr::new("stdout"),
            OsStr::new("-l"),
            OsStr::new(&options.language),
            OsStr::new("--psm"),
            OsStr::new(&psm),
            OsStr::new("--oem"),
            OsStr::new(&oem),
        ];

        let output = run_with_timeout(&self.path, args, self.timeout)?;
        if output.status.success() {
            if !output.stderr.trim().is_empty() {
                debug!("Engine diagnostics: {}", output.stderr.trim());
            }
            return Ok(output.stdout);
        }
        Err(classify_exit(output.status, &output.stderr))
    }

    fn list_languages(&self) -> Result<Vec<String>, RecognitionError> {
        let output = run_with_timeout(&self.path, ["--list-langs"], VERSION_PROBE_TIMEOUT)?;
        if !output.status.success() {
            return Err(classify_exit(output.status, &output.stderr));
        }

        let listing = if output.stdout.trim().is_empty() {
            &output.stderr
        } else {
            &output.stdout
        };
        Ok(listing
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with("List of available languages"))
            .map(str::to_string)
            .collect())
    }
}

fn first_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).find(|line| !line.is_empty())
}

/// Captured output of a finished child
#[derive(Debug)]
struct ProcessOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

/// Output read so far from one child pipe
struct PipeReader {
    buf: Arc<Mutex<Vec<u8>>>,
    eof: Receiver<()>,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<PipeReader> {
    pipe.map(|mut pipe| {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let (eof_tx, eof) = bounded(1);
        let sink = Arc::clone(&buf);
        thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            let _ = eof_tx.send(());
        });
        PipeReader { buf, eof }
    })
}

/// Take what `reader` has read, waiting for end of file until `deadline`
///
/// A pipe inherited by a still-running descendant never reaches end of file;
/// whatever arrived before the deadline is returned and the reader is abandoned.
fn collect(reader: Option<PipeReader>, deadline: Instant) -> String {
    let Some(reader) = reader else {
        return String::new();
    };
    if let Err(RecvTimeoutError::Timeout) = reader.eof.recv_deadline(deadline) {
        warn!("Engine output pipe still open after exit, using the output read so far");
    }
    let buf = std::mem::take(&mut *reader.buf.lock());
    String::from_utf8_lossy(&buf).into_owned()
}

/// Run `program` and wait at most `timeout` for it to exit
fn run_with_timeout<I, S>(program: &Path, args: I, timeout: Duration) -> Result<ProcessOutput, RecognitionError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                RecognitionError::engine_not_found(format!("{}: {}", program.display(), e))
            }
            _ => RecognitionError::new(
                OcrFailureKind::EngineCrashed,
                format!("failed to start {}: {}", program.display(), e),
            ),
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let deadline = Instant::now() + timeout;

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                warn!("{} did not finish within {:?}, killing it", program.display(), timeout);
                let _ = child.kill();
                let _ = child.wait();
                // Reader threads are left to finish on their own
                return Err(RecognitionError::new(
                    OcrFailureKind::Timeout,
                    format!("{} did not finish within {} s", program.display(), timeout.as_secs_f32()),
                ));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                return Err(RecognitionError::new(
                    OcrFailureKind::EngineCrashed,
                    format!("failed to wait for {}: {}", program.display(), e),
                ));
            }
        }
    };

    let read_deadline = Instant::now() + READ_GRACE;
    Ok(ProcessOutput {
        status,
        stdout: collect(stdout, read_deadline),
        stderr: collect(stderr, read_deadline),
    })
}

fn classify_exit(status: ExitStatus, stderr: &str) -> RecognitionError {
    let diagnostic = stderr.trim();
    if LANGUAGE_FAILURE_MARKERS.iter().any(|marker| diagnostic.contains(marker)) {
        return RecognitionError::new(OcrFailureKind::UnsupportedLanguage, diagnostic);
    }
    let message = if diagnostic.is_empty() {
        format!("engine exited with {}", status)
    } else {
        format!("engine exited with {}: {}", status, diagnostic)
    };
    RecognitionError::new(OcrFailureKind::EngineCrashed, message)
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

/// Locate the engine executable
///
/// A configured path is returned only if it is executable. Without one,
/// `PATH` is searched first, then the standard install locations.
pub fn find_engine_executable(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        return is_executable(path).then(|| path.to_path_buf());
    }

    if let Ok(path) = which::which(ENGINE_EXECUTABLE) {
        debug!("Found {} on PATH: {}", ENGINE_EXECUTABLE, path.display());
        return Some(path);
    }

    let found = STANDARD_LOCATIONS
        .iter()
        .map(PathBuf::from)
        .find(|path| is_executable(path));
    match &found {
        Some(path) => debug!("Found {} at {}", ENGINE_EXECUTABLE, path.display()),
        None => warn!("{} not found in any known location", ENGINE_EXECUTABLE),
    }
    found
}

/// Check that `path` is a working engine and return its version banner
pub fn check_engine_path(path: &Path) -> Result<String, RecognitionError> {
    TesseractEngine::new(path, VERSION_PROBE_TIMEOUT).probe_version()
}

/// Installed languages, sorted with English first; `["eng"]` when unknown
pub fn available_languages(engine: &dyn OcrEngine) -> Vec<String> {
    let mut languages = match engine.list_languages() {
        Ok(languages) => languages,
        Err(e) => {
            warn!("Could not list installed languages: {}", e);
            Vec::new()
        }
    };
    languages.retain(|lang| !lang.trim().is_empty());
    languages.sort();
    languages.dedup();

    if let Some(pos) = languages.iter().position(|lang| lang == DEFAULT_LANGUAGE) {
        let eng = languages.remove(pos);
        languages.insert(0, eng);
    }
    if languages.is_empty() {
        languages.push(DEFAULT_LANGUAGE.to_string());
    }
    languages
}

/// True when every `+`-joined code in `code` is installed
pub fn is_language_available(engine: &dyn OcrEngine, code: &str) -> bool {
    let installed = available_languages(engine);
    let mut parts = code.split('+').map(str::trim).filter(|p| !p.is_empty()).peekable();
    parts.peek().is_some() && parts.all(|part| installed.iter().any(|lang| lang == part))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::tests::FakeEngine;

    #[test]
    fn test_classify_language_failure() {
        let status = exit_status(1);
        let err = classify_exit(status, "Error opening data file /usr/share/tessdata/xx.traineddata\nFailed loading language 'xx'\n");
        assert_eq!(err.kind, OcrFailureKind::UnsupportedLanguage);
        assert!(err.message.contains("Failed loading language 'xx'"));

        let err = classify_exit(exit_status(1), "Segmentation fault");
        assert_eq!(err.kind, OcrFailureKind::EngineCrashed);
        assert!(err.message.contains("Segmentation fault"));
    }

    #[test]
    fn test_configured_path_is_authoritative() {
        let config = EngineConfig {
            path: Some(PathBuf::from("/nonexistent/tesseract")),
            ..EngineConfig::default()
        };
        let engine = TesseractEngine::from_config(&config).unwrap();
        assert_eq!(engine.path(), Path::new("/nonexistent/tesseract"));
        assert_eq!(engine.timeout(), Duration::from_secs(120));

        let err = engine.probe_version().unwrap_err();
        assert_eq!(err.kind, OcrFailureKind::EngineNotFound);
        assert_eq!(find_engine_executable(Some(Path::new("/nonexistent/tesseract"))), None);
    }

    #[test]
    fn test_check_engine_path_missing_file() {
        let err = check_engine_path(Path::new("/nonexistent/tesseract")).unwrap_err();
        assert_eq!(err.kind, OcrFailureKind::EngineNotFound);
        assert!(err.message.contains("file not found"));
    }

    #[test]
    fn test_available_languages_puts_english_first() {
        let mut engine = FakeEngine::returning("");
        engine.languages = vec!["osd".into(), "deu".into(), "eng".into(), "".into(), "afr".into()];
        assert_eq!(available_languages(&engine), vec!["eng", "afr", "deu", "osd"]);

        engine.languages = Vec::new();
        assert_eq!(available_languages(&engine), vec!["eng"]);
    }

    #[test]
    fn test_is_language_available() {
        let engine = FakeEngine::returning("");
        assert!(is_language_available(&engine, "eng"));
        assert!(is_language_available(&engine, "deu+eng"));
        assert!(!is_language_available(&engine, "deu+fra"));
        assert!(!is_language_available(&engine, ""));
    }

    #[cfg(unix)]
    fn exit_status(code: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }

    #[cfg(windows)]
    fn exit_status(code: i32) -> ExitStatus {
        use std::os::windows::process::ExitStatusExt;
        ExitStatus::from_raw(code as u32)
    }

    #[cfg(unix)]
    mod scripted {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// Write an executable shell script standing in for the engine
        fn script(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-tesseract");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[test]
        fn test_probe_version_reads_first_line() {
            let dir = tempfile::tempdir().unwrap();
            let path = script(dir.path(), "echo 'tesseract 5.3.4'\necho ' leptonica-1.84.1'");
            assert_eq!(check_engine_path(&path).unwrap(), "tesseract 5.3.4");
            assert_eq!(find_engine_executable(Some(path.as_path())), Some(path.clone()));
        }

        #[test]
        fn test_probe_version_on_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let path = script(dir.path(), "echo 'tesseract 3.05.02' >&2");
            assert_eq!(check_engine_path(&path).unwrap(), "tesseract 3.05.02");
        }

        #[test]
        fn test_non_executable_file() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("tesseract");
            std::fs::write(&path, "not a program").unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

            assert_eq!(find_engine_executable(Some(path.as_path())), None);
            let err = check_engine_path(&path).unwrap_err();
            assert_eq!(err.kind, OcrFailureKind::EngineNotFound);
        }

        #[test]
        fn test_recognize_passes_arguments() {
            let dir = tempfile::tempdir().unwrap();
            let path = script(dir.path(), "echo \"$@\"");
            let engine = TesseractEngine::new(&path, Duration::from_secs(10));
            let options = OcrOptions {
                language: "deu+eng".to_string(),
                page_segmentation_mode: 6,
                engine_mode: 1,
                ..OcrOptions::default()
            };

            let out = engine.recognize(Path::new("/tmp/page.png"), &options).unwrap();
            assert_eq!(out.trim(), "/tmp/page.png stdout -l deu+eng --psm 6 --oem 1");
        }

        #[test]
        fn test_recognize_missing_language() {
            let dir = tempfile::tempdir().unwrap();
            let path = script(
                dir.path(),
                "echo \"Failed loading language 'xx'\" >&2\necho 'Tesseract couldn'\"'\"'t load any languages!' >&2\nexit 1",
            );
            let engine = TesseractEngine::new(&path, Duration::from_secs(10));
            let err = engine
                .recognize(Path::new("/tmp/page.png"), &OcrOptions::default())
                .unwrap_err();
            assert_eq!(err.kind, OcrFailureKind::UnsupportedLanguage);
        }

        #[test]
        fn test_recognize_crash() {
            let dir = tempfile::tempdir().unwrap();
            let path = script(dir.path(), "echo 'Error in pixReadStream' >&2\nexit 134");
            let engine = TesseractEngine::new(&path, Duration::from_secs(10));
            let err = engine
                .recognize(Path::new("/tmp/page.png"), &OcrOptions::default())
                .unwrap_err();
            assert_eq!(err.kind, OcrFailureKind::EngineCrashed);
            assert!(err.message.contains("pixReadStream"));
        }

        #[test]
        fn test_recognize_timeout() {
            let dir = tempfile::tempdir().unwrap();
            let path = script(dir.path(), "exec sleep 5");
            let engine = TesseractEngine::new(&path, Duration::from_millis(200));

            let started = Instant::now();
            let err = engine
                .recognize(Path::new("/tmp/page.png"), &OcrOptions::default())
                .unwrap_err();
            assert_eq!(err.kind, OcrFailureKind::Timeout);
            assert!(started.elapsed() < Duration::from_secs(4));
        }

        #[test]
        fn test_output_returned_while_descendant_holds_pipe() {
            let dir = tempfile::tempdir().unwrap();
            let path = script(dir.path(), "echo 'tesseract text'\nsleep 5 &");
            let engine = TesseractEngine::new(&path, Duration::from_secs(10));

            let started = Instant::now();
            let out = engine
                .recognize(Path::new("/tmp/page.png"), &OcrOptions::default())
                .unwrap();
            assert_eq!(out.trim(), "tesseract text");
            assert!(started.elapsed() < Duration::from_secs(3));
        }

        #[test]
        fn test_list_languages_skips_header() {
            let dir = tempfile::tempdir().unwrap();
            let path = script(
                dir.path(),
                "echo 'List of available languages in \"/usr/share/tessdata/\" (3):'\necho osd\necho eng\necho fra",
            );
            let engine = TesseractEngine::new(&path, Duration::from_secs(10));
            assert_eq!(available_languages(&engine), vec!["eng", "fra", "osd"]);
            assert!(is_language_available(&engine, "fra"));
        }
    }
}
