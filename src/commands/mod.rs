//! Command Router Adapter
//!
//! Maps host command identifiers onto pipeline runs and answers the host's
//! enablement queries. Configuration is read fresh on every invocation.

use serde::Serialize;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::acquire::ImageSourceDescriptor;
use crate::config::store::write_key;
use crate::config::{AppConfig, ConfigKey, ConfigStore, DEFAULT_LANGUAGE};
use crate::host::HostDocument;
use crate::output::OutputMode;
use crate::pipeline::{panic_detail, Pipeline, RunOutcome, RunReport, RunRequest};
use crate::recognition::{available_languages, find_engine_executable, OcrOptions};

/// Commands the host can dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CommandId {
    OcrSelectedImage,
    OcrImageFromFile,
    Settings,
    /// Selection when a picture is selected, file otherwise
    ToolbarAction,
}

impl CommandId {
    pub const ALL: [CommandId; 4] = [
        CommandId::OcrSelectedImage,
        CommandId::OcrImageFromFile,
        CommandId::Settings,
        CommandId::ToolbarAction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandId::OcrSelectedImage => "OCRSelectedImage",
            CommandId::OcrImageFromFile => "OCRImageFromFile",
            CommandId::Settings => "Settings",
            CommandId::ToolbarAction => "ToolbarAction",
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown command '{0}'")]
pub struct UnknownCommand(pub String);

impl FromStr for CommandId {
    type Err = UnknownCommand;

    /// Accepts bare names and dispatch URLs such as `uno:org.example.Ocr.Settings`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let path = trimmed
            .strip_prefix(".uno:")
            .or_else(|| trimmed.strip_prefix("uno:"))
            .unwrap_or(trimmed);
        let name = path.rsplit('.').next().unwrap_or(path);

        CommandId::ALL
            .into_iter()
            .find(|command| command.as_str() == name)
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}

/// Message severity for outcome reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Recognition options together with the output mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrChoice {
    pub options: OcrOptions,
    pub mode: OutputMode,
}

/// What the settings prompt shows
#[derive(Debug, Clone)]
pub struct SettingsView {
    /// Configured engine path
    pub engine_path: Option<PathBuf>,
    /// Engine that would be used when no path is configured
    pub discovered_engine: Option<PathBuf>,
    pub language: String,
    pub available_languages: Vec<String>,
}

/// Changes requested through the settings prompt; `None` leaves a value alone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    /// New engine path; an empty string clears it
    pub engine_path: Option<String>,
    pub language: Option<String>,
}

/// UI prompt collaborator
pub trait UiPrompt {
    /// Ask for recognition options; `None` when cancelled
    fn prompt_ocr_options(
        &self,
        defaults: &OcrChoice,
        languages: &[String],
        from_selection: bool,
    ) -> Option<OcrChoice>;
    /// Ask for an image file; `None` when cancelled
    fn prompt_image_path(&self) -> Option<PathBuf>;
    /// Ask for settings changes; `None` when cancelled
    fn prompt_settings(&self, current: &SettingsView) -> Option<SettingsUpdate>;
    fn show_message(&self, severity: Severity, title: &str, message: &str);
}

/// How an invocation ended
#[derive(Debug, Clone)]
pub enum CommandResult {
    /// A pipeline run happened
    Run(RunReport),
    /// The user dismissed a prompt
    Cancelled,
    /// The command is not enabled right now
    Disabled,
    SettingsSaved,
    /// Settings were not saved for the given reason
    SettingsRejected(String),
    /// The command aborted outside a pipeline run
    Failed(String),
}

/// Dispatches host commands
pub struct CommandRouter<'a> {
    pipeline: &'a Pipeline,
    store: &'a dyn ConfigStore,
    prompt: &'a dyn UiPrompt,
}

fn picture_selected(host: &dyn HostDocument) -> bool {
    match host.current_selection() {
        Ok(Some(selection)) => selection.kind.is_picture(),
        Ok(None) => false,
        Err(e) => {
            debug!("Selection unavailable: {:#}", e);
            false
        }
    }
}

impl<'a> CommandRouter<'a> {
    pub fn new(pipeline: &'a Pipeline, store: &'a dyn ConfigStore, prompt: &'a dyn UiPrompt) -> Self {
        Self {
            pipeline,
            store,
            prompt,
        }
    }

    /// Whether `command` can run against `host` right now
    ///
    /// A host that panics while being queried reports the command as disabled.
    pub fn is_command_enabled(&self, command: CommandId, host: &dyn HostDocument) -> bool {
        let query = catch_unwind(AssertUnwindSafe(|| match command {
            CommandId::OcrSelectedImage => picture_selected(host),
            CommandId::OcrImageFromFile | CommandId::Settings | CommandId::ToolbarAction => true,
        }));
        query.unwrap_or_else(|panic| {
            error!(
                "Enablement query for {} aborted by a panic: {}",
                command,
                panic_detail(panic.as_ref())
            );
            false
        })
    }

    /// Run `command` to completion
    ///
    /// Panics raised by the host outside a pipeline run are reported to the
    /// user and returned as [`CommandResult::Failed`].
    pub fn invoke(&self, command: CommandId, host: &dyn HostDocument) -> CommandResult {
        info!("Invoking command {}", command);
        match catch_unwind(AssertUnwindSafe(|| self.dispatch(command, host))) {
            Ok(result) => result,
            Err(panic) => {
                let detail = panic_detail(panic.as_ref());
                error!("Command {} aborted by a panic: {}", command, detail);
                self.prompt.show_message(
                    Severity::Error,
                    command.as_str(),
                    "An unexpected error occurred. See the log for details.",
                );
                CommandResult::Failed(detail)
            }
        }
    }

    fn dispatch(&self, command: CommandId, host: &dyn HostDocument) -> CommandResult {
        match command {
            CommandId::OcrSelectedImage => self.ocr_selection(host),
            CommandId::OcrImageFromFile => self.ocr_file(host),
            CommandId::ToolbarAction => {
                if picture_selected(host) {
                    self.ocr_selection(host)
                } else {
                    self.ocr_file(host)
                }
            }
            CommandId::Settings => self.settings(),
        }
    }

    fn ocr_selection(&self, host: &dyn HostDocument) -> CommandResult {
        let handle = match host.current_selection() {
            Ok(Some(selection)) if selection.kind.is_picture() => selection.handle,
            _ => {
                self.prompt.show_message(
                    Severity::Info,
                    "OCR Selected Image",
                    "No picture is selected. Please select an image first.",
                );
                return CommandResult::Disabled;
            }
        };
        self.run_ocr(ImageSourceDescriptor::Selection(handle), host)
    }

    fn ocr_file(&self, host: &dyn HostDocument) -> CommandResult {
        match self.prompt.prompt_image_path() {
            Some(path) => self.run_ocr(ImageSourceDescriptor::FilePath(path), host),
            None => {
                info!("Image file selection cancelled");
                CommandResult::Cancelled
            }
        }
    }

    fn run_ocr(&self, source: ImageSourceDescriptor, host: &dyn HostDocument) -> CommandResult {
        let config = self.store.snapshot();
        let from_selection = source.is_selection();

        let mut defaults = OcrChoice {
            options: config.ocr_options(),
            mode: config.preferred_output_mode(),
        };
        if !from_selection && defaults.mode.requires_selection() {
            defaults.mode = OutputMode::InsertAtCursor;
        }

        let languages = match self.pipeline.engine(&config.engine) {
            Ok(engine) => available_languages(engine.as_ref()),
            Err(e) => {
                debug!("No engine to list languages from: {}", e);
                vec![DEFAULT_LANGUAGE.to_string()]
            }
        };

        let Some(choice) = self
            .prompt
            .prompt_ocr_options(&defaults, &languages, from_selection)
        else {
            info!("OCR options cancelled");
            return CommandResult::Cancelled;
        };

        if config.output.remember_last {
            self.remember(ConfigKey::LastLanguage, &choice.options.language);
            self.remember(ConfigKey::LastOutputMode, choice.mode.as_str());
        }

        let report = self.pipeline.run(
            host,
            &RunRequest {
                source,
                options: choice.options,
                mode: choice.mode,
            },
            &config,
        );
        self.report_outcome(&report);
        CommandResult::Run(report)
    }

    fn remember(&self, key: ConfigKey, value: &str) {
        if let Err(e) = self.store.set(key, value) {
            warn!("Could not remember {}: {}", key, e);
        }
    }

    fn report_outcome(&self, report: &RunReport) {
        match &report.outcome {
            RunOutcome::Written {
                mode: OutputMode::CopyToClipboard,
                chars,
                ..
            } => self.prompt.show_message(
                Severity::Info,
                "OCR",
                &format!("{} characters copied to the clipboard.", chars),
            ),
            RunOutcome::Written { .. } => {}
            RunOutcome::NoTextFound => self.prompt.show_message(
                Severity::Warning,
                "OCR",
                "No text was found in the image.",
            ),
            RunOutcome::Failed(e) => self.prompt.show_message(Severity::Error, "OCR", &e.user_message()),
        }
    }

    fn settings(&self) -> CommandResult {
        let config = self.store.snapshot();
        let languages = self
            .pipeline
            .engine(&config.engine)
            .map(|engine| available_languages(engine.as_ref()))
            .unwrap_or_else(|_| vec![DEFAULT_LANGUAGE.to_string()]);
        let view = SettingsView {
            discovered_engine: if config.engine.path.is_none() {
                find_engine_executable(None)
            } else {
                None
            },
            engine_path: config.engine.path.clone(),
            language: config.ocr.language.clone(),
            available_languages: languages,
        };

        let Some(update) = self.prompt.prompt_settings(&view) else {
            return CommandResult::Cancelled;
        };

        let changes = match self.validate_settings(&update, &config) {
            Ok(changes) => changes,
            Err(reason) => return self.reject_settings(reason),
        };

        for (key, value) in &changes {
            if let Err(e) = self.store.set(*key, value) {
                return self.reject_settings(e.to_string());
            }
        }
        if changes.iter().any(|(key, _)| *key == ConfigKey::EnginePath) {
            self.pipeline.availability().invalidate();
        }

        info!("Settings saved");
        self.prompt.show_message(Severity::Info, "Settings", "Settings saved.");
        CommandResult::SettingsSaved
    }

    fn reject_settings(&self, reason: String) -> CommandResult {
        warn!("Settings rejected: {}", reason);
        self.prompt.show_message(Severity::Error, "Settings", &reason);
        CommandResult::SettingsRejected(reason)
    }

    /// Check every requested change against a staged copy of `current`
    ///
    /// Nothing is written here; the returned key/value pairs are all valid.
    fn validate_settings(
        &self,
        update: &SettingsUpdate,
        current: &AppConfig,
    ) -> Result<Vec<(ConfigKey, String)>, String> {
        let mut staged = current.clone();
        let mut changes = Vec::new();

        if let Some(language) = &update.language {
            write_key(&mut staged, ConfigKey::DefaultLanguage, language).map_err(|e| e.to_string())?;
            changes.push((ConfigKey::DefaultLanguage, language.trim().to_string()));
        }

        if let Some(path) = &update.engine_path {
            let path = path.trim();
            write_key(&mut staged, ConfigKey::EnginePath, path).map_err(|e| e.to_string())?;
            if !path.is_empty() {
                let engine = self.pipeline.engine(&staged.engine).map_err(|e| e.to_string())?;
                let version = engine
                    .probe_version()
                    .map_err(|e| format!("{} is not a working OCR engine: {}", path, e.message))?;
                info!("Validated OCR engine {} ({})", path, version);
            }
            changes.push((ConfigKey::EnginePath, path.to_string()));
        }

        Ok(changes)
    }
}
