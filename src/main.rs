//! picture-ocr - OCR images into a document from the command line
//!
//! Runs the same command router a document host would drive, against a
//! plain-text document kept in memory and optionally saved to a file.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use picture_ocr::commands::{OcrChoice, SettingsUpdate, SettingsView};
use picture_ocr::config::{ConfigKey, ConfigStore, FileConfigStore};
use picture_ocr::recognition::catalog::{ENGINE_MODES, PAGE_SEGMENTATION_MODES};
use picture_ocr::recognition::{
    available_languages, check_engine_path, find_engine_executable, TesseractEngine,
};
use picture_ocr::{
    storage, CommandId, CommandResult, CommandRouter, MemoryDocument, OutputMode, Pipeline,
    RunOutcome, Severity, UiPrompt,
};

/// picture-ocr - extract text from images with an external OCR engine
#[derive(Parser, Debug)]
#[command(name = "picture-ocr")]
#[command(about = "Extract text from images with Tesseract and write it into a document")]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// OCR an image file into a document
    File(FileArgs),
    /// Locate the OCR engine and print its version
    Check {
        /// Engine executable to check instead of the configured one
        #[arg(long)]
        engine: Option<PathBuf>,
    },
    /// List installed OCR languages
    Languages,
    /// List page segmentation and engine modes
    Modes,
    /// Print the effective configuration
    Config,
    /// Change the engine path or default language after validating them
    Settings {
        /// Engine executable; an empty value clears it
        #[arg(long)]
        engine: Option<String>,
        /// Default language code
        #[arg(long)]
        lang: Option<String>,
    },
    /// Set a single configuration key
    Set { key: String, value: String },
}

#[derive(ClapArgs, Debug, Clone)]
struct FileArgs {
    /// Image to recognize
    image: PathBuf,

    /// Plain-text document to insert into; printed to stdout when omitted
    #[arg(long)]
    document: Option<PathBuf>,

    /// Output mode: at_cursor, new_textbox or clipboard
    #[arg(long)]
    mode: Option<OutputMode>,

    /// Language code, e.g. eng or deu+eng
    #[arg(long)]
    lang: Option<String>,

    /// Page segmentation mode (0-13)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=13))]
    psm: Option<u8>,

    /// Engine mode (0-3)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=3))]
    oem: Option<u8>,

    /// Convert to grayscale before recognition
    #[arg(long, overrides_with = "no_grayscale")]
    grayscale: bool,

    /// Skip grayscale conversion even when the configuration enables it
    #[arg(long, overrides_with = "grayscale")]
    no_grayscale: bool,

    /// Binarize before recognition
    #[arg(long, overrides_with = "no_binarize")]
    binarize: bool,

    /// Skip binarization even when the configuration enables it
    #[arg(long, overrides_with = "binarize")]
    no_binarize: bool,
}

/// Explicit on/off flag pair; `None` keeps the configured default
fn toggle(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

/// Answers prompts from command line arguments
struct CliPrompt {
    file: Option<FileArgs>,
    settings: Option<SettingsUpdate>,
}

impl UiPrompt for CliPrompt {
    fn prompt_ocr_options(
        &self,
        defaults: &OcrChoice,
        languages: &[String],
        _from_selection: bool,
    ) -> Option<OcrChoice> {
        let args = self.file.as_ref()?;
        let mut choice = defaults.clone();
        if let Some(lang) = &args.lang {
            choice.options.language = lang.clone();
        }
        if let Some(psm) = args.psm {
            choice.options.page_segmentation_mode = psm;
        }
        if let Some(oem) = args.oem {
            choice.options.engine_mode = oem;
        }
        if let Some(grayscale) = toggle(args.grayscale, args.no_grayscale) {
            choice.options.grayscale = grayscale;
        }
        if let Some(binarize) = toggle(args.binarize, args.no_binarize) {
            choice.options.binarize = binarize;
        }
        if let Some(mode) = args.mode {
            choice.mode = mode;
        }
        info!(
            "Recognizing with {} ({} languages installed)",
            choice.options.language,
            languages.len()
        );
        Some(choice)
    }

    fn prompt_image_path(&self) -> Option<PathBuf> {
        self.file.as_ref().map(|args| args.image.clone())
    }

    fn prompt_settings(&self, current: &SettingsView) -> Option<SettingsUpdate> {
        if let Some(path) = current.engine_path.as_ref().or(current.discovered_engine.as_ref()) {
            info!("Current engine: {}", path.display());
        }
        self.settings.clone()
    }

    fn show_message(&self, severity: Severity, title: &str, message: &str) {
        let label = match severity {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        eprintln!("{} [{}]: {}", title, label, message);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => storage::default_config_path()?,
    };
    let store = FileConfigStore::open(&config_path);

    match args.command {
        Command::File(file) => run_file(&store, file, args.json),
        Command::Check { engine } => run_check(&store, engine.as_deref(), args.json),
        Command::Languages => run_languages(&store, args.json),
        Command::Modes => run_modes(args.json),
        Command::Config => run_config(&store, args.json),
        Command::Settings { engine, lang } => run_settings(
            &store,
            SettingsUpdate {
                engine_path: engine,
                language: lang,
            },
        ),
        Command::Set { key, value } => {
            let key: ConfigKey = key.parse()?;
            store.set(key, &value)?;
            println!("{} = {}", key, store.get(key).unwrap_or_default());
            Ok(())
        }
    }
}

/// OCR one file through the "OCR from file" command
fn run_file(store: &FileConfigStore, file: FileArgs, json: bool) -> Result<()> {
    let image = std::fs::canonicalize(&file.image)
        .with_context(|| format!("Image file not found: {}", file.image.display()))?;
    let document_path = file.document.clone();

    let host = match &document_path {
        Some(path) if path.exists() => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read document {}", path.display()))?;
            MemoryDocument::with_text(&text)
        }
        _ => MemoryDocument::new(),
    };

    let scratch = storage::session_temp_dir()?;
    let pipeline = Pipeline::new(scratch.path());
    let prompt = CliPrompt {
        file: Some(FileArgs { image, ..file }),
        settings: None,
    };
    let router = CommandRouter::new(&pipeline, store, &prompt);

    let report = match router.invoke(CommandId::OcrImageFromFile, &host) {
        CommandResult::Run(report) => report,
        other => bail!("OCR did not run: {:?}", other),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    match &report.outcome {
        RunOutcome::Written { mode, .. } => {
            let produced = match mode {
                OutputMode::CopyToClipboard => host.clipboard().unwrap_or_default(),
                OutputMode::NewTextBox => host.frames().join("\n\n"),
                _ => host.text(),
            };
            match (&document_path, mode) {
                (Some(path), OutputMode::InsertAtCursor | OutputMode::ReplaceSelection) => {
                    save_document(path, &host.text())?;
                }
                _ if !json => println!("{}", produced),
                _ => {}
            }
            Ok(())
        }
        RunOutcome::NoTextFound => Ok(()),
        RunOutcome::Failed(e) => Err(anyhow!(e.user_message())),
    }
}

fn save_document(path: &Path, text: &str) -> Result<()> {
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Saved document {}", path.display());
    Ok(())
}

fn run_check(store: &FileConfigStore, engine: Option<&Path>, json: bool) -> Result<()> {
    let configured = engine.map(Path::to_path_buf).or(store.snapshot().engine.path);
    let path = find_engine_executable(configured.as_deref()).ok_or_else(|| match &configured {
        Some(path) => anyhow!("{} is not an executable file", path.display()),
        None => anyhow!("Tesseract was not found on PATH or in the standard locations"),
    })?;

    let version = check_engine_path(&path)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "path": path, "version": version, "working": true })
        );
    } else {
        println!("{}\n{}", path.display(), version);
    }
    Ok(())
}

fn run_languages(store: &FileConfigStore, json: bool) -> Result<()> {
    let engine = TesseractEngine::from_config(&store.snapshot().engine)?;
    let languages = available_languages(&engine);

    if json {
        println!("{}", serde_json::to_string_pretty(&languages)?);
    } else {
        for language in languages {
            println!("{}", language);
        }
    }
    Ok(())
}

fn run_modes(json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "page_segmentation_modes": PAGE_SEGMENTATION_MODES,
                "engine_modes": ENGINE_MODES,
            }))?
        );
        return Ok(());
    }

    println!("Page segmentation modes (--psm):");
    for mode in PAGE_SEGMENTATION_MODES {
        println!("  {:>2}  {}", mode.value, mode.description);
    }
    println!("Engine modes (--oem):");
    for mode in ENGINE_MODES {
        println!("  {:>2}  {}", mode.value, mode.description);
    }
    Ok(())
}

fn run_config(store: &FileConfigStore, json: bool) -> Result<()> {
    let config = store.snapshot();
    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        println!("# {}", store.path().display());
        print!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}

/// Apply settings through the "Settings" command
fn run_settings(store: &FileConfigStore, update: SettingsUpdate) -> Result<()> {
    if update == SettingsUpdate::default() {
        return run_config(store, false);
    }

    let scratch = storage::session_temp_dir()?;
    let pipeline = Pipeline::new(scratch.path());
    let prompt = CliPrompt {
        file: None,
        settings: Some(update),
    };
    let router = CommandRouter::new(&pipeline, store, &prompt);

    match router.invoke(CommandId::Settings, &MemoryDocument::new()) {
        CommandResult::SettingsSaved => {
            info!("Saved {}", store.path().display());
            Ok(())
        }
        CommandResult::SettingsRejected(reason) => Err(anyhow!(reason)),
        other => bail!("Settings were not changed: {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use picture_ocr::recognition::OcrOptions;

    fn file_prompt(argv: &[&str]) -> CliPrompt {
        let args = Args::parse_from(argv);
        let Command::File(file) = args.command else {
            panic!("expected the file command");
        };
        CliPrompt {
            file: Some(file),
            settings: None,
        }
    }

    fn defaults(preprocess: bool) -> OcrChoice {
        OcrChoice {
            options: OcrOptions {
                grayscale: preprocess,
                binarize: preprocess,
                ..OcrOptions::default()
            },
            mode: OutputMode::InsertAtCursor,
        }
    }

    #[test]
    fn test_cli_disables_configured_preprocessing() {
        let prompt = file_prompt(&["picture-ocr", "file", "scan.png", "--no-binarize", "--no-grayscale"]);
        let choice = prompt.prompt_ocr_options(&defaults(true), &[], false).unwrap();
        assert!(!choice.options.binarize);
        assert!(!choice.options.grayscale);
    }

    #[test]
    fn test_cli_preprocessing_flags() {
        let prompt = file_prompt(&["picture-ocr", "file", "scan.png"]);
        let choice = prompt.prompt_ocr_options(&defaults(true), &[], false).unwrap();
        assert!(choice.options.binarize);
        assert!(choice.options.grayscale);

        // the last of a flag pair wins
        let prompt = file_prompt(&["picture-ocr", "file", "scan.png", "--binarize", "--no-binarize"]);
        let choice = prompt.prompt_ocr_options(&defaults(false), &[], false).unwrap();
        assert!(!choice.options.binarize);

        let prompt = file_prompt(&["picture-ocr", "file", "scan.png", "--grayscale"]);
        let choice = prompt.prompt_ocr_options(&defaults(false), &[], false).unwrap();
        assert!(choice.options.grayscale);
    }
}
