//! Slotbook
//!
//! Books a limited appointment slot the moment it is released each day.
//! Logs in through a WebDriver-controlled browser, solving the login CAPTCHA
//! with a small convolutional classifier, then races to click the slot.

mod booking;
mod browser;
mod captcha;
mod config;
mod credentials;
mod logging;
mod notify;
mod paths;
mod scheduler;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use booking::{run_booking, BookingReport};
use browser::{BrowserError, DriverProcess, WebDriverSession};
use captcha::{CaptchaSolver, LabelSet, ModelError, ModelShape, TrainConfig, Vocabulary};
use config::AppConfig;
use credentials::Credentials;
use notify::{Notifier, NotifierSet};

#[derive(Parser)]
#[command(name = "slotbook")]
#[command(version)]
#[command(about = "Books a daily appointment slot at its release time", long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, global = true, env = "SLOTBOOK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for the configured time of day, then book (default)
    Schedule,

    /// Book right now
    Run,

    /// Decode a CAPTCHA image with the trained model
    Solve {
        /// Image file to decode
        image: PathBuf,
    },

    /// Train the CAPTCHA model from the labelled dataset
    Train {
        #[arg(long, default_value = "50")]
        epochs: usize,

        #[arg(long, default_value = "64")]
        batch_size: usize,

        #[arg(long, default_value = "0.001")]
        learning_rate: f64,
    },

    /// Add a labelled CAPTCHA image to the dataset
    Label {
        /// Captured CAPTCHA image
        image: PathBuf,

        /// The characters shown in the image
        text: String,
    },

    /// Validate configuration, dataset and model without opening a browser
    Check,
}

fn main() -> ExitCode {
    install_panic_hook();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Logs panics before the default hook prints them.
fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = panic_info
            .location()
            .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_default();
        log::error!("[PANIC]{} {}", location, msg);
        default_hook(panic_info);
    }));
}

fn run(cli: Cli) -> Result<ExitCode> {
    paths::ensure_directories().context("Failed to create output directories")?;

    let (config, config_path) = AppConfig::load(cli.config.as_deref())?;
    let level = config.log.level_filter().unwrap_or(log::LevelFilter::Info);
    logging::init(&config.log_file(), level)?;

    match &config_path {
        Some(path) => log::info!("Config loaded from {}", path.display()),
        None => log::info!("config.json not found, using defaults"),
    }

    match cli.command.unwrap_or(Commands::Schedule) {
        Commands::Schedule => schedule(config),
        Commands::Run => {
            let credentials = Credentials::from_env()?;
            preflight(&config, false)?;
            let report = book(&config, &credentials);
            Ok(finish(&config, &report))
        }
        Commands::Solve { image } => solve(&config, &image),
        Commands::Train {
            epochs,
            batch_size,
            learning_rate,
        } => train(&config, epochs, batch_size, learning_rate),
        Commands::Label { image, text } => label(&config, &image, &text),
        Commands::Check => check(&config),
    }
}

/// Waits for the next occurrence of the configured time, then books.
fn schedule(config: AppConfig) -> Result<ExitCode> {
    let credentials = Credentials::from_env()?;
    let at = config.schedule.time().context("Invalid schedule time")?;
    preflight(&config, true)?;

    let job_config = config.clone();
    let run_at = scheduler::next_local_occurrence(Local::now(), at);
    let mut job = scheduler::schedule_at(run_at, move || book(&job_config, &credentials));
    log::info!(
        "Next run at {} ({} from now)",
        job.run_at().format("%Y-%m-%d %H:%M:%S"),
        humanize(job.run_at() - Local::now())
    );

    let outcome = job.wait();
    job.shutdown()?;
    log::info!("Scheduler shut down");

    let report = match outcome {
        Ok(Some(report)) => report,
        Ok(None) => bail!("Scheduled run was cancelled before it started"),
        Err(e) => {
            NotifierSet::from_config(config.notify.webhook_url.as_deref())
                .notify(false, &format!("Booking run failed: {:#}", e));
            return Err(e);
        }
    };
    Ok(finish(&config, &report))
}

/// Fails at startup on CAPTCHA data that the booking run could not use.
///
/// The labels file is always checked when CAPTCHA solving is on. With
/// `check_model` the weights are loaded too.
fn preflight(config: &AppConfig, check_model: bool) -> Result<()> {
    if !config.captcha.enabled {
        return Ok(());
    }
    let vocab = Vocabulary::default();
    let shape = model_shape(config, &vocab).context("CAPTCHA training data check failed")?;
    if check_model {
        captcha::load_model(&config.model_path(), shape, vocab).context("CAPTCHA model check failed")?;
    }
    Ok(())
}

fn humanize(delta: chrono::TimeDelta) -> String {
    let secs = delta.num_seconds().max(0);
    format!("{}h {:02}m {:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// One booking run against the real browser.
fn book(config: &AppConfig, credentials: &Credentials) -> BookingReport {
    run_booking(
        config,
        credentials,
        || {
            if config.captcha.enabled {
                load_solver(config).map(Some)
            } else {
                log::info!("CAPTCHA solving disabled");
                Ok(None::<CaptchaSolver>)
            }
        },
        || open_browser(config),
    )
}

/// Reports the outcome and turns it into the process exit status.
fn finish(config: &AppConfig, report: &BookingReport) -> ExitCode {
    let notifier = NotifierSet::from_config(config.notify.webhook_url.as_deref());
    notifier.notify(report.is_success(), &report.summary());
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn open_browser(config: &AppConfig) -> Result<WebDriverSession, BrowserError> {
    let browser = &config.browser;
    let driver = match &browser.driver_path {
        Some(path) => Some(DriverProcess::spawn(
            browser.kind,
            &config::resolve(path),
            &browser.driver_url,
        )?),
        None => None,
    };
    WebDriverSession::connect(
        browser.kind,
        &browser.options(),
        &browser.driver_url,
        config.timeouts.operation(),
        driver,
    )
}

/// Network shape implied by the labels file and configured image size.
fn model_shape(config: &AppConfig, vocab: &Vocabulary) -> Result<ModelShape, ModelError> {
    let labels = LabelSet::from_csv(&config.labels_file(), vocab)?;
    let num_positions = labels.num_positions()?;
    ModelShape::new(num_positions, vocab.len(), config.captcha.height, config.captcha.width)
}

fn load_solver(config: &AppConfig) -> Result<CaptchaSolver, ModelError> {
    let vocab = Vocabulary::default();
    let shape = model_shape(config, &vocab)?;
    captcha::load_model(&config.model_path(), shape, vocab)
}

fn solve(config: &AppConfig, image: &Path) -> Result<ExitCode> {
    let solver = load_solver(config)?;
    let img = image::open(image).with_context(|| format!("Failed to open {}", image.display()))?;
    let prediction = solver.solve(&img)?;

    println!("{}", prediction.text);
    let confidences: Vec<String> = prediction
        .confidences
        .iter()
        .map(|c| format!("{:.3}", c))
        .collect();
    println!("confidences: [{}]", confidences.join(", "));
    Ok(ExitCode::SUCCESS)
}

fn train(config: &AppConfig, epochs: usize, batch_size: usize, learning_rate: f64) -> Result<ExitCode> {
    let vocab = Vocabulary::default();
    let labels_file = config.labels_file();
    let labels = LabelSet::from_csv(&labels_file, &vocab)
        .with_context(|| format!("Failed to read labels from {}", labels_file.display()))?;
    let train_config = TrainConfig {
        epochs,
        batch_size,
        learning_rate,
        height: config.captcha.height,
        width: config.captcha.width,
    };

    let report = captcha::train(&labels, &config.data_dir(), &vocab, &train_config, &config.model_path())?;
    log::info!(
        "Training finished: {} samples, {} epochs, best accuracy {:.2}%",
        report.samples,
        report.epochs_run,
        report.best_accuracy * 100.0
    );
    Ok(ExitCode::SUCCESS)
}

/// Copies `image` into the dataset directory and records its label.
fn label(config: &AppConfig, image: &Path, text: &str) -> Result<ExitCode> {
    let vocab = Vocabulary::default();
    vocab
        .encode(text)
        .with_context(|| format!("Label '{}' is not valid", text))?;

    let labels_file = config.labels_file();
    if labels_file.exists() {
        let existing = LabelSet::from_csv(&labels_file, &vocab)?;
        if let Ok(expected) = existing.num_positions() {
            let actual = text.chars().count();
            if actual != expected {
                bail!("Label '{}' has {} characters, dataset uses {}", text, actual, expected);
            }
        }
    }

    let file_name = image
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no usable file name", image.display()))?;
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let dest = data_dir.join(file_name);
    if dest.exists() {
        bail!("{} already exists in the dataset", file_name);
    }
    std::fs::copy(image, &dest).with_context(|| format!("Failed to copy {}", image.display()))?;

    captcha::append_label(&labels_file, file_name, text)?;
    log::info!("Labelled {} as {}", file_name, text);
    Ok(ExitCode::SUCCESS)
}

fn check(config: &AppConfig) -> Result<ExitCode> {
    let vocab = Vocabulary::default();
    let shape = match model_shape(config, &vocab) {
        Ok(shape) => shape,
        Err(e) => {
            log::error!("Dataset check failed: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };
    log::info!(
        "Dataset OK: {} positions over {} classes, input {}x{}",
        shape.num_positions,
        shape.vocab_size,
        shape.height,
        shape.width
    );

    match captcha::load_model(&config.model_path(), shape, vocab) {
        Ok(_) => {
            log::info!("Model OK: {}", config.model_path().display());
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            log::error!("Model check failed: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}
