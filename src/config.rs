//! Runtime configuration.
//!
//! Loaded from a JSON file at startup. Every field has a default, so a
//! partial file only needs to name what differs from the defaults. Relative
//! paths are resolved against the executable's directory.

use anyhow::{bail, Context, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::browser::{BrowserKind, BrowserOptions, Locator};
use crate::paths;

/// What to conclude when no confirmation appears after the slot click.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationPolicy {
    /// Report success and log a warning asking for a manual check
    #[default]
    AssumeSuccess,
    /// Report failure so the run is flagged for manual review
    RequireMarker,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub kind: BrowserKind,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// WebDriver endpoint
    pub driver_url: String,
    /// When set, the driver binary is started and owned by the run
    pub driver_path: Option<PathBuf>,
    /// Browser executable, when not on the default path
    pub binary: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            kind: BrowserKind::Chrome,
            headless: true,
            window_width: 1920,
            window_height: 1080,
            driver_url: "http://localhost:9515".to_string(),
            driver_path: None,
            binary: None,
        }
    }
}

impl BrowserConfig {
    pub fn options(&self) -> BrowserOptions {
        BrowserOptions {
            headless: self.headless,
            window_width: self.window_width,
            window_height: self.window_height,
            binary: self.binary.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptchaConfig {
    /// Look for a login CAPTCHA at all
    pub enabled: bool,
    pub model_path: PathBuf,
    pub labels_file: PathBuf,
    /// Directory holding the labelled images
    pub data_dir: PathBuf,
    pub height: usize,
    pub width: usize,
    /// Refuse to submit an answer whose weakest position scores below this
    pub min_confidence: Option<f32>,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_path: PathBuf::from("models/captcha.safetensors"),
            labels_file: PathBuf::from("data/labels.csv"),
            data_dir: PathBuf::from("data/captcha_images"),
            height: 60,
            width: 120,
            min_confidence: None,
        }
    }
}

/// Element locators for every page interaction of a run.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Locators {
    pub username: Locator,
    pub password: Locator,
    pub captcha_image: Locator,
    pub captcha_input: Locator,
    pub login_button: Locator,
    pub post_login_marker: Locator,
    pub slot: Locator,
    pub confirm_button: Locator,
    pub success_marker: Locator,
}

impl Default for Locators {
    fn default() -> Self {
        Self {
            username: Locator::id("username"),
            password: Locator::id("password"),
            captcha_image: Locator::id("captcha_img_login"),
            captcha_input: Locator::id("captcha_input_login"),
            login_button: Locator::id("loginButton"),
            post_login_marker: Locator::id("dashboard_element"),
            slot: Locator::class("available-slot-button"),
            confirm_button: Locator::id("confirm_booking_button"),
            success_marker: Locator::id("success_message"),
        }
    }
}

/// Bounded waits, all in milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// General element and page wait
    pub operation_ms: u64,
    /// How long to look for a login CAPTCHA before assuming there is none
    pub captcha_probe_ms: u64,
    /// How long to poll for an open slot
    pub slot_deadline_ms: u64,
    pub poll_interval_ms: u64,
    /// Window for the single slot click
    pub click_ms: u64,
    pub confirmation_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            operation_ms: 30_000,
            captcha_probe_ms: 5_000,
            slot_deadline_ms: 60_000,
            poll_interval_ms: 100,
            click_ms: 2_000,
            confirmation_ms: 30_000,
        }
    }
}

impl Timeouts {
    pub fn operation(&self) -> Duration {
        Duration::from_millis(self.operation_ms)
    }

    pub fn captcha_probe(&self) -> Duration {
        Duration::from_millis(self.captcha_probe_ms)
    }

    pub fn slot_deadline(&self) -> Duration {
        Duration::from_millis(self.slot_deadline_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn click(&self) -> Duration {
        Duration::from_millis(self.click_ms)
    }

    pub fn confirmation(&self) -> Duration {
        Duration::from_millis(self.confirmation_ms)
    }
}

/// Local wall-clock time at which the daily run starts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            hour: 6,
            minute: 0,
            second: 0,
        }
    }
}

impl ScheduleConfig {
    pub fn time(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_opt(self.hour, self.minute, self.second)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub file: PathBuf,
    /// error | warn | info | debug | trace
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("logs/slotbook.log"),
            level: "info".to_string(),
        }
    }
}

impl LogConfig {
    pub fn level_filter(&self) -> Option<log::LevelFilter> {
        self.level.parse().ok()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub site_url: String,
    /// Page to open after login, before polling for slots
    pub booking_url: Option<String>,
    /// A URL containing this after confirmation counts as success
    pub success_url_fragment: String,
    pub browser: BrowserConfig,
    pub captcha: CaptchaConfig,
    pub locators: Locators,
    pub timeouts: Timeouts,
    pub confirmation_policy: ConfirmationPolicy,
    pub schedule: ScheduleConfig,
    pub log: LogConfig,
    pub notify: NotifyConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            site_url: "https://www.proeis.rj.gov.br/Default.aspx".to_string(),
            booking_url: None,
            success_url_fragment: "success".to_string(),
            browser: BrowserConfig::default(),
            captcha: CaptchaConfig::default(),
            locators: Locators::default(),
            timeouts: Timeouts::default(),
            confirmation_policy: ConfirmationPolicy::default(),
            schedule: ScheduleConfig::default(),
            log: LogConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from `path`, or from `config.json` next to the
    /// executable when no path is given.
    ///
    /// A missing default file yields the defaults. An explicitly named file
    /// must exist. Returns the file actually read, if any, so the caller can
    /// log it once logging is up.
    pub fn load(path: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let (config_path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (paths::get_default_config_path(), false),
        };

        if !config_path.exists() {
            if explicit {
                bail!("Config file not found: {}", config_path.display());
            }
            return Ok((Self::default(), None));
        }

        let contents = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let config = Self::from_json(&contents)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;
        Ok((config, Some(config_path)))
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would make a run meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.site_url.trim().is_empty() {
            bail!("site_url must not be empty");
        }
        if self.schedule.time().is_none() {
            bail!(
                "schedule {:02}:{:02}:{:02} is not a valid time of day",
                self.schedule.hour,
                self.schedule.minute,
                self.schedule.second
            );
        }
        if self.timeouts.poll_interval_ms == 0 {
            bail!("timeouts.poll_interval_ms must be positive");
        }
        if self.timeouts.click_ms > self.timeouts.operation_ms {
            bail!("timeouts.click_ms must not exceed timeouts.operation_ms");
        }
        if let Some(min) = self.captcha.min_confidence {
            if !(0.0..=1.0).contains(&min) {
                bail!("captcha.min_confidence must be within 0.0..=1.0");
            }
        }
        if self.log.level_filter().is_none() {
            bail!("log.level '{}' is not a known level", self.log.level);
        }
        Ok(())
    }

    pub fn model_path(&self) -> PathBuf {
        resolve(&self.captcha.model_path)
    }

    pub fn labels_file(&self) -> PathBuf {
        resolve(&self.captcha.labels_file)
    }

    pub fn data_dir(&self) -> PathBuf {
        resolve(&self.captcha.data_dir)
    }

    pub fn log_file(&self) -> PathBuf {
        resolve(&self.log.file)
    }
}

/// Anchors relative paths at the executable's directory.
pub fn resolve(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        paths::get_exe_dir().join(path)
    }
}
