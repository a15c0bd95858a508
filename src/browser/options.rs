//! Browser selection and W3C capability building.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;

/// Supported browsers. Resolved once from config at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chrome,
    Firefox,
}

/// Launch options shared by every browser kind.
#[derive(Clone, Debug)]
pub struct BrowserOptions {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Browser executable, when not on the driver's default path
    pub binary: Option<PathBuf>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            binary: None,
        }
    }
}

impl BrowserKind {
    /// Builds the `alwaysMatch` capabilities object for a new session.
    pub fn capabilities(&self, options: &BrowserOptions) -> Value {
        match self {
            BrowserKind::Chrome => {
                let mut args = vec![
                    "--no-sandbox".to_string(),
                    "--disable-dev-shm-usage".to_string(),
                ];
                if options.headless {
                    args.push("--headless".to_string());
                    args.push("--disable-gpu".to_string());
                    args.push(format!(
                        "--window-size={},{}",
                        options.window_width, options.window_height
                    ));
                }
                let mut chrome = json!({ "args": args });
                if let Some(binary) = &options.binary {
                    chrome["binary"] = json!(binary.display().to_string());
                }
                json!({
                    "browserName": "chrome",
                    "goog:chromeOptions": chrome,
                })
            }
            BrowserKind::Firefox => {
                let mut args = Vec::new();
                if options.headless {
                    args.push("-headless".to_string());
                    args.push(format!("--width={}", options.window_width));
                    args.push(format!("--height={}", options.window_height));
                }
                let mut firefox = json!({ "args": args });
                if let Some(binary) = &options.binary {
                    firefox["binary"] = json!(binary.display().to_string());
                }
                json!({
                    "browserName": "firefox",
                    "moz:firefoxOptions": firefox,
                })
            }
        }
    }
}

impl fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrowserKind::Chrome => write!(f, "chrome"),
            BrowserKind::Firefox => write!(f, "firefox"),
        }
    }
}
