//! Minimal blocking W3C WebDriver client.
//!
//! Speaks the JSON wire protocol of chromedriver/geckodriver directly over
//! `reqwest::blocking`, covering only the commands the booking run uses.

use base64::Engine;
use reqwest::blocking::Client;
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;

use super::{Browser, BrowserError, BrowserKind, BrowserOptions, DriverProcess, ElementHandle, Locator};

/// W3C key under which element references are returned.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

pub struct WebDriverSession {
    client: Client,
    base_url: String,
    session_id: String,
    closed: bool,
    // Dropped after the session so the driver outlives the DELETE call.
    _driver: Option<DriverProcess>,
}

impl WebDriverSession {
    /// Opens a new browser session on the driver at `driver_url`.
    ///
    /// `driver` is the owned driver process, if this run started one; it is
    /// stopped together with the session.
    pub fn connect(
        kind: BrowserKind,
        options: &BrowserOptions,
        driver_url: &str,
        command_timeout: Duration,
        driver: Option<DriverProcess>,
    ) -> Result<Self, BrowserError> {
        let client = Client::builder()
            .timeout(command_timeout)
            .build()
            .map_err(|e| BrowserError::Launch(e.to_string()))?;
        let base_url = driver_url.trim_end_matches('/').to_string();

        let body = json!({
            "capabilities": { "alwaysMatch": kind.capabilities(options) }
        });
        let response = client
            .post(format!("{}/session", base_url))
            .json(&body)
            .send()
            .map_err(|e| BrowserError::Launch(format!("driver at {} unreachable: {}", base_url, e)))?;
        let value = read_response(response).map_err(|e| BrowserError::Launch(e.to_string()))?;

        let session_id = value["sessionId"]
            .as_str()
            .ok_or_else(|| BrowserError::Launch("new session response has no sessionId".into()))?
            .to_string();

        log::info!("{} session {} opened via {}", kind, session_id, base_url);

        Ok(Self {
            client,
            base_url,
            session_id,
            closed: false,
            _driver: driver,
        })
    }

    fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, BrowserError> {
        if self.closed {
            return Err(BrowserError::SessionLost("session already closed".into()));
        }

        let url = format!("{}/session/{}{}", self.base_url, self.session_id, path);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().map_err(|e| {
            if e.is_connect() {
                BrowserError::SessionLost(format!("driver connection refused: {}", e))
            } else if e.is_timeout() {
                BrowserError::Timeout(e.to_string())
            } else {
                BrowserError::Transport(e.to_string())
            }
        })?;
        read_response(response)
    }

    fn element_path(element: &ElementHandle, suffix: &str) -> String {
        format!("/element/{}{}", element.0, suffix)
    }
}

impl Browser for WebDriverSession {
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))?;
        Ok(())
    }

    fn current_url(&mut self) -> Result<String, BrowserError> {
        let value = self.command(Method::GET, "/url", None)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| protocol_error("url is not a string"))
    }

    fn find_element(&mut self, locator: &Locator) -> Result<Option<ElementHandle>, BrowserError> {
        let (using, value) = locator.to_webdriver();
        match self.command(Method::POST, "/element", Some(json!({ "using": using, "value": value }))) {
            Ok(found) => element_from_value(&found).map(Some),
            Err(BrowserError::NoSuchElement(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn is_displayed(&mut self, element: &ElementHandle) -> Result<bool, BrowserError> {
        let value = self.command(Method::GET, &Self::element_path(element, "/displayed"), None)?;
        Ok(value.as_bool().unwrap_or(false))
    }

    fn is_enabled(&mut self, element: &ElementHandle) -> Result<bool, BrowserError> {
        let value = self.command(Method::GET, &Self::element_path(element, "/enabled"), None)?;
        Ok(value.as_bool().unwrap_or(false))
    }

    fn click(&mut self, element: &ElementHandle) -> Result<(), BrowserError> {
        self.command(Method::POST, &Self::element_path(element, "/click"), Some(json!({})))?;
        Ok(())
    }

    fn send_keys(&mut self, element: &ElementHandle, text: &str) -> Result<(), BrowserError> {
        self.command(
            Method::POST,
            &Self::element_path(element, "/value"),
            Some(json!({ "text": text })),
        )?;
        Ok(())
    }

    fn screenshot_element(&mut self, element: &ElementHandle) -> Result<Vec<u8>, BrowserError> {
        let value = self.command(Method::GET, &Self::element_path(element, "/screenshot"), None)?;
        let encoded = value
            .as_str()
            .ok_or_else(|| protocol_error("screenshot is not a string"))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| protocol_error(&format!("screenshot is not base64: {}", e)))
    }

    fn quit(&mut self) -> Result<(), BrowserError> {
        if self.closed {
            return Ok(());
        }
        let result = self.command(Method::DELETE, "", None).map(|_| ());
        self.closed = true;
        result
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.quit();
        }
    }
}

/// Unwraps the `value` member of a driver response, turning W3C error
/// payloads into `BrowserError`.
fn read_response(response: reqwest::blocking::Response) -> Result<Value, BrowserError> {
    let status = response.status();
    let body: Value = response
        .json()
        .map_err(|e| BrowserError::Transport(format!("malformed driver response ({}): {}", status, e)))?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }

    let error = value["error"].as_str().unwrap_or("unknown error");
    let message = value["message"].as_str().unwrap_or_default();
    Err(map_w3c_error(error, message))
}

/// Messages chromedriver sends under `unknown error` when the browser
/// itself has died.
const CRASH_MESSAGES: [&str; 4] = [
    "session deleted because of page crash",
    "chrome not reachable",
    "disconnected: not connected to devtools",
    "tab crashed",
];

fn is_crash_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    CRASH_MESSAGES.iter().any(|phrase| message.contains(phrase))
}

/// Maps a W3C error code onto the browser error taxonomy.
fn map_w3c_error(error: &str, message: &str) -> BrowserError {
    match error {
        "unknown error" if is_crash_message(message) => {
            BrowserError::SessionLost(format!("{}: {}", error, message))
        }
        "timeout" | "script timeout" => BrowserError::Timeout(format!("{}: {}", error, message)),
        "no such element" => BrowserError::NoSuchElement(message.to_string()),
        "stale element reference" | "element click intercepted" | "element not interactable" => {
            BrowserError::ElementUnavailable(format!("{}: {}", error, message))
        }
        "invalid session id" | "session not created" | "no such window" => {
            BrowserError::SessionLost(format!("{}: {}", error, message))
        }
        _ => BrowserError::Protocol {
            error: error.to_string(),
            message: message.to_string(),
        },
    }
}

fn element_from_value(value: &Value) -> Result<ElementHandle, BrowserError> {
    value[ELEMENT_KEY]
        .as_str()
        .map(|id| ElementHandle(id.to_string()))
        .ok_or_else(|| protocol_error("element response has no element reference"))
}

fn protocol_error(message: &str) -> BrowserError {
    BrowserError::Protocol {
        error: "invalid response".to_string(),
        message: message.to_string(),
    }
}
