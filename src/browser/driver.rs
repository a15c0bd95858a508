//! Owned WebDriver server process (chromedriver / geckodriver).
//!
//! When the config names a driver binary, the run starts it, waits for its
//! `/status` endpoint to report ready, and kills it when dropped.

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use super::{BrowserError, BrowserKind};

/// How long a freshly spawned driver gets to come up.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const STARTUP_POLL: Duration = Duration::from_millis(100);

pub struct DriverProcess {
    child: Child,
}

impl DriverProcess {
    /// Spawns the driver binary listening on the port of `driver_url`.
    pub fn spawn(kind: BrowserKind, binary: &Path, driver_url: &str) -> Result<Self, BrowserError> {
        let port = port_of(driver_url)?;

        let mut command = Command::new(binary);
        match kind {
            BrowserKind::Chrome => {
                command.arg(format!("--port={}", port));
            }
            BrowserKind::Firefox => {
                command.arg("--port").arg(port.to_string());
            }
        }

        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                BrowserError::Launch(format!("could not start {}: {}", binary.display(), e))
            })?;

        log::info!(
            "Started {} driver {} (pid {}) on port {}",
            kind,
            binary.display(),
            child.id(),
            port
        );

        let mut process = Self { child };
        process.wait_ready(driver_url)?;
        Ok(process)
    }

    fn wait_ready(&mut self, driver_url: &str) -> Result<(), BrowserError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| BrowserError::Transport(e.to_string()))?;
        let status_url = format!("{}/status", driver_url.trim_end_matches('/'));
        let start = Instant::now();

        loop {
            if let Ok(Some(status)) = self.child.try_wait() {
                return Err(BrowserError::Launch(format!(
                    "driver exited during startup ({})",
                    status
                )));
            }

            let ready = client
                .get(&status_url)
                .send()
                .and_then(|r| r.json::<serde_json::Value>())
                .map(|body| body["value"]["ready"].as_bool().unwrap_or(false))
                .unwrap_or(false);
            if ready {
                log::debug!("Driver ready after {}ms", start.elapsed().as_millis());
                return Ok(());
            }

            if start.elapsed() > STARTUP_TIMEOUT {
                return Err(BrowserError::Launch(format!(
                    "driver not ready after {}s",
                    STARTUP_TIMEOUT.as_secs()
                )));
            }
            std::thread::sleep(STARTUP_POLL);
        }
    }
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        let pid = self.child.id();
        if let Err(e) = self.child.kill() {
            log::debug!("Driver {} already gone: {}", pid, e);
        }
        let _ = self.child.wait();
        log::info!("Driver process {} stopped", pid);
    }
}

fn port_of(driver_url: &str) -> Result<u16, BrowserError> {
    let url = reqwest::Url::parse(driver_url)
        .map_err(|e| BrowserError::Launch(format!("invalid driver url '{}': {}", driver_url, e)))?;
    url.port_or_known_default()
        .ok_or_else(|| BrowserError::Launch(format!("driver url '{}' has no port", driver_url)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_of_explicit_port() {
        assert_eq!(port_of("http://localhost:9515").unwrap(), 9515);
        assert_eq!(port_of("http://127.0.0.1:4444/").unwrap(), 4444);
    }

    #[test]
    fn test_port_of_default_http_port() {
        assert_eq!(port_of("http://localhost").unwrap(), 80);
    }

    #[test]
    fn test_port_of_rejects_garbage() {
        assert!(matches!(port_of("not a url"), Err(BrowserError::Launch(_))));
    }

    #[test]
    fn test_spawn_missing_binary_fails() {
        let result = DriverProcess::spawn(
            BrowserKind::Chrome,
            Path::new("/nonexistent/chromedriver"),
            "http://localhost:9515",
        );
        assert!(matches!(result, Err(BrowserError::Launch(_))));
    }
}
