//! Outcome notification.
//!
//! A failed notification is logged and otherwise ignored; it never changes
//! the run's result.

use reqwest::blocking::Client;
use serde::Serialize;
use std::time::Duration;

pub trait Notifier {
    fn notify(&self, success: bool, message: &str);
}

/// Writes the outcome to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, success: bool, message: &str) {
        if success {
            log::info!("STATUS SUCCESS: {}", message);
        } else {
            log::error!("STATUS FAILURE: {}", message);
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
struct WebhookPayload<'a> {
    success: bool,
    message: &'a str,
}

/// POSTs `{ "success": bool, "message": str }` to a URL.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, success: bool, message: &str) {
        let payload = WebhookPayload { success, message };
        let result = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .and_then(|r| r.error_for_status());
        match result {
            Ok(_) => log::info!("Notification delivered to webhook"),
            Err(e) => log::warn!("Webhook notification failed: {}", e),
        }
    }
}

/// Fans an outcome out to several notifiers.
#[derive(Default)]
pub struct NotifierSet {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl NotifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifiers.push(Box::new(notifier));
        self
    }

    /// Log notifier, plus the webhook when one is configured.
    pub fn from_config(webhook_url: Option<&str>) -> Self {
        let mut set = Self::new().with(LogNotifier);
        if let Some(url) = webhook_url {
            match WebhookNotifier::new(url) {
                Ok(webhook) => set = set.with(webhook),
                Err(e) => log::warn!("Webhook notifier disabled: {}", e),
            }
        }
        set
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

impl Notifier for NotifierSet {
    fn notify(&self, success: bool, message: &str) {
        for notifier in &self.notifiers {
            notifier.notify(success, message);
        }
    }
}
