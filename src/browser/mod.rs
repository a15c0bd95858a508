//! Browser automation for the booking run.
//!
//! This module provides:
//! - The `Browser` trait the booking sequencer drives
//! - Site locators (`Locator`)
//! - Chrome/Firefox capability building (`BrowserKind`)
//! - A W3C WebDriver client (`WebDriverSession`) with an optional owned driver process
//! - `BrowserGuard`, which closes the session on every exit path

pub mod driver;
pub mod locator;
pub mod options;
pub mod webdriver;

pub use driver::DriverProcess;
pub use locator::{Locator, LocatorKind};
pub use options::{BrowserKind, BrowserOptions};
pub use webdriver::WebDriverSession;

use std::ops::{Deref, DerefMut};

/// Opaque reference to an element on the current page.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub String);

/// Failures reported by the browser layer.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    /// Nothing on the page matches the locator
    #[error("no element matches {0}")]
    NoSuchElement(String),

    /// Element exists but can no longer be used (stale, covered, disabled)
    #[error("element unavailable: {0}")]
    ElementUnavailable(String),

    /// The browser session is gone (crashed, closed or invalidated)
    #[error("browser session lost: {0}")]
    SessionLost(String),

    /// The browser or its driver could not be started
    #[error("failed to launch browser: {0}")]
    Launch(String),

    /// HTTP transport to the driver failed
    #[error("webdriver transport error: {0}")]
    Transport(String),

    /// One command took longer than the command timeout
    #[error("webdriver command timed out: {0}")]
    Timeout(String),

    /// Any other WebDriver error response
    #[error("webdriver error '{error}': {message}")]
    Protocol { error: String, message: String },
}

impl BrowserError {
    /// True when the session itself is unusable, as opposed to a single element.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BrowserError::SessionLost(_) | BrowserError::Launch(_) | BrowserError::Transport(_)
        )
    }
}

/// The operations the booking run needs from a browser.
///
/// Every call is blocking. `find_element` reports absence as `Ok(None)` so
/// polling loops do not have to pattern-match on errors.
pub trait Browser {
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;
    fn current_url(&mut self) -> Result<String, BrowserError>;
    fn find_element(&mut self, locator: &Locator) -> Result<Option<ElementHandle>, BrowserError>;
    fn is_displayed(&mut self, element: &ElementHandle) -> Result<bool, BrowserError>;
    fn is_enabled(&mut self, element: &ElementHandle) -> Result<bool, BrowserError>;
    fn click(&mut self, element: &ElementHandle) -> Result<(), BrowserError>;
    fn send_keys(&mut self, element: &ElementHandle, text: &str) -> Result<(), BrowserError>;
    /// PNG bytes of the element's bounding box.
    fn screenshot_element(&mut self, element: &ElementHandle) -> Result<Vec<u8>, BrowserError>;
    fn quit(&mut self) -> Result<(), BrowserError>;
}

/// Exclusive owner of a browser for the duration of one run.
///
/// Quits the browser when dropped, whether the run succeeded, aborted or
/// unwound from a panic.
pub struct BrowserGuard<B: Browser> {
    browser: B,
    closed: bool,
}

impl<B: Browser> BrowserGuard<B> {
    pub fn new(browser: B) -> Self {
        Self {
            browser,
            closed: false,
        }
    }

    /// Quits the browser now instead of at drop time.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match self.browser.quit() {
            Ok(()) => log::info!("Browser closed"),
            Err(e) => log::warn!("Browser quit reported an error: {}", e),
        }
    }
}

impl<B: Browser> Deref for BrowserGuard<B> {
    type Target = B;

    fn deref(&self) -> &B {
        &self.browser
    }
}

impl<B: Browser> DerefMut for BrowserGuard<B> {
    fn deref_mut(&mut self) -> &mut B {
        &mut self.browser
    }
}

impl<B: Browser> Drop for BrowserGuard<B> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct CountingBrowser {
        quits: Rc<Cell<u32>>,
    }

    impl Browser for CountingBrowser {
        fn navigate(&mut self, _url: &str) -> Result<(), BrowserError> {
            Ok(())
        }
        fn current_url(&mut self) -> Result<String, BrowserError> {
            Ok(String::new())
        }
        fn find_element(&mut self, _: &Locator) -> Result<Option<ElementHandle>, BrowserError> {
            Ok(None)
        }
        fn is_displayed(&mut self, _: &ElementHandle) -> Result<bool, BrowserError> {
            Ok(false)
        }
        fn is_enabled(&mut self, _: &ElementHandle) -> Result<bool, BrowserError> {
            Ok(false)
        }
        fn click(&mut self, _: &ElementHandle) -> Result<(), BrowserError> {
            Ok(())
        }
        fn send_keys(&mut self, _: &ElementHandle, _: &str) -> Result<(), BrowserError> {
            Ok(())
        }
        fn screenshot_element(&mut self, _: &ElementHandle) -> Result<Vec<u8>, BrowserError> {
            Ok(Vec::new())
        }
        fn quit(&mut self) -> Result<(), BrowserError> {
            self.quits.set(self.quits.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn test_guard_quits_on_drop() {
        let quits = Rc::new(Cell::new(0));
        {
            let _guard = BrowserGuard::new(CountingBrowser {
                quits: quits.clone(),
            });
        }
        assert_eq!(quits.get(), 1);
    }

    #[test]
    fn test_guard_quits_once_after_explicit_close() {
        let quits = Rc::new(Cell::new(0));
        {
            let mut guard = BrowserGuard::new(CountingBrowser {
                quits: quits.clone(),
            });
            guard.close();
        }
        assert_eq!(quits.get(), 1);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(BrowserError::SessionLost("gone".into()).is_fatal());
        assert!(!BrowserError::ElementUnavailable("stale".into()).is_fatal());
        assert!(!BrowserError::NoSuchElement("id=x".into()).is_fatal());
        assert!(!BrowserError::Timeout("POST /click".into()).is_fatal());
    }
}
