//! Scripted in-memory browser for booking tests.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::browser::{Browser, BrowserError, ElementHandle, Locator};

#[derive(Clone, Debug)]
pub(crate) enum ClickResult {
    Ok,
    /// The element was taken away before the click landed
    Unavailable,
    /// The click succeeds and the page moves to this URL
    NavigateTo(String),
    /// The driver gives up on the command
    TimedOut,
}

/// What an element turns into once its enabled-check budget is spent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Decay {
    /// Every call on the handle fails as stale
    Stale,
    /// Still displayed, never enabled again
    Disabled,
}

#[derive(Clone, Debug)]
pub(crate) struct FakeElement {
    locator: Locator,
    appears_after: Duration,
    /// `None` means never enabled
    enabled_after: Option<Duration>,
    on_click: ClickResult,
    screenshot: Vec<u8>,
    decay: Option<(u32, Decay)>,
    enabled_checks: u32,
}

impl FakeElement {
    /// Present, displayed and enabled from the start.
    pub(crate) fn new(locator: Locator) -> Self {
        Self {
            locator,
            appears_after: Duration::ZERO,
            enabled_after: Some(Duration::ZERO),
            on_click: ClickResult::Ok,
            screenshot: Vec::new(),
            decay: None,
            enabled_checks: 0,
        }
    }

    pub(crate) fn after(mut self, delay: Duration) -> Self {
        self.appears_after = delay;
        self
    }

    pub(crate) fn enabled_after(mut self, delay: Duration) -> Self {
        self.enabled_after = Some(delay);
        self
    }

    pub(crate) fn disabled(mut self) -> Self {
        self.enabled_after = None;
        self
    }

    pub(crate) fn on_click(mut self, result: ClickResult) -> Self {
        self.on_click = result;
        self
    }

    pub(crate) fn screenshot(mut self, png: Vec<u8>) -> Self {
        self.screenshot = png;
        self
    }

    /// Goes stale once `is_enabled` has been asked `checks` times.
    pub(crate) fn stale_after_checks(mut self, checks: u32) -> Self {
        self.decay = Some((checks, Decay::Stale));
        self
    }

    /// Turns disabled once `is_enabled` has been asked `checks` times.
    pub(crate) fn disabled_after_checks(mut self, checks: u32) -> Self {
        self.decay = Some((checks, Decay::Disabled));
        self
    }

    fn decayed(&self) -> Option<Decay> {
        match self.decay {
            Some((checks, decay)) if self.enabled_checks >= checks => Some(decay),
            _ => None,
        }
    }

    fn stale_error(&self) -> BrowserError {
        BrowserError::ElementUnavailable(format!("stale element reference: {}", self.locator))
    }
}

/// Everything the browser was asked to do, shared with the test.
#[derive(Clone, Default)]
pub(crate) struct FakeLog {
    pub(crate) typed: Rc<RefCell<Vec<(String, String)>>>,
    pub(crate) clicks: Rc<RefCell<Vec<String>>>,
    pub(crate) visited: Rc<RefCell<Vec<String>>>,
    pub(crate) quits: Rc<Cell<u32>>,
}

impl FakeLog {
    pub(crate) fn typed_into(&self, locator: &Locator) -> Option<String> {
        let key = locator.to_string();
        self.typed
            .borrow()
            .iter()
            .find(|(target, _)| *target == key)
            .map(|(_, text)| text.clone())
    }

    pub(crate) fn clicked(&self, locator: &Locator) -> bool {
        self.clicks.borrow().contains(&locator.to_string())
    }
}

pub(crate) struct FakeBrowser {
    start: Instant,
    url: String,
    elements: Vec<FakeElement>,
    crash_after: Option<Duration>,
    pub(crate) log: FakeLog,
}

impl FakeBrowser {
    pub(crate) fn new(url: &str) -> Self {
        Self {
            start: Instant::now(),
            url: url.to_string(),
            elements: Vec::new(),
            crash_after: None,
            log: FakeLog::default(),
        }
    }

    pub(crate) fn with(mut self, element: FakeElement) -> Self {
        self.elements.push(element);
        self
    }

    /// Every call fails with `SessionLost` once `delay` has passed.
    pub(crate) fn crash_after(mut self, delay: Duration) -> Self {
        self.crash_after = Some(delay);
        self
    }

    fn check_alive(&self) -> Result<(), BrowserError> {
        match self.crash_after {
            Some(delay) if self.start.elapsed() >= delay => {
                Err(BrowserError::SessionLost("chrome not reachable".into()))
            }
            _ => Ok(()),
        }
    }

    fn element(&self, handle: &ElementHandle) -> Result<&FakeElement, BrowserError> {
        handle
            .0
            .parse::<usize>()
            .ok()
            .and_then(|i| self.elements.get(i))
            .ok_or_else(|| BrowserError::NoSuchElement(handle.0.clone()))
    }

    fn element_mut(&mut self, handle: &ElementHandle) -> Result<&mut FakeElement, BrowserError> {
        handle
            .0
            .parse::<usize>()
            .ok()
            .and_then(|i| self.elements.get_mut(i))
            .ok_or_else(|| BrowserError::NoSuchElement(handle.0.clone()))
    }
}

impl Browser for FakeBrowser {
    fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.check_alive()?;
        self.url = url.to_string();
        self.log.visited.borrow_mut().push(url.to_string());
        Ok(())
    }

    fn current_url(&mut self) -> Result<String, BrowserError> {
        self.check_alive()?;
        Ok(self.url.clone())
    }

    fn find_element(&mut self, locator: &Locator) -> Result<Option<ElementHandle>, BrowserError> {
        self.check_alive()?;
        let elapsed = self.start.elapsed();
        Ok(self
            .elements
            .iter()
            .position(|e| e.locator == *locator && e.appears_after <= elapsed)
            .map(|i| ElementHandle(i.to_string())))
    }

    fn is_displayed(&mut self, element: &ElementHandle) -> Result<bool, BrowserError> {
        self.check_alive()?;
        let target = self.element(element)?;
        if target.decayed() == Some(Decay::Stale) {
            return Err(target.stale_error());
        }
        Ok(true)
    }

    fn is_enabled(&mut self, element: &ElementHandle) -> Result<bool, BrowserError> {
        self.check_alive()?;
        let elapsed = self.start.elapsed();
        let target = self.element_mut(element)?;
        let enabled = match target.decayed() {
            Some(Decay::Stale) => return Err(target.stale_error()),
            Some(Decay::Disabled) => false,
            None => target.enabled_after.is_some_and(|d| d <= elapsed),
        };
        target.enabled_checks += 1;
        Ok(enabled)
    }

    fn click(&mut self, element: &ElementHandle) -> Result<(), BrowserError> {
        self.check_alive()?;
        let target = self.element(element)?.clone();
        if target.decayed() == Some(Decay::Stale) {
            return Err(target.stale_error());
        }
        self.log.clicks.borrow_mut().push(target.locator.to_string());
        match target.on_click {
            ClickResult::Ok => Ok(()),
            ClickResult::Unavailable => Err(target.stale_error()),
            ClickResult::TimedOut => Err(BrowserError::Timeout(format!("POST click on {}", target.locator))),
            ClickResult::NavigateTo(url) => {
                self.url = url;
                Ok(())
            }
        }
    }

    fn send_keys(&mut self, element: &ElementHandle, text: &str) -> Result<(), BrowserError> {
        self.check_alive()?;
        let target = self.element(element)?.locator.to_string();
        self.log.typed.borrow_mut().push((target, text.to_string()));
        Ok(())
    }

    fn screenshot_element(&mut self, element: &ElementHandle) -> Result<Vec<u8>, BrowserError> {
        self.check_alive()?;
        Ok(self.element(element)?.screenshot.clone())
    }

    fn quit(&mut self) -> Result<(), BrowserError> {
        self.log.quits.set(self.log.quits.get() + 1);
        Ok(())
    }
}
