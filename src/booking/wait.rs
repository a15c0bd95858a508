//! Bounded waits against the page.
//!
//! Every wait polls at a fixed interval until its condition holds or its
//! timeout elapses. There is no backoff: the events waited for are bounded
//! in time, not in failures.

use std::thread;
use std::time::{Duration, Instant};

use crate::browser::{Browser, BrowserError, ElementHandle, Locator};

/// Result of a bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Found(T),
    TimedOut,
}

/// Calls `probe` until it yields a value or `timeout` has elapsed.
///
/// The probe runs at least once. After a miss the loop sleeps for `interval`,
/// cut short so the last probe lands at the deadline. A value appearing at
/// time `t` is therefore seen no later than `t + interval` plus one probe.
pub fn wait_until<T, E>(
    timeout: Duration,
    interval: Duration,
    mut probe: impl FnMut() -> Result<Option<T>, E>,
) -> Result<PollOutcome<T>, E> {
    let start = Instant::now();
    loop {
        if let Some(value) = probe()? {
            return Ok(PollOutcome::Found(value));
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Ok(PollOutcome::TimedOut);
        }
        thread::sleep(interval.min(timeout - elapsed));
    }
}

/// What "ready" means for an element wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// In the DOM
    Present,
    /// Displayed and enabled
    Clickable,
}

/// True when a known element is displayed and enabled.
pub fn handle_clickable<B: Browser>(browser: &mut B, element: &ElementHandle) -> Result<bool, BrowserError> {
    Ok(browser.is_displayed(element)? && browser.is_enabled(element)?)
}

/// One look for `locator` at the given readiness.
///
/// An element that vanishes, goes stale or times out mid-check counts as not
/// ready yet.
fn probe_element<B: Browser>(
    browser: &mut B,
    locator: &Locator,
    readiness: Readiness,
) -> Result<Option<ElementHandle>, BrowserError> {
    let Some(element) = browser.find_element(locator)? else {
        return Ok(None);
    };
    if readiness == Readiness::Present {
        return Ok(Some(element));
    }
    match handle_clickable(browser, &element) {
        Ok(true) => Ok(Some(element)),
        Ok(false) => Ok(None),
        Err(BrowserError::NoSuchElement(_) | BrowserError::ElementUnavailable(_) | BrowserError::Timeout(_)) => {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Waits for an element to reach `readiness`.
pub fn wait_for_element<B: Browser>(
    browser: &mut B,
    locator: &Locator,
    readiness: Readiness,
    timeout: Duration,
    interval: Duration,
) -> Result<PollOutcome<ElementHandle>, BrowserError> {
    wait_until(timeout, interval, || probe_element(&mut *browser, locator, readiness))
}

/// Slot poller: `WAITING -> FOUND` once the element exists, is visible and
/// is interactable, `WAITING -> TIMED_OUT` once `deadline` has elapsed.
pub fn poll_for_slot<B: Browser>(
    browser: &mut B,
    locator: &Locator,
    deadline: Duration,
    interval: Duration,
) -> Result<PollOutcome<ElementHandle>, BrowserError> {
    let mut probes = 0u64;
    let outcome = wait_until(deadline, interval, || {
        probes += 1;
        let found = probe_element(&mut *browser, locator, Readiness::Clickable)?;
        if found.is_none() {
            log::debug!("Slot {} not available yet (probe {})", locator, probes);
        }
        Ok(found)
    })?;
    let result = match outcome {
        PollOutcome::Found(_) => "found",
        PollOutcome::TimedOut => "timed out",
    };
    log::info!("Slot poll {} after {} probes", result, probes);
    Ok(outcome)
}

/// One condition of a multi-condition wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCondition {
    /// Current URL differs from this one
    UrlChangedFrom(String),
    UrlContains(String),
    ElementPresent(Locator),
}

impl PageCondition {
    fn holds<B: Browser>(&self, browser: &mut B) -> Result<bool, BrowserError> {
        match self {
            PageCondition::UrlChangedFrom(url) => Ok(browser.current_url()? != *url),
            PageCondition::UrlContains(fragment) => Ok(browser.current_url()?.contains(fragment.as_str())),
            PageCondition::ElementPresent(locator) => Ok(browser.find_element(locator)?.is_some()),
        }
    }
}

/// Waits until any condition holds and returns the index of the first one
/// that did.
///
/// Every condition is checked on every iteration, in order, so neither can
/// starve the other.
pub fn wait_for_any<B: Browser>(
    browser: &mut B,
    conditions: &[PageCondition],
    timeout: Duration,
    interval: Duration,
) -> Result<PollOutcome<usize>, BrowserError> {
    wait_until(timeout, interval, || {
        for (i, condition) in conditions.iter().enumerate() {
            if condition.holds(&mut *browser)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    })
}
