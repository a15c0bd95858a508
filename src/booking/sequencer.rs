//! One booking run: log in, wait for a slot, click it, confirm.
//!
//! Each step either advances the state or aborts the run with a reason.
//! Nothing is retried within a run.

use std::time::{Duration, Instant};

use crate::browser::{Browser, BrowserError, BrowserGuard, ElementHandle, Locator};
use crate::captcha::{ModelError, SolveCaptcha};
use crate::config::{AppConfig, ConfirmationPolicy};
use crate::credentials::Credentials;

use super::error::{AbortCode, AbortReason};
use super::state::BookingState;
use super::wait::{
    handle_clickable, poll_for_slot, wait_for_any, wait_for_element, wait_until, PageCondition, PollOutcome,
    Readiness,
};

/// Final state of a run and the stages it passed through.
#[derive(Debug, Clone)]
pub struct BookingReport {
    pub state: BookingState,
    pub history: Vec<&'static str>,
    pub elapsed: Duration,
}

impl BookingReport {
    pub fn is_success(&self) -> bool {
        matches!(self.state, BookingState::Confirmed { .. })
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match &self.state {
            BookingState::Aborted(reason) => Some(reason),
            _ => None,
        }
    }

    /// One-line outcome for notifications.
    pub fn summary(&self) -> String {
        match &self.state {
            BookingState::Confirmed { verified: true } => {
                format!("Booking confirmed in {:.1}s", self.elapsed.as_secs_f32())
            }
            BookingState::Confirmed { verified: false } => format!(
                "Slot clicked in {:.1}s but no confirmation was observed; check manually",
                self.elapsed.as_secs_f32()
            ),
            BookingState::Aborted(reason) => format!("Booking failed: {}", reason),
            other => format!("Booking stopped in state {}", other),
        }
    }
}

/// State and borrowed resources of a run in progress.
pub struct BookingSession<'a, B: Browser, S: SolveCaptcha> {
    state: BookingState,
    browser: &'a mut B,
    solver: Option<&'a S>,
    config: &'a AppConfig,
    credentials: &'a Credentials,
    history: Vec<&'static str>,
}

impl<'a, B: Browser, S: SolveCaptcha> BookingSession<'a, B, S> {
    pub fn new(
        browser: &'a mut B,
        solver: Option<&'a S>,
        config: &'a AppConfig,
        credentials: &'a Credentials,
    ) -> Self {
        Self {
            state: BookingState::Init,
            browser,
            solver,
            config,
            credentials,
            history: vec![BookingState::Init.stage()],
        }
    }

    /// Advances by one state.
    ///
    /// Returns `true` while the run should continue.
    pub fn step(&mut self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        let next = match self.advance() {
            Ok(next) => next,
            Err(reason) => BookingState::Aborted(reason),
        };
        self.transition(next);
        !self.state.is_terminal()
    }

    /// Runs until a terminal state.
    pub fn run_to_end(mut self) -> (BookingState, Vec<&'static str>) {
        while self.step() {}
        (self.state, self.history)
    }

    fn transition(&mut self, next: BookingState) {
        match &next {
            BookingState::Aborted(reason) => log::error!("Booking aborted: {}", reason),
            _ => log::info!("Booking state: {} -> {}", self.state, next),
        }
        self.history.push(next.stage());
        self.state = next;
    }

    fn advance(&mut self) -> Result<BookingState, AbortReason> {
        match self.state.clone() {
            BookingState::Init => {
                let url = &self.config.site_url;
                self.browser
                    .navigate(url)
                    .map_err(|e| AbortReason::from_browser_error(&e, self.stage()))?;
                log::info!("Navigated to {}", url);
                Ok(BookingState::Authenticating)
            }
            BookingState::Authenticating => self.authenticate(),
            BookingState::Authenticated => {
                if let Some(url) = &self.config.booking_url {
                    self.browser
                        .navigate(url)
                        .map_err(|e| AbortReason::from_browser_error(&e, self.stage()))?;
                    log::info!("Opened booking page {}", url);
                }
                Ok(BookingState::Polling)
            }
            BookingState::Polling => self.poll(),
            BookingState::SlotFound(handle, found_at) => self.click_slot(&handle, found_at),
            BookingState::Clicked => self.confirm(),
            terminal => Ok(terminal),
        }
    }

    fn stage(&self) -> &'static str {
        self.state.stage()
    }

    fn fail(&self, err: BrowserError, locator: &Locator) -> AbortReason {
        AbortReason::from_browser_error(&err, self.stage()).at(locator)
    }

    fn wait_ready(
        &mut self,
        locator: &Locator,
        readiness: Readiness,
        timeout: Duration,
    ) -> Result<Option<ElementHandle>, AbortReason> {
        let interval = self.config.timeouts.poll_interval();
        match wait_for_element(&mut *self.browser, locator, readiness, timeout, interval) {
            Ok(PollOutcome::Found(element)) => Ok(Some(element)),
            Ok(PollOutcome::TimedOut) => Ok(None),
            Err(e) => Err(self.fail(e, locator)),
        }
    }

    /// Like `wait_ready`, but a timeout aborts with `on_timeout`.
    fn require(
        &mut self,
        locator: &Locator,
        readiness: Readiness,
        timeout: Duration,
        on_timeout: AbortCode,
    ) -> Result<ElementHandle, AbortReason> {
        self.wait_ready(locator, readiness, timeout)?.ok_or_else(|| {
            AbortReason::new(on_timeout, self.stage(), format!("not found within {}ms", timeout.as_millis()))
                .at(locator)
        })
    }

    fn type_into(&mut self, element: &ElementHandle, locator: &Locator, text: &str) -> Result<(), AbortReason> {
        self.browser.send_keys(element, text).map_err(|e| self.fail(e, locator))
    }

    fn click(&mut self, element: &ElementHandle, locator: &Locator) -> Result<(), AbortReason> {
        self.browser.click(element).map_err(|e| self.fail(e, locator))
    }

    fn authenticate(&mut self) -> Result<BookingState, AbortReason> {
        let config = self.config;
        let credentials = self.credentials;
        let locators = &config.locators;
        let timeout = config.timeouts.operation();

        let username = self.require(&locators.username, Readiness::Present, timeout, AbortCode::LoginTimeout)?;
        self.type_into(&username, &locators.username, &credentials.username)?;

        let password = self.require(&locators.password, Readiness::Present, timeout, AbortCode::LoginTimeout)?;
        self.type_into(&password, &locators.password, credentials.password.expose())?;

        if config.captcha.enabled {
            self.solve_login_captcha()?;
        }

        let login_url = self
            .browser
            .current_url()
            .map_err(|e| AbortReason::from_browser_error(&e, self.stage()))?;
        let button = self.require(&locators.login_button, Readiness::Clickable, timeout, AbortCode::LoginTimeout)?;
        self.click(&button, &locators.login_button)?;
        log::info!("Login submitted");

        let conditions = [
            PageCondition::UrlChangedFrom(login_url),
            PageCondition::ElementPresent(locators.post_login_marker.clone()),
        ];
        let interval = config.timeouts.poll_interval();
        match wait_for_any(&mut *self.browser, &conditions, timeout, interval) {
            Ok(PollOutcome::Found(0)) => log::info!("Login succeeded (URL changed)"),
            Ok(PollOutcome::Found(_)) => log::info!("Login succeeded (post-login marker present)"),
            Ok(PollOutcome::TimedOut) => {
                return Err(AbortReason::new(
                    AbortCode::LoginTimeout,
                    self.stage(),
                    format!("neither URL change nor marker within {}ms", timeout.as_millis()),
                )
                .at(&locators.post_login_marker));
            }
            Err(e) => return Err(self.fail(e, &locators.post_login_marker)),
        }

        Ok(BookingState::Authenticated)
    }

    /// Solves and fills the login CAPTCHA if the page shows one.
    fn solve_login_captcha(&mut self) -> Result<(), AbortReason> {
        let config = self.config;
        let locators = &config.locators;

        let Some(image) = self.wait_ready(&locators.captcha_image, Readiness::Present, config.timeouts.captcha_probe())?
        else {
            log::info!("No login CAPTCHA detected, continuing");
            return Ok(());
        };
        log::info!("Login CAPTCHA detected, solving");

        let unresolved = |stage: &'static str, detail: String| {
            AbortReason::new(AbortCode::CaptchaUnresolved, stage, detail).at(&locators.captcha_image)
        };

        let Some(solver) = self.solver else {
            return Err(unresolved(self.stage(), "no CAPTCHA model loaded".to_string()));
        };
        let png = self
            .browser
            .screenshot_element(&image)
            .map_err(|e| self.fail(e, &locators.captcha_image))?;
        let prediction = solver
            .solve_bytes(&png)
            .map_err(|e| unresolved(self.stage(), e.to_string()))?;

        if let Some(min) = config.captcha.min_confidence {
            let confidence = prediction.min_confidence();
            if confidence < min {
                return Err(unresolved(
                    self.stage(),
                    format!("answer confidence {:.2} below threshold {:.2}", confidence, min),
                ));
            }
        }

        let input = self.require(
            &locators.captcha_input,
            Readiness::Present,
            config.timeouts.operation(),
            AbortCode::UnexpectedPageState,
        )?;
        self.type_into(&input, &locators.captcha_input, &prediction.text)?;
        log::info!("CAPTCHA answer entered");
        Ok(())
    }

    fn poll(&mut self) -> Result<BookingState, AbortReason> {
        let config = self.config;
        let slot = &config.locators.slot;
        let deadline = config.timeouts.slot_deadline();
        log::info!("Waiting up to {}ms for {}", deadline.as_millis(), slot);

        match poll_for_slot(&mut *self.browser, slot, deadline, config.timeouts.poll_interval()) {
            Ok(PollOutcome::Found(element)) => Ok(BookingState::SlotFound(element, Instant::now())),
            Ok(PollOutcome::TimedOut) => Err(AbortReason::new(
                AbortCode::NoSlot,
                self.stage(),
                format!("no clickable slot within {}ms", deadline.as_millis()),
            )
            .at(slot)),
            Err(e) => Err(self.fail(e, slot)),
        }
    }

    /// A single click on the detected slot.
    ///
    /// The slot must still be clickable within the click window; losing it
    /// in between, or having the click refused, means someone else got it.
    fn click_slot(&mut self, element: &ElementHandle, found_at: Instant) -> Result<BookingState, AbortReason> {
        let config = self.config;
        let slot = &config.locators.slot;
        let window = config.timeouts.click();
        let interval = config.timeouts.poll_interval();

        let lost = |stage: &'static str, detail: String| {
            AbortReason::new(AbortCode::LostRace, stage, detail).at(slot)
        };
        let classify = |stage: &'static str, err: BrowserError| match err {
            BrowserError::ElementUnavailable(_) | BrowserError::NoSuchElement(_) | BrowserError::Timeout(_) => {
                lost(stage, err.to_string())
            }
            other => AbortReason::from_browser_error(&other, stage).at(slot),
        };

        let browser = &mut *self.browser;
        let ready = wait_until(window, interval, || {
            Ok::<_, BrowserError>(handle_clickable(&mut *browser, element)?.then_some(()))
        });
        match ready {
            Ok(PollOutcome::Found(())) => {}
            Ok(PollOutcome::TimedOut) => {
                return Err(lost(
                    self.stage(),
                    format!("slot not clickable within {}ms", window.as_millis()),
                ));
            }
            Err(e) => return Err(classify(self.stage(), e)),
        }

        self.browser.click(element).map_err(|e| classify(self.stage(), e))?;
        log::info!("Slot clicked {}ms after detection", found_at.elapsed().as_millis());
        Ok(BookingState::Clicked)
    }

    fn confirm(&mut self) -> Result<BookingState, AbortReason> {
        let config = self.config;
        let locators = &config.locators;
        let timeout = config.timeouts.confirmation();

        let verified = match self.wait_ready(&locators.confirm_button, Readiness::Clickable, timeout)? {
            None => {
                log::warn!("No confirmation screen within {}ms", timeout.as_millis());
                false
            }
            Some(button) => {
                self.click(&button, &locators.confirm_button)?;
                log::info!("Confirmation clicked");
                let conditions = [
                    PageCondition::ElementPresent(locators.success_marker.clone()),
                    PageCondition::UrlContains(config.success_url_fragment.clone()),
                ];
                let interval = config.timeouts.poll_interval();
                match wait_for_any(&mut *self.browser, &conditions, timeout, interval) {
                    Ok(PollOutcome::Found(_)) => true,
                    Ok(PollOutcome::TimedOut) => {
                        log::warn!("No success message within {}ms", timeout.as_millis());
                        false
                    }
                    Err(e) => return Err(self.fail(e, &locators.success_marker)),
                }
            }
        };

        if verified {
            return Ok(BookingState::Confirmed { verified: true });
        }
        match config.confirmation_policy {
            ConfirmationPolicy::AssumeSuccess => {
                log::warn!("Assuming the booking went through; verify manually");
                Ok(BookingState::Confirmed { verified: false })
            }
            ConfirmationPolicy::RequireMarker => Err(AbortReason::new(
                AbortCode::UnexpectedPageState,
                self.stage(),
                "booking not confirmed; needs manual review",
            )
            .at(&locators.success_marker)),
        }
    }
}

/// Runs one booking end to end.
///
/// The solver is loaded before the browser is opened, so a missing or
/// broken model aborts without starting a browser. Once opened, the browser
/// is closed on every exit path.
pub fn run_booking<B, S, L, O>(
    config: &AppConfig,
    credentials: &Credentials,
    load_solver: L,
    open_browser: O,
) -> BookingReport
where
    B: Browser,
    S: SolveCaptcha,
    L: FnOnce() -> Result<Option<S>, ModelError>,
    O: FnOnce() -> Result<B, BrowserError>,
{
    let started = Instant::now();
    let aborted = |reason: AbortReason| {
        log::error!("Booking aborted: {}", reason);
        BookingReport {
            state: BookingState::Aborted(reason),
            history: Vec::new(),
            elapsed: started.elapsed(),
        }
    };

    let solver = match load_solver() {
        Ok(solver) => solver,
        Err(e) => return aborted(AbortReason::from_model_error(&e, BookingState::Init.stage())),
    };

    let browser = match open_browser() {
        Ok(browser) => browser,
        Err(e) => return aborted(AbortReason::from_browser_error(&e, BookingState::Init.stage())),
    };
    let mut guard = BrowserGuard::new(browser);

    let session = BookingSession::new(&mut *guard, solver.as_ref(), config, credentials);
    let (state, history) = session.run_to_end();
    guard.close();

    let report = BookingReport {
        state,
        history,
        elapsed: started.elapsed(),
    };
    log::info!("Booking run finished: {}", report.summary());
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::fake::{ClickResult, FakeBrowser, FakeElement, FakeLog};
    use crate::captcha::Prediction;
    use crate::config::Timeouts;
    use std::cell::{Cell, RefCell};
    use std::path::PathBuf;

    const LOGIN_URL: &str = "https://site.test/login";
    const HOME_URL: &str = "https://site.test/home";

    struct StubSolver {
        text: &'static str,
        confidence: f32,
        seen: RefCell<Vec<Vec<u8>>>,
    }

    impl StubSolver {
        fn new(text: &'static str, confidence: f32) -> Self {
            Self {
                text,
                confidence,
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl SolveCaptcha for StubSolver {
        fn solve_bytes(&self, image_bytes: &[u8]) -> Result<Prediction, ModelError> {
            self.seen.borrow_mut().push(image_bytes.to_vec());
            Ok(Prediction {
                text: self.text.to_string(),
                confidences: vec![self.confidence; self.text.len()],
            })
        }
    }

    fn test_config() -> AppConfig {
        AppConfig {
            site_url: LOGIN_URL.to_string(),
            timeouts: Timeouts {
                operation_ms: 300,
                captcha_probe_ms: 50,
                slot_deadline_ms: 300,
                poll_interval_ms: 10,
                click_ms: 100,
                confirmation_ms: 100,
            },
            ..AppConfig::default()
        }
    }

    /// Login form without CAPTCHA, an open slot and a confirmation flow.
    fn site(config: &AppConfig) -> FakeBrowser {
        let l = &config.locators;
        FakeBrowser::new("about:blank")
            .with(FakeElement::new(l.username.clone()))
            .with(FakeElement::new(l.password.clone()))
            .with(FakeElement::new(l.login_button.clone()).on_click(ClickResult::NavigateTo(HOME_URL.into())))
            .with(FakeElement::new(l.slot.clone()))
            .with(FakeElement::new(l.confirm_button.clone()))
            .with(FakeElement::new(l.success_marker.clone()))
    }

    /// Same site minus the slot, for tests that script the slot themselves.
    fn site_without_slot(config: &AppConfig) -> FakeBrowser {
        let l = &config.locators;
        FakeBrowser::new("about:blank")
            .with(FakeElement::new(l.username.clone()))
            .with(FakeElement::new(l.password.clone()))
            .with(FakeElement::new(l.login_button.clone()).on_click(ClickResult::NavigateTo(HOME_URL.into())))
    }

    fn credentials() -> Credentials {
        Credentials::new("alice", "s3cret")
    }

    fn run(config: &AppConfig, browser: FakeBrowser, solver: Option<&StubSolver>) -> (BookingReport, FakeLog) {
        let log = browser.log.clone();
        let report = run_booking(
            config,
            &credentials(),
            || Ok::<_, ModelError>(solver),
            || Ok::<_, BrowserError>(browser),
        );
        (report, log)
    }

    fn code(report: &BookingReport) -> Option<AbortCode> {
        report.abort_reason().map(|r| r.code)
    }

    #[test]
    fn test_full_run_with_login_captcha() {
        let mut config = test_config();
        config.captcha.min_confidence = Some(0.5);
        let l = config.locators.clone();
        let browser = site(&config)
            .with(FakeElement::new(l.captcha_image.clone()).screenshot(vec![1, 2, 3]))
            .with(FakeElement::new(l.captcha_input.clone()));
        let solver = StubSolver::new("AB3XQ9", 0.9);

        let (report, log) = run(&config, browser, Some(&solver));

        assert!(report.is_success(), "{}", report.summary());
        assert_eq!(report.state, BookingState::Confirmed { verified: true });
        assert_eq!(
            report.history,
            vec!["init", "authenticating", "authenticated", "polling", "slot_found", "clicked", "confirmed"]
        );
        assert_eq!(log.typed_into(&l.username).as_deref(), Some("alice"));
        assert_eq!(log.typed_into(&l.password).as_deref(), Some("s3cret"));
        assert_eq!(log.typed_into(&l.captcha_input).as_deref(), Some("AB3XQ9"));
        assert_eq!(*solver.seen.borrow(), vec![vec![1u8, 2, 3]]);
        assert!(log.clicked(&l.slot));
        assert!(log.clicked(&l.confirm_button));
        assert_eq!(*log.visited.borrow(), vec![LOGIN_URL.to_string()]);
        assert_eq!(log.quits.get(), 1);
    }

    #[test]
    fn test_missing_model_aborts_before_browser() {
        let config = test_config();
        let opened = Cell::new(false);

        let report = run_booking(
            &config,
            &credentials(),
            || Err::<Option<StubSolver>, _>(ModelError::ModelNotFound(PathBuf::from("models/captcha.safetensors"))),
            || {
                opened.set(true);
                Ok::<_, BrowserError>(FakeBrowser::new("about:blank"))
            },
        );

        assert_eq!(code(&report), Some(AbortCode::ModelMissing));
        assert!(!opened.get());
        assert!(report.history.is_empty());
        assert!(!report.is_success());
    }

    #[test]
    fn test_slot_never_clickable_is_no_slot() {
        let config = test_config();
        let browser = site_without_slot(&config);

        let (report, log) = run(&config, browser, None);

        let reason = report.abort_reason().unwrap();
        assert_eq!(reason.code, AbortCode::NoSlot);
        assert_eq!(reason.stage, "polling");
        assert_eq!(reason.locator.as_ref(), Some(&config.locators.slot));
        assert!(report.elapsed >= config.timeouts.slot_deadline());
        assert_eq!(log.quits.get(), 1);
    }

    #[test]
    fn test_disabled_slot_is_no_slot() {
        let config = test_config();
        let browser = site_without_slot(&config).with(FakeElement::new(config.locators.slot.clone()).disabled());

        let (report, log) = run(&config, browser, None);

        assert_eq!(code(&report), Some(AbortCode::NoSlot));
        assert!(!log.clicked(&config.locators.slot));
        assert_eq!(log.quits.get(), 1);
    }

    #[test]
    fn test_refused_click_is_lost_race() {
        let config = test_config();
        let browser = site_without_slot(&config)
            .with(FakeElement::new(config.locators.slot.clone()).on_click(ClickResult::Unavailable));

        let (report, log) = run(&config, browser, None);

        let reason = report.abort_reason().unwrap();
        assert_eq!(reason.code, AbortCode::LostRace);
        assert_ne!(reason.code, AbortCode::NoSlot);
        assert_eq!(reason.stage, "slot_found");
        assert!(log.clicked(&config.locators.slot));
        assert!(!log.clicked(&config.locators.confirm_button));
        assert_eq!(log.quits.get(), 1);
    }

    #[test]
    fn test_slot_gone_stale_before_click_is_lost_race() {
        let config = test_config();
        let browser = site_without_slot(&config)
            .with(FakeElement::new(config.locators.slot.clone()).stale_after_checks(1));

        let (report, log) = run(&config, browser, None);

        let reason = report.abort_reason().unwrap();
        assert_eq!(reason.code, AbortCode::LostRace);
        assert_eq!(reason.stage, "slot_found");
        assert_eq!(reason.locator.as_ref(), Some(&config.locators.slot));
        assert!(!log.clicked(&config.locators.slot));
        assert_eq!(log.quits.get(), 1);
    }

    #[test]
    fn test_slot_disabled_through_click_window_is_lost_race() {
        let config = test_config();
        let browser = site_without_slot(&config)
            .with(FakeElement::new(config.locators.slot.clone()).disabled_after_checks(1));

        let (report, log) = run(&config, browser, None);

        let reason = report.abort_reason().unwrap();
        assert_eq!(reason.code, AbortCode::LostRace);
        assert_eq!(reason.stage, "slot_found");
        assert!(reason.detail.contains("not clickable within 100ms"), "{}", reason.detail);
        assert!(!log.clicked(&config.locators.slot));
        assert_eq!(log.quits.get(), 1);
    }

    #[test]
    fn test_timed_out_click_is_lost_race() {
        let config = test_config();
        let browser = site_without_slot(&config)
            .with(FakeElement::new(config.locators.slot.clone()).on_click(ClickResult::TimedOut));

        let (report, log) = run(&config, browser, None);

        assert_eq!(code(&report), Some(AbortCode::LostRace));
        assert!(log.clicked(&config.locators.slot));
        assert_eq!(log.quits.get(), 1);
    }

    #[test]
    fn test_slot_appearing_late_is_booked() {
        let config = test_config();
        let browser = site_without_slot(&config)
            .with(FakeElement::new(config.locators.slot.clone()).after(Duration::from_millis(120)))
            .with(FakeElement::new(config.locators.confirm_button.clone()))
            .with(FakeElement::new(config.locators.success_marker.clone()));

        let (report, _) = run(&config, browser, None);
        assert_eq!(report.state, BookingState::Confirmed { verified: true });
    }

    #[test]
    fn test_low_confidence_is_captcha_unresolved() {
        let mut config = test_config();
        config.captcha.min_confidence = Some(0.8);
        let l = config.locators.clone();
        let browser = site(&config)
            .with(FakeElement::new(l.captcha_image.clone()))
            .with(FakeElement::new(l.captcha_input.clone()));
        let solver = StubSolver::new("AB3XQ9", 0.3);

        let (report, log) = run(&config, browser, Some(&solver));

        let reason = report.abort_reason().unwrap();
        assert_eq!(reason.code, AbortCode::CaptchaUnresolved);
        assert_eq!(reason.locator.as_ref(), Some(&l.captcha_image));
        assert_eq!(log.typed_into(&l.captcha_input), None);
        assert!(!log.clicked(&l.login_button));
        assert_eq!(log.quits.get(), 1);
    }

    #[test]
    fn test_low_confidence_submitted_without_threshold() {
        let config = test_config();
        let l = config.locators.clone();
        let browser = site(&config)
            .with(FakeElement::new(l.captcha_image.clone()))
            .with(FakeElement::new(l.captcha_input.clone()));
        let solver = StubSolver::new("ZZ0000", 0.1);

        let (report, log) = run(&config, browser, Some(&solver));

        assert!(report.is_success());
        assert_eq!(log.typed_into(&l.captcha_input).as_deref(), Some("ZZ0000"));
    }

    #[test]
    fn test_captcha_without_model_is_unresolved() {
        let config = test_config();
        let browser = site(&config).with(FakeElement::new(config.locators.captcha_image.clone()));

        let (report, _) = run(&config, browser, None);
        assert_eq!(code(&report), Some(AbortCode::CaptchaUnresolved));
    }

    #[test]
    fn test_no_captcha_skips_solver() {
        let config = test_config();
        let solver = StubSolver::new("AB3XQ9", 0.9);

        let (report, _) = run(&config, site(&config), Some(&solver));

        assert!(report.is_success());
        assert!(solver.seen.borrow().is_empty());
    }

    #[test]
    fn test_login_without_url_change_or_marker_times_out() {
        let config = test_config();
        let l = config.locators.clone();
        let browser = FakeBrowser::new("about:blank")
            .with(FakeElement::new(l.username.clone()))
            .with(FakeElement::new(l.password.clone()))
            .with(FakeElement::new(l.login_button.clone()));

        let (report, log) = run(&config, browser, None);

        let reason = report.abort_reason().unwrap();
        assert_eq!(reason.code, AbortCode::LoginTimeout);
        assert_eq!(reason.locator.as_ref(), Some(&l.post_login_marker));
        assert_eq!(log.quits.get(), 1);
    }

    #[test]
    fn test_login_detected_by_marker() {
        let config = test_config();
        let l = config.locators.clone();
        let browser = FakeBrowser::new("about:blank")
            .with(FakeElement::new(l.username.clone()))
            .with(FakeElement::new(l.password.clone()))
            .with(FakeElement::new(l.login_button.clone()))
            .with(FakeElement::new(l.post_login_marker.clone()).after(Duration::from_millis(60)))
            .with(FakeElement::new(l.slot.clone()))
            .with(FakeElement::new(l.confirm_button.clone()))
            .with(FakeElement::new(l.success_marker.clone()));

        let (report, _) = run(&config, browser, None);
        assert!(report.is_success(), "{}", report.summary());
    }

    #[test]
    fn test_missing_username_field_is_login_timeout() {
        let config = test_config();
        let (report, _) = run(&config, FakeBrowser::new("about:blank"), None);

        let reason = report.abort_reason().unwrap();
        assert_eq!(reason.code, AbortCode::LoginTimeout);
        assert_eq!(reason.stage, "authenticating");
        assert_eq!(reason.locator.as_ref(), Some(&config.locators.username));
    }

    #[test]
    fn test_missing_confirmation_assumed_success() {
        let config = test_config();
        let browser = site_without_slot(&config).with(FakeElement::new(config.locators.slot.clone()));

        let (report, _) = run(&config, browser, None);

        assert_eq!(report.state, BookingState::Confirmed { verified: false });
        assert!(report.is_success());
        assert!(report.summary().contains("check manually"));
    }

    #[test]
    fn test_missing_confirmation_fails_when_marker_required() {
        let mut config = test_config();
        config.confirmation_policy = ConfirmationPolicy::RequireMarker;
        let browser = site_without_slot(&config).with(FakeElement::new(config.locators.slot.clone()));

        let (report, log) = run(&config, browser, None);

        let reason = report.abort_reason().unwrap();
        assert_eq!(reason.code, AbortCode::UnexpectedPageState);
        assert_eq!(reason.stage, "clicked");
        assert_eq!(log.quits.get(), 1);
    }

    #[test]
    fn test_success_url_confirms() {
        let config = test_config();
        let l = config.locators.clone();
        let browser = site_without_slot(&config)
            .with(FakeElement::new(l.slot.clone()))
            .with(
                FakeElement::new(l.confirm_button.clone())
                    .on_click(ClickResult::NavigateTo("https://site.test/booking/success".into())),
            );

        let (report, _) = run(&config, browser, None);
        assert_eq!(report.state, BookingState::Confirmed { verified: true });
    }

    #[test]
    fn test_crash_while_polling_is_browser_crashed() {
        let mut config = test_config();
        config.captcha.enabled = false;
        config.timeouts.slot_deadline_ms = 2_000;
        let browser = site_without_slot(&config).crash_after(Duration::from_millis(150));

        let (report, log) = run(&config, browser, None);

        let reason = report.abort_reason().unwrap();
        assert_eq!(reason.code, AbortCode::BrowserCrashed);
        assert_eq!(reason.stage, "polling");
        assert_eq!(log.quits.get(), 1);
    }

    #[test]
    fn test_booking_url_opened_after_login() {
        let mut config = test_config();
        config.booking_url = Some("https://site.test/book".into());

        let (report, log) = run(&config, site(&config), None);

        assert!(report.is_success());
        assert_eq!(
            *log.visited.borrow(),
            vec![LOGIN_URL.to_string(), "https://site.test/book".to_string()]
        );
    }

    #[test]
    fn test_browser_launch_failure() {
        let config = test_config();
        let report = run_booking(
            &config,
            &credentials(),
            || Ok::<Option<StubSolver>, ModelError>(None),
            || Err::<FakeBrowser, _>(BrowserError::Launch("chromedriver not found".into())),
        );
        assert_eq!(code(&report), Some(AbortCode::BrowserCrashed));
    }
}
