//! Terminal reasons for an aborted booking run.

use std::fmt;

use crate::browser::{BrowserError, Locator};
use crate::captcha::ModelError;

/// Machine-readable abort code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AbortCode {
    ModelMissing,
    ModelCorrupt,
    LoginTimeout,
    CaptchaUnresolved,
    NoSlot,
    /// Slot was claimed by someone else between detection and click
    LostRace,
    BrowserCrashed,
    UnexpectedPageState,
}

impl AbortCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortCode::ModelMissing => "model_missing",
            AbortCode::ModelCorrupt => "model_corrupt",
            AbortCode::LoginTimeout => "login_timeout",
            AbortCode::CaptchaUnresolved => "captcha_unresolved",
            AbortCode::NoSlot => "no_slot",
            AbortCode::LostRace => "lost_race",
            AbortCode::BrowserCrashed => "browser_crashed",
            AbortCode::UnexpectedPageState => "unexpected_page_state",
        }
    }
}

impl fmt::Display for AbortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run stopped, where, and which element it was looking for.
#[derive(Clone, Debug, PartialEq)]
pub struct AbortReason {
    pub code: AbortCode,
    /// Name of the state the run was in
    pub stage: &'static str,
    pub locator: Option<Locator>,
    pub detail: String,
}

impl AbortReason {
    pub fn new(code: AbortCode, stage: &'static str, detail: impl Into<String>) -> Self {
        Self {
            code,
            stage,
            locator: None,
            detail: detail.into(),
        }
    }

    pub fn at(mut self, locator: &Locator) -> Self {
        self.locator = Some(locator.clone());
        self
    }

    /// `model_missing` for an absent weights file, `model_corrupt` otherwise.
    pub fn from_model_error(err: &ModelError, stage: &'static str) -> Self {
        let code = match err {
            ModelError::ModelNotFound(_) => AbortCode::ModelMissing,
            _ => AbortCode::ModelCorrupt,
        };
        Self::new(code, stage, err.to_string())
    }

    /// Session-level failures become `browser_crashed`; anything else means
    /// the page did not look the way the locators expect.
    pub fn from_browser_error(err: &BrowserError, stage: &'static str) -> Self {
        let code = if err.is_fatal() {
            AbortCode::BrowserCrashed
        } else {
            AbortCode::UnexpectedPageState
        };
        Self::new(code, stage, err.to_string())
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} during {}", self.code, self.stage)?;
        if let Some(locator) = &self.locator {
            write!(f, " (looking for {})", locator)?;
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}

impl std::error::Error for AbortReason {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_codes_are_snake_case() {
        assert_eq!(AbortCode::NoSlot.to_string(), "no_slot");
        assert_eq!(AbortCode::LostRace.to_string(), "lost_race");
        assert_eq!(AbortCode::UnexpectedPageState.to_string(), "unexpected_page_state");
    }

    #[test]
    fn test_display_names_stage_and_locator() {
        let reason = AbortReason::new(AbortCode::NoSlot, "polling", "deadline of 60000ms passed")
            .at(&Locator::class("available-slot-button"));
        assert_eq!(
            reason.to_string(),
            "no_slot during polling (looking for class=available-slot-button): deadline of 60000ms passed"
        );
    }

    #[test]
    fn test_model_error_mapping() {
        let missing = ModelError::ModelNotFound(PathBuf::from("m.safetensors"));
        assert_eq!(AbortReason::from_model_error(&missing, "init").code, AbortCode::ModelMissing);

        let corrupt = ModelError::ModelCorrupt("bad header".into());
        assert_eq!(AbortReason::from_model_error(&corrupt, "init").code, AbortCode::ModelCorrupt);
    }

    #[test]
    fn test_browser_error_mapping() {
        let lost = BrowserError::SessionLost("chrome not reachable".into());
        assert_eq!(AbortReason::from_browser_error(&lost, "polling").code, AbortCode::BrowserCrashed);

        let missing = BrowserError::NoSuchElement("id=username".into());
        assert_eq!(
            AbortReason::from_browser_error(&missing, "authenticating").code,
            AbortCode::UnexpectedPageState
        );
    }
}
