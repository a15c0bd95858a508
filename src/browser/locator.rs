//! Element locators for the target site.
//!
//! Locators are operator-supplied configuration. The booking logic never
//! inspects them beyond passing them to the browser and naming them in logs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a locator finds its element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocatorKind {
    /// Element `id` attribute
    Id,
    /// A single CSS class name
    Class,
    /// Raw CSS selector
    Css,
    /// XPath expression
    Xpath,
}

/// A site-specific selector for one UI element.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub by: LocatorKind,
    pub value: String,
}

impl Locator {
    pub fn id(value: impl Into<String>) -> Self {
        Self {
            by: LocatorKind::Id,
            value: value.into(),
        }
    }

    pub fn class(value: impl Into<String>) -> Self {
        Self {
            by: LocatorKind::Class,
            value: value.into(),
        }
    }

    pub fn css(value: impl Into<String>) -> Self {
        Self {
            by: LocatorKind::Css,
            value: value.into(),
        }
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self {
            by: LocatorKind::Xpath,
            value: value.into(),
        }
    }

    /// Returns the W3C WebDriver `(using, value)` pair for this locator.
    ///
    /// W3C drivers only accept CSS and XPath strategies, so ids and class
    /// names are rewritten as CSS selectors.
    pub fn to_webdriver(&self) -> (&'static str, String) {
        match self.by {
            LocatorKind::Id => ("css selector", format!("[id=\"{}\"]", escape_css_string(&self.value))),
            LocatorKind::Class => ("css selector", format!(".{}", escape_css_ident(&self.value))),
            LocatorKind::Css => ("css selector", self.value.clone()),
            LocatorKind::Xpath => ("xpath", self.value.clone()),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let by = match self.by {
            LocatorKind::Id => "id",
            LocatorKind::Class => "class",
            LocatorKind::Css => "css",
            LocatorKind::Xpath => "xpath",
        };
        write!(f, "{}={}", by, self.value)
    }
}

fn escape_css_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn escape_css_ident(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for (i, c) in value.chars().enumerate() {
        let plain = c.is_ascii_alphanumeric() || c == '-' || c == '_' || !c.is_ascii();
        let leading_digit = i == 0 && c.is_ascii_digit();
        if plain && !leading_digit {
            out.push(c);
        } else if leading_digit {
            out.push_str(&format!("\\{:x} ", c as u32));
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}
