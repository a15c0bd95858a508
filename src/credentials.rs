//! Login credentials, read once from the environment at startup.

use anyhow::{bail, Result};
use std::fmt;

pub const USERNAME_VAR: &str = "SLOTBOOK_USERNAME";
pub const PASSWORD_VAR: &str = "SLOTBOOK_PASSWORD";

/// A secret that never appears in `Debug` or `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw secret, for typing into the login form only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: Password,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Password::new(password),
        }
    }

    /// Reads `SLOTBOOK_USERNAME` and `SLOTBOOK_PASSWORD`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let username = lookup(USERNAME_VAR).map(|s| s.trim().to_string()).unwrap_or_default();
        let password = lookup(PASSWORD_VAR).unwrap_or_default();

        if username.is_empty() || password.is_empty() {
            bail!(
                "Credentials missing: set {} and {} before starting",
                USERNAME_VAR,
                PASSWORD_VAR
            );
        }
        log::info!("Credentials read from environment for user {}", username);
        Ok(Self::new(username, password))
    }
}
