//! Session codes — short, human-enterable room identifiers.
//!
//! DESIGN
//! ======
//! A code is exactly six ASCII alphanumerics, stored uppercase. Parsing
//! normalizes case so `0fnvtp` and `0FNVTP` name the same session; anything
//! else is rejected before it reaches the server.

use serde::{Deserialize, Serialize};

/// Number of characters in a session code.
pub const CODE_LEN: usize = 6;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodeError {
    #[error("session code must be {CODE_LEN} characters, got {0}")]
    BadLength(usize),
    #[error("session code contains invalid character: {0:?}")]
    BadCharacter(char),
}

/// A validated, case-normalized session code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionCode(String);

impl SessionCode {
    /// Parse and normalize a raw code entered by a user.
    ///
    /// # Errors
    ///
    /// Returns [`CodeError`] if the input (after trimming) is not exactly
    /// [`CODE_LEN`] ASCII alphanumerics.
    pub fn parse(raw: &str) -> Result<Self, CodeError> {
        let trimmed = raw.trim();
        if trimmed.chars().count() != CODE_LEN {
            return Err(CodeError::BadLength(trimmed.chars().count()));
        }
        if let Some(bad) = trimmed.chars().find(|c| !c.is_ascii_alphanumeric()) {
            return Err(CodeError::BadCharacter(bad));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionCode {
    type Error = CodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionCode> for String {
    fn from(code: SessionCode) -> Self {
        code.0
    }
}

impl std::str::FromStr for SessionCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[path = "code_test.rs"]
mod tests;
