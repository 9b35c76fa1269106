//! Account identifier
//!
//! The aggregate id. Opaque to the domain, but it doubles as a blob key
//! and a cache key, so it is restricted to characters that are safe in both.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DomainError;

/// Room for `".{id}.jsonl.{uuid}.tmp"` inside a 255-byte file name
const MAX_LEN: usize = 200;

/// Identifier of an account aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Validate and wrap an account id.
    ///
    /// # Errors
    /// `DomainError::InvalidAccountId` when the id is empty, too long,
    /// starts with a dot, or contains whitespace, control characters or
    /// path separators.
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();

        if value.is_empty() {
            return Err(DomainError::InvalidAccountId("account id must not be empty".into()));
        }
        if value.len() > MAX_LEN {
            return Err(DomainError::InvalidAccountId(format!(
                "account id exceeds {MAX_LEN} bytes"
            )));
        }
        if value.starts_with('.') {
            return Err(DomainError::InvalidAccountId(
                "account id must not start with '.'".into(),
            ));
        }
        if let Some(c) = value
            .chars()
            .find(|c| c.is_whitespace() || c.is_control() || *c == '/' || *c == '\\')
        {
            return Err(DomainError::InvalidAccountId(format!(
                "account id contains forbidden character {c:?}"
            )));
        }

        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountId::new(s)
    }
}

impl TryFrom<String> for AccountId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AccountId::new(value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl AsRef<str> for AccountId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
