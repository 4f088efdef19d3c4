use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Advisory configuration lock held cluster-wide by one operator.
///
/// The string form is `token;owner-name;owner-tags`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct LockContext {
    /// Secret presented by the holder on every change.
    pub token: String,

    /// Human readable holder name.
    pub owner_name: String,

    /// Free-form holder tags.
    pub owner_tags: String,
}

impl LockContext {
    /// Creates a new lock context.
    pub fn new(
        token: impl Into<String>,
        owner_name: impl Into<String>,
        owner_tags: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            owner_name: owner_name.into(),
            owner_tags: owner_tags.into(),
        }
    }

    /// Holder identity without the secret, suitable for logs and reports.
    #[must_use]
    pub fn owner(&self) -> String {
        if self.owner_tags.is_empty() {
            self.owner_name.clone()
        } else {
            format!("{} ({})", self.owner_name, self.owner_tags)
        }
    }
}

impl Display for LockContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{};{}", self.token, self.owner_name, self.owner_tags)
    }
}

impl FromStr for LockContext {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(';').collect();
        match parts.as_slice() {
            [token, owner_name, owner_tags] if !token.is_empty() && !owner_name.is_empty() => {
                Ok(Self::new(*token, *owner_name, *owner_tags))
            }
            _ => Err(Error::InvalidValue {
                setting: "lock-context".to_string(),
                value: s.to_string(),
                reason: "expected token;owner-name;owner-tags".to_string(),
            }),
        }
    }
}
