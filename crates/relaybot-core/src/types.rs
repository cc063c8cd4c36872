use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical identifier for a conversation channel — the sole batching key
/// for the dispatcher and the sole grouping key for scheduled-task delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum SourceKey {
    Group(String),
    Private(String),
}

impl SourceKey {
    pub fn group(id: impl Into<String>) -> Self {
        Self::Group(id.into())
    }

    pub fn private(id: impl Into<String>) -> Self {
        Self::Private(id.into())
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Group(id) | Self::Private(id) => id,
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group(id) => write!(f, "group:{id}"),
            Self::Private(id) => write!(f, "private:{id}"),
        }
    }
}

impl FromStr for SourceKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(id) = s.strip_prefix("group:") {
            Ok(Self::Group(id.to_string()))
        } else if let Some(id) = s.strip_prefix("private:") {
            Ok(Self::Private(id.to_string()))
        } else {
            Err(format!("malformed source key: {s}"))
        }
    }
}

impl From<SourceKey> for String {
    fn from(k: SourceKey) -> Self {
        k.to_string()
    }
}

impl TryFrom<String> for SourceKey {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Dispatcher queue priority. Lower value dispatches first (see §3 of the spec).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    Scheduled = 0,
    User = 1,
    Auto = 2,
}

/// Role hierarchy for the command surface: `User < Developer < Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Developer,
    Admin,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Developer => write!(f, "developer"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "developer" => Ok(Role::Developer),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_key_round_trips_through_display_and_parse() {
        let k = SourceKey::group("123");
        let s = k.to_string();
        assert_eq!(s, "group:123");
        assert_eq!(s.parse::<SourceKey>().unwrap(), k);
    }

    #[test]
    fn priority_ordering_matches_spec() {
        assert!(Priority::Scheduled < Priority::User);
        assert!(Priority::User < Priority::Auto);
    }

    #[test]
    fn role_ordering_matches_spec() {
        assert!(Role::User < Role::Developer);
        assert!(Role::Developer < Role::Admin);
    }
}
