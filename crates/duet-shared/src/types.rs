use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{DEFAULT_IDENTITY_A, DEFAULT_IDENTITY_B};

/// One of the two fixed named participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Error)]
#[error("roster requires two distinct identity names")]
pub struct RosterError;

/// The two fixed identities the coordinator serves, known at startup.
#[derive(Debug, Clone)]
pub struct Roster {
    pair: [Identity; 2],
}

impl Roster {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Result<Self, RosterError> {
        let a = Identity::new(a);
        let b = Identity::new(b);
        if a == b || a.as_str().is_empty() || b.as_str().is_empty() {
            return Err(RosterError);
        }
        Ok(Self { pair: [a, b] })
    }

    pub fn identities(&self) -> &[Identity; 2] {
        &self.pair
    }

    /// Canonical lookup: an identity name resolves to the roster's
    /// own instance, anything else to `None`.
    pub fn resolve(&self, name: &str) -> Option<&Identity> {
        self.pair.iter().find(|id| id.as_str() == name)
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.pair.contains(identity)
    }

    /// The other party of the pair.
    pub fn other(&self, identity: &Identity) -> &Identity {
        if *identity == self.pair[0] {
            &self.pair[1]
        } else {
            &self.pair[0]
        }
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self {
            pair: [
                Identity::new(DEFAULT_IDENTITY_A),
                Identity::new(DEFAULT_IDENTITY_B),
            ],
        }
    }
}

/// Media flavor of a call, opaque to the coordinator beyond routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Voice,
    Video,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_resolve() {
        let roster = Roster::default();
        assert_eq!(roster.resolve("Rav").map(Identity::as_str), Some("Rav"));
        assert_eq!(roster.resolve("Mon").map(Identity::as_str), Some("Mon"));
        assert!(roster.resolve("Eve").is_none());
        assert!(roster.resolve("rav").is_none());
    }

    #[test]
    fn test_roster_other() {
        let roster = Roster::default();
        let rav = roster.resolve("Rav").unwrap().clone();
        assert_eq!(roster.other(&rav).as_str(), "Mon");
        assert_eq!(roster.other(roster.other(&rav)).as_str(), "Rav");
    }

    #[test]
    fn test_roster_rejects_duplicate_names() {
        assert!(Roster::new("Rav", "Rav").is_err());
        assert!(Roster::new("", "Mon").is_err());
    }

    #[test]
    fn test_call_kind_wire_names() {
        assert_eq!(serde_json::to_string(&CallKind::Video).unwrap(), "\"video\"");
        assert_eq!(serde_json::to_string(&CallKind::Voice).unwrap(), "\"voice\"");
    }
}
