//! Composite registry keys.

use serde::Serialize;
use std::fmt;

/// Random token issued in an inbound stream header; one of the inputs of the
/// dialback key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ChallengeId(String);

impl ChallengeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChallengeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ChallengeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a directed domain pair: stanzas from `source` (a local domain)
/// to `destination` (a remote domain), or the mirror for inbound traffic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RouteKey {
    pub destination: String,
    pub source: String,
}

impl RouteKey {
    pub fn new(destination: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            source: source.into(),
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.destination, self.source)
    }
}

/// Identifies one `db:result` claim on one inbound stream: the challenge id of
/// the stream plus the domain pair the peer asked to be authorized for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResultKey {
    pub challenge: ChallengeId,
    pub destination: String,
    pub source: String,
}

impl ResultKey {
    pub fn new(
        challenge: ChallengeId,
        destination: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            challenge,
            destination: destination.into(),
            source: source.into(),
        }
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.challenge, self.destination, self.source)
    }
}
