//! Per-peer security policy values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// Protection achieved (or required) on a stream.
///
/// `0` is plaintext, `1` is integrity protection only, and anything above is
/// an encrypted channel, usually reported as the cipher strength in bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct ProtectionLevel(pub u32);

impl ProtectionLevel {
    pub const NONE: Self = Self(0);
    pub const INTEGRITY: Self = Self(1);
    /// Lowest level that counts as encrypted.
    pub const ENCRYPTED: Self = Self(2);

    pub fn is_encrypted(self) -> bool {
        self >= Self::ENCRYPTED
    }
}

impl fmt::Display for ProtectionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => f.write_str("none"),
            1 => f.write_str("integrity-only"),
            bits => write!(f, "{bits}-bit"),
        }
    }
}

/// TLS requirement for a peer (`tls` host option).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsRequirement {
    /// `no`: STARTTLS is neither offered nor requested.
    Disabled,
    /// `<level>` or `force`: the stream must reach at least this protection.
    Minimum(ProtectionLevel),
}

impl TlsRequirement {
    /// Protection level a stream must reach before it may carry stanzas.
    pub fn required_level(self) -> ProtectionLevel {
        match self {
            Self::Disabled => ProtectionLevel::NONE,
            Self::Minimum(level) => level,
        }
    }

    pub fn allows_starttls(self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl Default for TlsRequirement {
    fn default() -> Self {
        Self::Minimum(ProtectionLevel::NONE)
    }
}

impl FromStr for TlsRequirement {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "no" => Ok(Self::Disabled),
            "force" => Ok(Self::Minimum(ProtectionLevel::ENCRYPTED)),
            other => other
                .parse::<u32>()
                .map(|level| Self::Minimum(ProtectionLevel(level)))
                .map_err(|_| ParseError::TlsRequirement(s.to_string())),
        }
    }
}

impl fmt::Display for TlsRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("no"),
            Self::Minimum(level) => write!(f, "{}", level.0),
        }
    }
}

/// Authentication mechanism a stream was authorized with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMechanism {
    /// Server dialback (`db:result` / `db:verify`).
    Dialback,
    /// SASL EXTERNAL over a verified TLS channel.
    Sasl,
}

impl AuthMechanism {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dialback => "db",
            Self::Sasl => "sasl",
        }
    }
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Auth requirement for a peer (`auth` host option).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthRequirement {
    #[default]
    Any,
    /// `db`: SASL must not be used.
    DialbackOnly,
    /// `sasl`: dialback must not be used.
    SaslOnly,
}

impl AuthRequirement {
    pub fn permits(self, mechanism: AuthMechanism) -> bool {
        !matches!(
            (self, mechanism),
            (Self::DialbackOnly, AuthMechanism::Sasl) | (Self::SaslOnly, AuthMechanism::Dialback)
        )
    }
}

impl FromStr for AuthRequirement {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "db" => Ok(Self::DialbackOnly),
            "sasl" => Ok(Self::SaslOnly),
            _ => Err(ParseError::AuthRequirement(s.to_string())),
        }
    }
}

impl fmt::Display for AuthRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Any => "any",
            Self::DialbackOnly => "db",
            Self::SaslOnly => "sasl",
        })
    }
}

/// XMPP version requirement for a peer (`xmpp` host option).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum XmppRequirement {
    #[default]
    Allowed,
    /// `no`: treat every stream as pre-XMPP and never announce `version`.
    Disabled,
    /// `force`: reject pre-XMPP streams.
    Forced,
}

impl FromStr for XmppRequirement {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "no" => Ok(Self::Disabled),
            "force" => Ok(Self::Forced),
            _ => Err(ParseError::XmppRequirement(s.to_string())),
        }
    }
}

impl fmt::Display for XmppRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allowed => "allowed",
            Self::Disabled => "no",
            Self::Forced => "force",
        })
    }
}

/// The three requirements configured for one peer domain (or the default row).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerPolicy {
    pub tls: TlsRequirement,
    pub auth: AuthRequirement,
    pub xmpp: XmppRequirement,
}

/// Which side opened a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "in")]
    Inbound,
    #[serde(rename = "out")]
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "in",
            Self::Outbound => "out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(Self::Inbound),
            "out" => Ok(Self::Outbound),
            other => Err(ParseError::Direction(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_requirement_parsing() {
        assert_eq!("no".parse::<TlsRequirement>(), Ok(TlsRequirement::Disabled));
        assert_eq!(
            "force".parse::<TlsRequirement>(),
            Ok(TlsRequirement::Minimum(ProtectionLevel::ENCRYPTED))
        );
        assert_eq!(
            "128".parse::<TlsRequirement>(),
            Ok(TlsRequirement::Minimum(ProtectionLevel(128)))
        );
        assert!("maybe".parse::<TlsRequirement>().is_err());
    }

    #[test]
    fn tls_defaults_allow_plaintext_and_starttls() {
        let tls = TlsRequirement::default();
        assert_eq!(tls.required_level(), ProtectionLevel::NONE);
        assert!(tls.allows_starttls());
        assert!(!TlsRequirement::Disabled.allows_starttls());
    }

    #[test]
    fn auth_requirement_permits() {
        use AuthMechanism::*;
        assert!(AuthRequirement::Any.permits(Dialback));
        assert!(AuthRequirement::Any.permits(Sasl));
        assert!(AuthRequirement::DialbackOnly.permits(Dialback));
        assert!(!AuthRequirement::DialbackOnly.permits(Sasl));
        assert!(!AuthRequirement::SaslOnly.permits(Dialback));
        assert!(AuthRequirement::SaslOnly.permits(Sasl));
        assert!("either".parse::<AuthRequirement>().is_err());
    }

    #[test]
    fn xmpp_requirement_parsing() {
        assert_eq!("no".parse::<XmppRequirement>(), Ok(XmppRequirement::Disabled));
        assert_eq!("force".parse::<XmppRequirement>(), Ok(XmppRequirement::Forced));
        assert!("1.0".parse::<XmppRequirement>().is_err());
    }

    #[test]
    fn protection_level_display() {
        assert_eq!(ProtectionLevel::NONE.to_string(), "none");
        assert_eq!(ProtectionLevel::INTEGRITY.to_string(), "integrity-only");
        assert_eq!(ProtectionLevel(256).to_string(), "256-bit");
        assert!(ProtectionLevel(256).is_encrypted());
        assert!(!ProtectionLevel::INTEGRITY.is_encrypted());
    }

    #[test]
    fn direction_serializes_short_form() {
        let json = serde_json::to_string(&Direction::Outbound).expect("should serialize");
        assert_eq!(json, "\"out\"");
        assert_eq!("in".parse::<Direction>(), Ok(Direction::Inbound));
    }
}
