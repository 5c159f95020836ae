//! Stream headers and stream-level errors.

use std::fmt;
use std::str::FromStr;

use crate::element::{escape, Element};
use crate::error::ParseError;
use crate::ns;

/// The attributes of a `<stream:stream>` root element that matter to
/// server-to-server authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    pub to: Option<String>,
    pub from: Option<String>,
    /// Stream id; on a response header this is the challenge.
    pub id: Option<String>,
    pub version: Option<String>,
    /// Default namespace (`xmlns`).
    pub namespace: String,
    /// Value of the `xmlns:db` declaration, if any.
    pub dialback_namespace: Option<String>,
    /// Loop-detection token (`check` attribute in the loopcheck namespace).
    pub loopcheck: Option<String>,
}

impl Default for StreamHeader {
    fn default() -> Self {
        Self {
            to: None,
            from: None,
            id: None,
            version: None,
            namespace: ns::SERVER.to_string(),
            dialback_namespace: None,
            loopcheck: None,
        }
    }
}

impl StreamHeader {
    /// Major protocol version; `0` for pre-XMPP streams and for unparseable
    /// version strings.
    pub fn major_version(&self) -> u32 {
        self.version
            .as_deref()
            .and_then(|v| v.split('.').next())
            .and_then(|major| major.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Returns `true` if the header declares the dialback namespace prefix.
    pub fn declares_dialback(&self) -> bool {
        self.dialback_namespace.is_some()
    }
}

impl fmt::Display for StreamHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<?xml version='1.0'?><stream:stream xmlns:stream='{}' xmlns='{}'",
            ns::STREAM,
            escape(&self.namespace)
        )?;
        if let Some(db) = &self.dialback_namespace {
            write!(f, " xmlns:db='{}'", escape(db))?;
        }
        for (name, value) in [
            ("to", &self.to),
            ("from", &self.from),
            ("id", &self.id),
            ("version", &self.version),
        ] {
            if let Some(value) = value {
                write!(f, " {name}='{}'", escape(value))?;
            }
        }
        if let Some(token) = &self.loopcheck {
            write!(
                f,
                " xmlns:loop='{}' loop:check='{}'",
                ns::LOOPCHECK,
                escape(token)
            )?;
        }
        f.write_str(">")
    }
}

/// How alarming a stream error received from a peer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Routine shutdowns and timeouts.
    Normal,
    /// Usually a DNS or hosting misconfiguration on one side.
    Configuration,
    /// The peer lacks a feature we need (or the reverse).
    FeatureLack,
    Error,
}

macro_rules! conditions {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Defined stream error conditions.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum StreamErrorCondition {
            $($variant),+
        }

        impl StreamErrorCondition {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $name),+
                }
            }
        }

        impl FromStr for StreamErrorCondition {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    other => Err(ParseError::Condition(other.to_string())),
                }
            }
        }
    };
}

conditions! {
    BadFormat => "bad-format",
    BadNamespacePrefix => "bad-namespace-prefix",
    Conflict => "conflict",
    ConnectionTimeout => "connection-timeout",
    HostGone => "host-gone",
    HostUnknown => "host-unknown",
    ImproperAddressing => "improper-addressing",
    InternalServerError => "internal-server-error",
    InvalidFrom => "invalid-from",
    InvalidId => "invalid-id",
    InvalidNamespace => "invalid-namespace",
    InvalidXml => "invalid-xml",
    NotAuthorized => "not-authorized",
    PolicyViolation => "policy-violation",
    RemoteConnectionFailed => "remote-connection-failed",
    ResourceConstraint => "resource-constraint",
    RestrictedXml => "restricted-xml",
    SeeOtherHost => "see-other-host",
    SystemShutdown => "system-shutdown",
    UndefinedCondition => "undefined-condition",
    UnsupportedEncoding => "unsupported-encoding",
    UnsupportedStanzaType => "unsupported-stanza-type",
    UnsupportedVersion => "unsupported-version",
    XmlNotWellFormed => "xml-not-well-formed",
}

impl StreamErrorCondition {
    pub fn severity(self) -> ErrorSeverity {
        use StreamErrorCondition::*;
        match self {
            ConnectionTimeout | SystemShutdown | Conflict => ErrorSeverity::Normal,
            HostGone | HostUnknown | ImproperAddressing | RemoteConnectionFailed
            | SeeOtherHost | InvalidFrom | PolicyViolation => ErrorSeverity::Configuration,
            UnsupportedEncoding | UnsupportedStanzaType | UnsupportedVersion
            | InvalidNamespace | BadNamespacePrefix | RestrictedXml => ErrorSeverity::FeatureLack,
            _ => ErrorSeverity::Error,
        }
    }
}

impl fmt::Display for StreamErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `<stream:error>`: condition plus optional human-readable text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamError {
    pub condition: StreamErrorCondition,
    pub text: Option<String>,
}

impl StreamError {
    pub fn new(condition: StreamErrorCondition) -> Self {
        Self {
            condition,
            text: None,
        }
    }

    pub fn with_text(condition: StreamErrorCondition, text: impl Into<String>) -> Self {
        Self {
            condition,
            text: Some(text.into()),
        }
    }

    /// Reads a received `<stream:error>` element. Unknown or missing
    /// conditions map to `undefined-condition`.
    pub fn from_element(el: &Element) -> Self {
        let mut condition = StreamErrorCondition::UndefinedCondition;
        let mut text = None;
        for child in el.children() {
            if child.namespace() != ns::STREAM_ERRORS {
                continue;
            }
            if child.name() == "text" {
                text = Some(child.text());
            } else if let Ok(parsed) = child.name().parse() {
                condition = parsed;
            }
        }
        Self { condition, text }
    }

    pub fn to_element(&self) -> Element {
        let mut el = Element::new("error", ns::STREAM)
            .with_child(Element::new(self.condition.as_str(), ns::STREAM_ERRORS));
        if let Some(text) = &self.text {
            el = el.with_child(Element::new("text", ns::STREAM_ERRORS).with_text(text.clone()));
        }
        el
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.text {
            Some(text) => write!(f, "{}: {}", self.condition, text),
            None => write!(f, "{}", self.condition),
        }
    }
}
