//! Parse errors for the textual forms of shared types.

/// Errors produced when parsing configuration values or protocol identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// A TLS requirement was not `no`, `force` or a numeric protection level.
    #[error("invalid TLS requirement '{0}' (expected \"no\", \"force\" or a protection level)")]
    TlsRequirement(String),

    /// An auth requirement was not `db` or `sasl`.
    #[error("invalid auth requirement '{0}' (expected \"db\" or \"sasl\")")]
    AuthRequirement(String),

    /// An XMPP version requirement was not `no` or `force`.
    #[error("invalid XMPP version requirement '{0}' (expected \"no\" or \"force\")")]
    XmppRequirement(String),

    /// A JID could not be parsed.
    #[error("invalid JID '{0}'")]
    Jid(String),

    /// A direction was not `in` or `out`.
    #[error("invalid direction '{0}' (expected \"in\" or \"out\")")]
    Direction(String),

    /// A stream error condition name is not defined.
    #[error("unknown stream error condition '{0}'")]
    Condition(String),
}
