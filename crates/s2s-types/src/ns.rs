//! XML namespaces used on server-to-server streams.

/// Default namespace of a server-to-server stream.
pub const SERVER: &str = "jabber:server";

/// Namespace of `db:result` and `db:verify` elements.
pub const DIALBACK: &str = "jabber:server:dialback";

/// Namespace of the `stream:stream`, `stream:features` and `stream:error` elements.
pub const STREAM: &str = "http://etherx.jabber.org/streams";

/// Namespace of stream error conditions and their `<text/>`.
pub const STREAM_ERRORS: &str = "urn:ietf:params:xml:ns:xmpp-streams";

pub const TLS: &str = "urn:ietf:params:xml:ns:xmpp-tls";

pub const SASL: &str = "urn:ietf:params:xml:ns:xmpp-sasl";

/// Namespace of the loop-detection attribute carried on stream headers.
pub const LOOPCHECK: &str = "http://jabberd.org/ns/loopcheck";
