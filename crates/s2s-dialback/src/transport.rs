//! The boundary to the external stream layer.
//!
//! Sockets, TLS and XML parsing belong to the embedding application. It hands
//! the core a [`Transport`] handle per stream and feeds [`StreamEvent`]s back
//! in; the core answers by writing [`Frame`]s and asking for stream resets,
//! TLS upgrades or closes. Handles are shared, never owned: the stream layer
//! decides when a socket is really gone and reports it with
//! [`StreamEvent::Closed`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use s2s_types::{Element, ProtectionLevel, RouteKey, StreamError, StreamHeader};
use serde::Serialize;

/// Identifier the stream layer assigns to each transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TransportId(pub u64);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Something to put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Opening `<stream:stream>` tag.
    Header(StreamHeader),
    Element(Element),
    /// `<stream:error>`; the core follows it with a close.
    Error(StreamError),
    /// Closing `</stream:stream>` tag.
    Close,
}

/// Side of a TLS handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsRole {
    Client,
    Server,
}

/// Lifecycle events reported by the stream layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// An outbound connect succeeded (or an inbound socket was accepted).
    Connected,
    /// The peer's stream header arrived.
    Root(StreamHeader),
    /// A complete top-level element arrived.
    Element(Element),
    /// The stream is gone. `error` carries the connect or I/O error text.
    Closed { error: Option<String> },
}

/// A live (or connecting) stream, owned by the stream layer.
///
/// Every method must return without blocking. `close` must be idempotent.
pub trait Transport: Send + Sync {
    fn id(&self) -> TransportId;

    /// Queues a frame for writing.
    fn send(&self, frame: Frame);

    /// Flushes pending writes and closes the socket, then reports
    /// [`StreamEvent::Closed`].
    fn close(&self);

    /// Restarts the XML parser so the next event is a fresh `Root`.
    fn reset_stream(&self);

    /// Whether TLS is configured for `local_domain` and this stream is not
    /// already encrypted.
    fn starttls_available(&self, local_domain: &str) -> bool;

    /// Starts the TLS handshake. Returns `false` if it could not be started.
    fn start_tls(&self, role: TlsRole, local_domain: &str) -> bool;

    fn protection_level(&self) -> ProtectionLevel;

    /// Whether the peer presented a valid certificate for `domain`.
    fn peer_certificate_matches(&self, domain: &str) -> bool;

    /// Remote address for diagnostics and accounting.
    fn peer_ip(&self) -> Option<String>;
}

/// Where to open an outbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub route: RouteKey,
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

/// Opens outbound streams.
///
/// `connect` returns immediately with a handle; the outcome arrives later as
/// `Connected` or `Closed { error }` through
/// [`DialbackContext::handle_outbound_transport_event`](crate::DialbackContext::handle_outbound_transport_event).
pub trait Connector: Send + Sync {
    fn connect(&self, target: &ConnectTarget) -> Arc<dyn Transport>;
}

/// Writes a stream error and closes the stream.
pub(crate) fn fatal(transport: &dyn Transport, error: StreamError) {
    transport.send(Frame::Error(error));
    transport.close();
}

/// Writes the closing tag and closes the stream.
pub(crate) fn close_gracefully(transport: &dyn Transport) {
    transport.send(Frame::Close);
    transport.close();
}
