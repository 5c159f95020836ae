//! Collaborators the core reports to: the stanza router and the accounting sink.

use s2s_types::{ConnectionRecord, Element};

/// The local stanza router.
///
/// Implementations must not call back into the [`DialbackContext`](crate::DialbackContext)
/// synchronously; queue the work and feed it back in from the event loop.
pub trait Router: Send + Sync {
    /// Hands a stanza to local routing. Used for stanzas received on
    /// authorized inbound streams and for `db:verify` requests that still need
    /// address resolution (these come back through `handle_outbound`).
    fn deliver(&self, stanza: Element);

    /// Returns an undeliverable stanza to its sender with a human-readable reason.
    fn deliver_fail(&self, stanza: Element, reason: &str);

    /// This instance now routes traffic for `domain`.
    fn register_route(&self, domain: &str);

    /// This instance no longer routes traffic for `domain`.
    fn unregister_route(&self, domain: &str);
}

/// Receives one record per authorized connection that goes away.
pub trait AccountingSink: Send + Sync {
    fn record(&self, record: ConnectionRecord);
}

/// Accounting sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAccounting;

impl AccountingSink for LogAccounting {
    fn record(&self, record: ConnectionRecord) {
        tracing::info!(
            peer = %record.peer_domain,
            direction = %record.direction,
            stanzas = record.stanza_count,
            ip = record.peer_ip.as_deref().unwrap_or("-"),
            duration_secs = record.duration.as_secs(),
            "s2s connection closed"
        );
    }
}
