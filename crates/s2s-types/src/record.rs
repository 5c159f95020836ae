//! Accounting records emitted when an authorized connection goes away.

use serde::Serialize;
use std::time::Duration;

use crate::policy::Direction;

/// One closed (or idled-out) authorized server-to-server connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionRecord {
    /// The remote domain.
    pub peer_domain: String,
    pub direction: Direction,
    /// Stanzas carried while authorized.
    pub stanza_count: u64,
    pub peer_ip: Option<String>,
    /// Time between authorization and unregistration.
    #[serde(rename = "duration_secs", serialize_with = "as_secs")]
    pub duration: Duration,
}

fn as_secs<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_secs())
}
