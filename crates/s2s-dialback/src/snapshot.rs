//! Serializable view of the registries for status endpoints.

use std::time::Instant;

use serde::Serialize;

use crate::context::DialbackContext;
use crate::outbound::{ConnectionState, DialbackRequestState};

#[derive(Debug, Clone, Serialize)]
pub struct OutboundEstablished {
    pub destination: String,
    pub source: String,
    pub peer_ip: Option<String>,
    pub stanza_count: u64,
    pub idle_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundConnecting {
    pub destination: String,
    pub source: String,
    pub state: ConnectionState,
    pub request: DialbackRequestState,
    pub current_address: Option<String>,
    pub remaining_candidates: Vec<String>,
    pub stream_id: Option<String>,
    pub queued: usize,
    pub pending_verifies: usize,
    pub history: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InboundEstablished {
    pub challenge: String,
    pub destination: String,
    pub source: String,
    pub stanza_count: u64,
    pub idle_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InboundConnecting {
    pub challenge: String,
    pub claimed_source: Option<String>,
    pub claimed_destination: String,
    pub xmpp_version: u32,
    pub pending_results: usize,
}

/// Point-in-time listing of every federation connection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FederationSnapshot {
    pub outbound_established: Vec<OutboundEstablished>,
    pub outbound_connecting: Vec<OutboundConnecting>,
    pub inbound_established: Vec<InboundEstablished>,
    pub inbound_connecting: Vec<InboundConnecting>,
}

impl DialbackContext {
    pub fn snapshot(&self) -> FederationSnapshot {
        let now = Instant::now();

        let mut snapshot = FederationSnapshot {
            outbound_established: self
                .out_authorized
                .iter()
                .map(|(key, conn)| OutboundEstablished {
                    destination: key.destination.clone(),
                    source: key.source.clone(),
                    peer_ip: conn.peer_ip().map(str::to_string),
                    stanza_count: conn.stanza_count(),
                    idle_secs: conn.idle_for(now).as_secs(),
                })
                .collect(),
            outbound_connecting: self
                .out_connecting
                .iter()
                .map(|(key, conn)| OutboundConnecting {
                    destination: key.destination.clone(),
                    source: key.source.clone(),
                    state: conn.state(),
                    request: conn.request_state(),
                    current_address: conn.current_address(),
                    remaining_candidates: conn.remaining_candidates(),
                    stream_id: conn.stream_id().map(ToString::to_string),
                    queued: conn.queued(),
                    pending_verifies: conn.pending_verifies(),
                    history: conn.history(),
                })
                .collect(),
            inbound_established: self
                .in_authorized
                .iter()
                .map(|(key, conn)| InboundEstablished {
                    challenge: key.challenge.to_string(),
                    destination: key.destination.clone(),
                    source: key.source.clone(),
                    stanza_count: conn.stanza_count(),
                    idle_secs: conn.idle_for(now).as_secs(),
                })
                .collect(),
            inbound_connecting: self
                .in_pending
                .iter()
                .map(|(challenge, pending)| InboundConnecting {
                    challenge: challenge.to_string(),
                    claimed_source: pending.claimed_source.clone(),
                    claimed_destination: pending.claimed_destination.clone(),
                    xmpp_version: pending.xmpp_version,
                    pending_results: pending.pending_results.len(),
                })
                .collect(),
        };

        snapshot
            .outbound_established
            .sort_by(|a, b| (&a.destination, &a.source).cmp(&(&b.destination, &b.source)));
        snapshot
            .outbound_connecting
            .sort_by(|a, b| (&a.destination, &a.source).cmp(&(&b.destination, &b.source)));
        snapshot
            .inbound_established
            .sort_by(|a, b| (&a.source, &a.challenge).cmp(&(&b.source, &b.challenge)));
        snapshot
            .inbound_connecting
            .sort_by(|a, b| a.challenge.cmp(&b.challenge));
        snapshot
    }
}
