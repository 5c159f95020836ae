//! Periodic timeout enforcement.
//!
//! One pass handles three timers: idle authorized connections, streams that
//! never finished authenticating, and queued stanzas that waited too long.

use std::time::Instant;

use s2s_types::{ChallengeId, Direction, ResultKey, RouteKey};
use serde::Serialize;

use crate::context::DialbackContext;
use crate::inbound::InboundPhase;
use crate::transport::{close_gracefully, TransportId};

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub idle_outbound: usize,
    pub idle_inbound: usize,
    pub auth_timeouts: usize,
    pub bounced: usize,
    pub retired: usize,
}

impl DialbackContext {
    pub fn sweep(&mut self) -> SweepReport {
        self.sweep_at(Instant::now())
    }

    /// Runs the sweep as if the current time were `now`.
    pub fn sweep_at(&mut self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        self.sweep_idle(now, &mut report);
        self.sweep_unauthenticated(now, &mut report);
        self.sweep_queues(now, &mut report);
        if report != SweepReport::default() {
            tracing::debug!(?report, "sweep finished");
        }
        report
    }

    fn sweep_idle(&mut self, now: Instant, report: &mut SweepReport) {
        let timeout = self.shared.settings.idle_timeout;

        let idle_out: Vec<RouteKey> = self
            .out_authorized
            .iter()
            .filter(|(_, conn)| conn.idle_for(now) >= timeout)
            .map(|(key, _)| key.clone())
            .collect();
        for key in idle_out {
            tracing::info!(route = %key, "closing idle outbound stream");
            if self.unregister_outbound(&key) {
                report.idle_outbound += 1;
            }
        }

        let idle_in: Vec<ResultKey> = self
            .in_authorized
            .iter()
            .filter(|(_, conn)| conn.idle_for(now) >= timeout)
            .map(|(key, _)| key.clone())
            .collect();
        for key in idle_in {
            tracing::info!(%key, "closing idle inbound authorization");
            if self.unregister_inbound(&key) {
                report.idle_inbound += 1;
            }
        }

        let idle_legacy: Vec<TransportId> = self
            .inbound
            .iter()
            .filter(|(_, stream)| match &stream.phase {
                InboundPhase::Legacy { connection, .. } => connection.idle_for(now) >= timeout,
                _ => false,
            })
            .map(|(id, _)| *id)
            .collect();
        for id in idle_legacy {
            let Some(stream) = self.inbound.remove(&id) else {
                continue;
            };
            if let InboundPhase::Legacy { peer, connection } = stream.phase {
                tracing::info!(%peer, "closing idle legacy stream");
                self.shared
                    .accounting
                    .record(connection.record(&peer, Direction::Inbound));
                close_gracefully(stream.transport.as_ref());
                report.idle_inbound += 1;
            }
        }
    }

    fn sweep_unauthenticated(&mut self, now: Instant, report: &mut SweepReport) {
        let timeout = self.shared.settings.auth_timeout;

        // Streams carrying an authorization stay open until they go idle.
        let stale: Vec<ChallengeId> = self
            .in_pending
            .iter()
            .filter(|(_, pending)| pending.age(now) >= timeout)
            .filter(|(_, pending)| {
                let id = pending.transport.id();
                !self.in_authorized.iter().any(|(_, c)| c.transport_id() == id)
            })
            .map(|(challenge, _)| challenge.clone())
            .collect();
        for challenge in stale {
            if let Some(pending) = self.in_pending.unregister(&challenge) {
                tracing::info!(
                    %challenge,
                    peer = ?pending.claimed_source,
                    "inbound stream did not authenticate in time"
                );
                pending.transport.close();
                report.auth_timeouts += 1;
            }
        }

        let silent: Vec<TransportId> = self
            .inbound
            .iter()
            .filter(|(_, stream)| {
                matches!(stream.phase, InboundPhase::AwaitingRoot)
                    && now.saturating_duration_since(stream.since) >= timeout
            })
            .map(|(id, _)| *id)
            .collect();
        for id in silent {
            let Some(stream) = self.inbound.remove(&id) else {
                continue;
            };
            // Authorizations granted before a restart go with the stream.
            self.in_authorized
                .unregister_where(|_, conn| conn.transport_id() == id);
            tracing::info!(transport = %id, "inbound stream sent no header in time");
            stream.transport.close();
            report.auth_timeouts += 1;
        }

        let attempts: Vec<RouteKey> = self
            .out_connecting
            .iter()
            .filter(|(_, conn)| conn.attempt().is_some() && conn.attempt_age(now) >= timeout)
            .map(|(key, _)| key.clone())
            .collect();
        for key in attempts {
            if let Some(transport) = self.out_connecting.get(&key).and_then(|c| c.attempt()) {
                tracing::info!(route = %key, "outbound stream did not authorize in time");
                transport.close();
                report.auth_timeouts += 1;
            }
        }
    }

    fn sweep_queues(&mut self, now: Instant, report: &mut SweepReport) {
        let timeout = self.shared.settings.queue_timeout;
        let keys: Vec<RouteKey> = self.out_connecting.keys().cloned().collect();

        for key in keys {
            let Some(conn) = self.out_connecting.get_mut(&key) else {
                continue;
            };
            let expired = conn.expire_queue(now, timeout);
            if !expired.is_empty() {
                let reason = conn.timeout_reason();
                tracing::info!(route = %key, count = expired.len(), %reason, "bouncing stanzas after queue timeout");
                report.bounced += expired.len();
                for stanza in expired {
                    self.shared.router.deliver_fail(stanza, &reason);
                }
            }

            let abandoned = self
                .out_connecting
                .get(&key)
                .is_some_and(|conn| conn.is_idle() && !conn.has_live_transport());
            if abandoned {
                self.retire_outbound(&key);
                report.retired += 1;
            }
        }
    }
}
