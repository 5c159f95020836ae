//! The per-instance dialback context.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use s2s_types::{
    ChallengeId, Direction, ErrorSeverity, ResultKey, RouteKey, StreamError, DEFAULT_S2S_PORT,
};

use crate::inbound::{InboundPendingConnection, InboundStream};
use crate::key::{generate_secret, loopcheck_token};
use crate::outbound::OutboundConnection;
use crate::policy::PolicyChecker;
use crate::registry::{AuthorizedConnection, InboundAccounting, OutboundRouting, Registry};
use crate::router::{AccountingSink, Router};
use crate::transport::{close_gracefully, Connector, TransportId};

/// Tunables of one dialback instance.
#[derive(Debug, Clone)]
pub struct DialbackSettings {
    /// Shared secret for key derivation.
    pub secret: String,
    /// Accept pre-dialback streams without authentication.
    pub allow_legacy: bool,
    pub idle_timeout: Duration,
    pub queue_timeout: Duration,
    /// Limit on unauthenticated streams and pending outbound attempts.
    pub auth_timeout: Duration,
    pub connect_timeout: Duration,
    pub default_port: u16,
}

impl Default for DialbackSettings {
    fn default() -> Self {
        Self {
            secret: generate_secret(),
            allow_legacy: false,
            idle_timeout: Duration::from_secs(900),
            queue_timeout: Duration::from_secs(30),
            auth_timeout: Duration::from_secs(900),
            connect_timeout: Duration::from_secs(20),
            default_port: DEFAULT_S2S_PORT,
        }
    }
}

impl DialbackSettings {
    /// How often the host should call [`DialbackContext::sweep`]: every minute,
    /// or more often when a timeout is shorter than that.
    pub fn sweep_interval(&self) -> Duration {
        let shortest = self.idle_timeout.min(self.auth_timeout);
        if shortest < Duration::from_secs(60) {
            shortest.max(Duration::from_secs(1))
        } else {
            Duration::from_secs(60)
        }
    }
}

/// The external collaborators a context reports to.
#[derive(Clone)]
pub struct Collaborators {
    pub router: Arc<dyn Router>,
    pub connector: Arc<dyn Connector>,
    pub accounting: Arc<dyn AccountingSink>,
}

/// What `handle_outbound` did with a stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Written to an authorized stream.
    Sent,
    /// Waiting for the connection to be authorized.
    Queued,
    /// `db:verify` written to a live stream.
    VerifySent,
    /// `db:verify` held until a stream exists.
    VerifyQueued,
    /// `db:verify` could not be sent and was resolved as failed.
    VerifyFailed,
    /// Returned to the sender through `deliver_fail`.
    Bounced,
}

/// State shared by every component: settings, policy and collaborators.
pub(crate) struct Shared {
    pub settings: DialbackSettings,
    pub policy: PolicyChecker,
    pub loop_token: String,
    pub router: Arc<dyn Router>,
    pub connector: Arc<dyn Connector>,
    pub accounting: Arc<dyn AccountingSink>,
}

/// One federation instance: secret, policy, and the connection registries.
///
/// All methods run to completion without blocking; drive the context from a
/// single event loop.
pub struct DialbackContext {
    pub(crate) shared: Shared,
    /// Outbound connections still negotiating.
    pub(crate) out_connecting: Registry<RouteKey, OutboundConnection>,
    pub(crate) out_authorized: Registry<RouteKey, AuthorizedConnection, OutboundRouting>,
    /// Inbound streams that announced a challenge.
    pub(crate) in_pending: Registry<ChallengeId, InboundPendingConnection>,
    pub(crate) in_authorized: Registry<ResultKey, AuthorizedConnection, InboundAccounting>,
    pub(crate) inbound: HashMap<TransportId, InboundStream>,
    pub(crate) out_attempts: HashMap<TransportId, RouteKey>,
    pub(crate) out_established: HashMap<TransportId, RouteKey>,
}

impl DialbackContext {
    pub fn new(settings: DialbackSettings, policy: PolicyChecker, collaborators: Collaborators) -> Self {
        let loop_token = loopcheck_token(&settings.secret);
        let Collaborators {
            router,
            connector,
            accounting,
        } = collaborators;
        Self {
            out_authorized: Registry::new(OutboundRouting::new(router.clone(), accounting.clone())),
            in_authorized: Registry::new(InboundAccounting::new(accounting.clone())),
            out_connecting: Registry::new(()),
            in_pending: Registry::new(()),
            inbound: HashMap::new(),
            out_attempts: HashMap::new(),
            out_established: HashMap::new(),
            shared: Shared {
                settings,
                policy,
                loop_token,
                router,
                connector,
                accounting,
            },
        }
    }

    pub fn settings(&self) -> &DialbackSettings {
        &self.shared.settings
    }

    pub fn policy(&self) -> &PolicyChecker {
        &self.shared.policy
    }

    pub fn is_connecting(&self, key: &RouteKey) -> bool {
        self.out_connecting.contains(key)
    }

    pub fn outbound_connection(&self, key: &RouteKey) -> Option<&OutboundConnection> {
        self.out_connecting.get(key)
    }

    pub fn is_authorized_outbound(&self, key: &RouteKey) -> bool {
        self.out_authorized.contains(key)
    }

    pub fn is_authorized_inbound(&self, key: &ResultKey) -> bool {
        self.in_authorized.contains(key)
    }

    /// Address cached for `domain` by the last authorized outbound stream.
    pub fn cached_address(&self, domain: &str) -> Option<&str> {
        self.out_authorized.hooks().cached_ip(domain)
    }

    /// Removes an authorized outbound route and closes its stream.
    ///
    /// Returns `false`, with no side effects, when nothing is registered.
    pub fn unregister_outbound(&mut self, key: &RouteKey) -> bool {
        let Some(entry) = self.out_authorized.unregister(key) else {
            return false;
        };
        self.out_established.remove(&entry.transport_id());
        close_gracefully(entry.transport().as_ref());
        true
    }

    /// Removes an authorized inbound pair. The stream is closed once no
    /// other pair is authorized on it.
    pub fn unregister_inbound(&mut self, key: &ResultKey) -> bool {
        let Some(entry) = self.in_authorized.unregister(key) else {
            return false;
        };
        let id = entry.transport_id();
        if !self.in_authorized.iter().any(|(_, c)| c.transport_id() == id) {
            close_gracefully(entry.transport().as_ref());
        }
        true
    }
}

/// Logs a stream error received from a peer at a level matching its severity.
pub(crate) fn log_peer_stream_error(peer: &str, direction: Direction, error: &StreamError) {
    match error.condition.severity() {
        ErrorSeverity::Normal => {
            tracing::debug!(peer, %direction, %error, "peer closed stream")
        }
        ErrorSeverity::Configuration => {
            tracing::warn!(peer, %direction, %error, "peer reported a configuration problem")
        }
        ErrorSeverity::FeatureLack => {
            tracing::info!(peer, %direction, %error, "peer lacks a required feature")
        }
        ErrorSeverity::Error => {
            tracing::error!(peer, %direction, %error, "peer reported a stream error")
        }
    }
}
