//! Outbound connections: one negotiating stream per `(destination, source)`
//! pair, with the stanzas and verify requests waiting on it.
//!
//! Two independent axes describe a connection. [`ConnectionState`] tracks how
//! far the transport handshake got; [`DialbackRequestState`] tracks whether a
//! `db:result` is wanted, possible, or already sent. SASL and STARTTLS
//! restarts move the first axis back without touching the second.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use s2s_types::{
    ns, AuthMechanism, AuthRequirement, ChallengeId, Direction, Element, RouteKey, StreamError,
    StreamErrorCondition, StreamHeader, XmppRequirement,
};
use serde::Serialize;

use crate::address::{parse_candidates, Candidate};
use crate::context::{log_peer_stream_error, Delivery, DialbackContext, Shared};
use crate::key::derive_key;
use crate::policy::Handshake;
use crate::registry::AuthorizedConnection;
use crate::transport::{
    close_gracefully, fatal, ConnectTarget, Frame, StreamEvent, TlsRole, Transport,
};
use crate::wire::{self, DialbackElement};

/// Transport-level progress of an outbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Created,
    Connecting,
    Connected,
    GotStreamRoot,
    WaitingFeatures,
    GotFeatures,
    SentDbRequest,
    DbSucceeded,
    DbFailed,
    SaslStarted,
    SaslFailed,
    SaslSucceeded,
}

impl ConnectionState {
    /// Phrase used in bounce reasons ("... while {description}: ...").
    pub fn describe(self) -> &'static str {
        match self {
            Self::Created => "connection object just created",
            Self::Connecting => "connecting to other host",
            Self::Connected => "connected to other host",
            Self::GotStreamRoot => "got the stream root",
            Self::WaitingFeatures => "waiting for stream features on XMPP stream",
            Self::GotFeatures => "got stream features on XMPP stream",
            Self::SentDbRequest => "sent out dialback request",
            Self::DbSucceeded => "dialback succeeded",
            Self::DbFailed => "dialback failed",
            Self::SaslStarted => "started using SASL",
            Self::SaslFailed => "failed to auth using SASL",
            Self::SaslSucceeded => "SASL succeeded",
        }
    }
}

/// Whether a `db:result` should be sent on the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DialbackRequestState {
    /// Only verify traffic so far; nothing to authorize.
    NotRequested,
    /// The stream is ready; a request can be sent as soon as it is wanted.
    CouldRequest,
    /// Stanzas are waiting; send the request once the stream is ready.
    WantRequest,
    SentRequest,
}

struct QueuedStanza {
    stanza: Element,
    queued_at: Instant,
}

/// What the context must do after a connection handled an event.
pub(crate) enum Step {
    Continue,
    /// Move the connection into the outbound-authorized registry.
    Authorize,
    /// Give up on this connection now, without trying further candidates.
    Fail,
    /// A `db:verify` arrived on the stream.
    Verify(Element),
}

/// A negotiating outbound connection.
pub struct OutboundConnection {
    key: RouteKey,
    state: ConnectionState,
    request: DialbackRequestState,
    candidates: VecDeque<Candidate>,
    current: Option<Candidate>,
    /// The transport of the current attempt.
    attempt: Option<Arc<dyn Transport>>,
    attempt_started: Instant,
    /// Set once the stream may carry dialback elements.
    transport: Option<Arc<dyn Transport>>,
    stream_id: Option<ChallengeId>,
    xmpp_version: u32,
    pending_verifies: Vec<Element>,
    queue: VecDeque<QueuedStanza>,
    history: Vec<String>,
    /// Local policy refused the peer; retrying other addresses cannot help.
    settings_failed: bool,
}

impl OutboundConnection {
    pub(crate) fn new(
        key: RouteKey,
        candidates: VecDeque<Candidate>,
        request: DialbackRequestState,
        now: Instant,
    ) -> Self {
        Self {
            key,
            state: ConnectionState::Created,
            request,
            candidates,
            current: None,
            attempt: None,
            attempt_started: now,
            transport: None,
            stream_id: None,
            xmpp_version: 0,
            pending_verifies: Vec::new(),
            queue: VecDeque::new(),
            history: Vec::new(),
            settings_failed: false,
        }
    }

    pub fn key(&self) -> &RouteKey {
        &self.key
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn request_state(&self) -> DialbackRequestState {
        self.request
    }

    pub fn stream_id(&self) -> Option<&ChallengeId> {
        self.stream_id.as_ref()
    }

    pub fn xmpp_version(&self) -> u32 {
        self.xmpp_version
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_verifies(&self) -> usize {
        self.pending_verifies.len()
    }

    /// Addresses not yet tried.
    pub fn remaining_candidates(&self) -> Vec<String> {
        self.candidates.iter().map(ToString::to_string).collect()
    }

    pub fn current_address(&self) -> Option<String> {
        self.current.as_ref().map(ToString::to_string)
    }

    /// Per-address attempt log, joined with ` / `.
    pub fn history(&self) -> String {
        self.history.join(" / ")
    }

    pub(crate) fn attempt(&self) -> Option<&Arc<dyn Transport>> {
        self.attempt.as_ref()
    }

    pub(crate) fn attempt_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.attempt_started)
    }

    pub(crate) fn has_live_transport(&self) -> bool {
        self.transport.is_some()
    }

    /// Another address is worth trying: one is left, policy did not refuse
    /// the peer, and something still waits on the connection.
    pub(crate) fn can_retry(&self) -> bool {
        !self.settings_failed && !self.candidates.is_empty() && !self.is_idle()
    }

    fn note(&mut self, text: &str) {
        if let Some(last) = self.history.last_mut() {
            last.push_str(text);
        }
    }

    /// Opens a stream to the next candidate. Returns `None` when none is left.
    pub(crate) fn connect_next(
        &mut self,
        shared: &Shared,
        now: Instant,
    ) -> Option<Arc<dyn Transport>> {
        let candidate = self.candidates.pop_front()?;
        self.history.push(format!("{candidate}: "));
        self.state = ConnectionState::Connecting;
        self.stream_id = None;
        self.transport = None;
        self.xmpp_version = 0;
        // A request sent on a dead stream has to be repeated on the new one.
        self.request = match self.request {
            DialbackRequestState::SentRequest => DialbackRequestState::WantRequest,
            DialbackRequestState::CouldRequest => DialbackRequestState::NotRequested,
            other => other,
        };

        tracing::debug!(route = %self.key, address = %candidate, "connecting to peer");
        let transport = shared.connector.connect(&ConnectTarget {
            route: self.key.clone(),
            host: candidate.host.clone(),
            port: candidate.port,
            timeout: shared.settings.connect_timeout,
        });
        self.current = Some(candidate);
        self.attempt = Some(transport.clone());
        self.attempt_started = now;
        Some(transport)
    }

    pub(crate) fn enqueue(&mut self, stanza: Element, now: Instant) {
        self.queue.push_back(QueuedStanza {
            stanza,
            queued_at: now,
        });
    }

    /// Sends a verify request now if the stream allows it, else holds it.
    /// Returns `true` if it was sent.
    pub(crate) fn add_verify(&mut self, verify: Element) -> bool {
        match &self.transport {
            Some(transport) => {
                transport.send(Frame::Element(verify));
                true
            }
            None => {
                self.pending_verifies.push(verify);
                false
            }
        }
    }

    /// A stanza needs this pair authorized.
    pub(crate) fn want_request(&mut self, shared: &Shared) {
        match self.request {
            DialbackRequestState::NotRequested => self.request = DialbackRequestState::WantRequest,
            DialbackRequestState::CouldRequest => self.send_request(shared),
            DialbackRequestState::WantRequest | DialbackRequestState::SentRequest => {}
        }
    }

    fn send_request(&mut self, shared: &Shared) {
        let (Some(transport), Some(id)) = (self.transport.clone(), self.stream_id.clone()) else {
            self.request = DialbackRequestState::WantRequest;
            return;
        };
        let key = derive_key(
            &shared.settings.secret,
            &self.key.destination,
            &self.key.source,
            id.as_str(),
        );
        transport.send(Frame::Element(wire::db_result(
            &self.key.destination,
            &self.key.source,
            &key,
        )));
        self.request = DialbackRequestState::SentRequest;
        self.state = ConnectionState::SentDbRequest;
        tracing::debug!(route = %self.key, "sent dialback request");
    }

    /// The stream is ready for dialback: send or defer the request and flush
    /// held verify requests. Shared by pre-XMPP and XMPP 1.0 streams.
    fn ready_for_dialback(&mut self, shared: &Shared) {
        self.transport = self.attempt.clone();
        match self.request {
            DialbackRequestState::WantRequest => self.send_request(shared),
            DialbackRequestState::NotRequested => {
                self.request = DialbackRequestState::CouldRequest;
            }
            DialbackRequestState::CouldRequest | DialbackRequestState::SentRequest => {}
        }
        if let Some(transport) = &self.transport {
            for verify in self.pending_verifies.drain(..) {
                transport.send(Frame::Element(verify));
            }
        }
    }

    fn write_header(&self, shared: &Shared, transport: &dyn Transport) {
        let policy = shared.policy.lookup(&self.key.destination);
        transport.send(Frame::Header(StreamHeader {
            to: Some(self.key.destination.clone()),
            from: Some(self.key.source.clone()),
            version: (policy.xmpp != XmppRequirement::Disabled).then(|| "1.0".to_string()),
            dialback_namespace: (policy.auth != AuthRequirement::SaslOnly)
                .then(|| ns::DIALBACK.to_string()),
            loopcheck: Some(shared.loop_token.clone()),
            ..StreamHeader::default()
        }));
    }

    fn check_policy(
        &mut self,
        shared: &Shared,
        transport: &dyn Transport,
        mechanism: AuthMechanism,
    ) -> bool {
        let verdict = shared.policy.check(&Handshake {
            peer: &self.key.destination,
            local: &self.key.source,
            direction: Direction::Outbound,
            mechanism,
            protection: transport.protection_level(),
            xmpp_version: self.xmpp_version,
        });
        match verdict {
            Ok(()) => true,
            Err(violation) => {
                self.settings_failed = true;
                fatal(
                    transport,
                    StreamError::with_text(
                        StreamErrorCondition::PolicyViolation,
                        violation.to_string(),
                    ),
                );
                false
            }
        }
    }

    pub(crate) fn on_connected(&mut self, shared: &Shared, transport: &dyn Transport) -> Step {
        if self.state != ConnectionState::SaslSucceeded {
            if self.state != ConnectionState::Connected {
                self.note("Connected");
            }
            self.state = ConnectionState::Connected;
        }
        self.write_header(shared, transport);
        Step::Continue
    }

    pub(crate) fn on_root(
        &mut self,
        shared: &Shared,
        transport: &dyn Transport,
        header: &StreamHeader,
        own_challenge: bool,
    ) -> Step {
        let sasl_restart = self.state == ConnectionState::SaslSucceeded;
        if !sasl_restart {
            self.state = ConnectionState::GotStreamRoot;
        }

        let Some(id) = header.id.as_deref().filter(|id| !id.is_empty()) else {
            self.note(" (no stream id)");
            fatal(
                transport,
                StreamError::with_text(StreamErrorCondition::InvalidId, "a stream id is required"),
            );
            return Step::Continue;
        };
        if own_challenge {
            tracing::warn!(route = %self.key, "outbound stream looped back to this server");
            self.note(" (connected to ourselves)");
            fatal(
                transport,
                StreamError::with_text(
                    StreamErrorCondition::InternalServerError,
                    "this server connected to itself",
                ),
            );
            return Step::Continue;
        }
        self.stream_id = Some(ChallengeId::new(id));
        self.xmpp_version = header.major_version();

        if sasl_restart {
            return if self.check_policy(shared, transport, AuthMechanism::Sasl) {
                Step::Continue
            } else {
                Step::Fail
            };
        }

        if self.xmpp_version >= 1 {
            self.state = ConnectionState::WaitingFeatures;
            return Step::Continue;
        }

        if !header.declares_dialback() {
            self.note(" (peer supports neither dialback nor XMPP 1.0)");
            fatal(
                transport,
                StreamError::with_text(
                    StreamErrorCondition::NotAuthorized,
                    "Legacy Access Denied!",
                ),
            );
            return Step::Fail;
        }

        // Pre-XMPP peers send no features: decide right away.
        if !self.check_policy(shared, transport, AuthMechanism::Dialback) {
            return Step::Fail;
        }
        self.ready_for_dialback(shared);
        Step::Continue
    }

    pub(crate) fn on_element(
        &mut self,
        shared: &Shared,
        transport: &dyn Transport,
        el: Element,
    ) -> Step {
        match (el.namespace(), el.name()) {
            (ns::STREAM, "features") => self.on_features(shared, transport, &el),
            (ns::STREAM, "error") => {
                let error = StreamError::from_element(&el);
                self.note(&format!(" ({error})"));
                log_peer_stream_error(&self.key.destination, Direction::Outbound, &error);
                transport.close();
                Step::Continue
            }
            (ns::TLS, "proceed") => {
                if transport.start_tls(TlsRole::Client, &self.key.source) {
                    self.state = ConnectionState::Connected;
                    transport.reset_stream();
                    self.write_header(shared, transport);
                } else {
                    tracing::warn!(route = %self.key, "could not start TLS after proceed");
                    self.note(" (TLS handshake could not be started)");
                    transport.close();
                }
                Step::Continue
            }
            (ns::TLS, "failure") => {
                tracing::warn!(route = %self.key, "peer refused STARTTLS");
                self.note(" (STARTTLS refused)");
                close_gracefully(transport);
                Step::Continue
            }
            (ns::SASL, "success") => {
                self.state = ConnectionState::SaslSucceeded;
                transport.reset_stream();
                self.write_header(shared, transport);
                Step::Continue
            }
            (ns::SASL, "failure") => {
                self.state = ConnectionState::SaslFailed;
                self.note(" (SASL EXTERNAL auth failed)");
                tracing::warn!(route = %self.key, failure = %el, "SASL EXTERNAL refused by peer");
                close_gracefully(transport);
                Step::Fail
            }
            (ns::DIALBACK, "result") => self.on_result(transport, &el),
            (ns::DIALBACK, "verify") => Step::Verify(el),
            _ => {
                fatal(
                    transport,
                    StreamError::with_text(
                        StreamErrorCondition::NotAuthorized,
                        "Not allowed to send data on this stream",
                    ),
                );
                Step::Continue
            }
        }
    }

    fn on_features(&mut self, shared: &Shared, transport: &dyn Transport, features: &Element) -> Step {
        if self.state == ConnectionState::SaslSucceeded {
            return Step::Authorize;
        }
        self.state = ConnectionState::GotFeatures;
        let policy = shared.policy.lookup(&self.key.destination);

        if wire::offers_starttls(features) {
            if policy.tls.allows_starttls() && transport.starttls_available(&self.key.source) {
                transport.send(Frame::Element(wire::starttls()));
                return Step::Continue;
            }
            tracing::debug!(route = %self.key, "peer offers STARTTLS, not using it");
        }

        if wire::offers_sasl_external(features) && policy.auth.permits(AuthMechanism::Sasl) {
            transport.send(Frame::Element(wire::sasl_auth_external(&self.key.source)));
            self.state = ConnectionState::SaslStarted;
            return Step::Continue;
        }

        if !self.check_policy(shared, transport, AuthMechanism::Dialback) {
            return Step::Fail;
        }
        self.ready_for_dialback(shared);
        Step::Continue
    }

    fn on_result(&mut self, transport: &dyn Transport, el: &Element) -> Step {
        if self.request != DialbackRequestState::SentRequest
            || self.state != ConnectionState::SentDbRequest
        {
            tracing::warn!(route = %self.key, state = ?self.state, "unrequested dialback result");
            self.note(" (unrequested dialback result)");
            fatal(
                transport,
                StreamError::with_text(
                    StreamErrorCondition::NotAuthorized,
                    "No dialback request is outstanding",
                ),
            );
            return Step::Continue;
        }

        let result = match DialbackElement::parse(el) {
            Ok(result)
                if result.from == self.key.destination && result.to == self.key.source =>
            {
                result
            }
            _ => {
                tracing::warn!(route = %self.key, result = %el, "dialback result for the wrong domains");
                self.note(" (invalid dialback result)");
                fatal(
                    transport,
                    StreamError::with_text(
                        StreamErrorCondition::NotAuthorized,
                        "Invalid Dialback Result",
                    ),
                );
                return Step::Continue;
            }
        };

        if result.is_valid() {
            self.state = ConnectionState::DbSucceeded;
            return Step::Authorize;
        }

        self.state = ConnectionState::DbFailed;
        self.note(&format!(
            " (dialback result: {})",
            result.kind.as_deref().unwrap_or("no type attribute")
        ));
        tracing::warn!(route = %self.key, "peer refused our dialback request");
        close_gracefully(transport);
        Step::Fail
    }

    pub(crate) fn on_closed(&mut self, error: Option<&str>) {
        if let Some(error) = error {
            self.note(error);
        }
        self.attempt = None;
        self.transport = None;
    }

    pub(crate) fn bounce_reason(&self) -> String {
        if self.settings_failed {
            "Failed to deliver stanza to other server because of configured stream parameters."
                .to_string()
        } else {
            format!(
                "Failed to deliver stanza to other server while {}: {}",
                self.state.describe(),
                self.history()
            )
        }
    }

    /// Removes and returns queued stanzas older than `timeout`.
    pub(crate) fn expire_queue(&mut self, now: Instant, timeout: Duration) -> Vec<Element> {
        let (expired, kept): (Vec<_>, Vec<_>) = self
            .queue
            .drain(..)
            .partition(|q| now.saturating_duration_since(q.queued_at) >= timeout);
        self.queue = kept.into();
        expired.into_iter().map(|q| q.stanza).collect()
    }

    pub(crate) fn timeout_reason(&self) -> String {
        format!(
            "Server connect timeout while {}: {}",
            self.state.describe(),
            self.history()
        )
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.pending_verifies.is_empty()
    }

    /// Consumes the connection, returning queued stanzas and held verifies.
    pub(crate) fn into_parts(self) -> (Vec<Element>, Vec<Element>) {
        (
            self.queue.into_iter().map(|q| q.stanza).collect(),
            self.pending_verifies,
        )
    }
}

impl DialbackContext {
    /// Sends a stanza (or a `db:verify` request) to a foreign domain.
    ///
    /// `resolved` is the candidate address list from the resolver, if any;
    /// without it the address cached from the last authorized stream is used.
    pub fn handle_outbound(&mut self, stanza: Element, resolved: Option<&str>) -> Delivery {
        let now = Instant::now();
        let is_verify = wire::is_verify(&stanza);

        let key = match wire::stanza_domains(&stanza) {
            Ok((destination, source)) => RouteKey::new(destination, source),
            Err(err) => {
                tracing::warn!(%err, stanza = %stanza, "outbound stanza has unusable addressing");
                if is_verify {
                    return Delivery::VerifyFailed;
                }
                self.shared
                    .router
                    .deliver_fail(stanza, "Invalid sender or recipient address");
                return Delivery::Bounced;
            }
        };

        if let Some(conn) = self.out_authorized.get_mut(&key) {
            conn.send(stanza, now);
            return if is_verify {
                Delivery::VerifySent
            } else {
                Delivery::Sent
            };
        }

        if !self.out_connecting.contains(&key) {
            let candidates = resolved
                .or_else(|| self.out_authorized.hooks().cached_ip(&key.destination))
                .map(|list| parse_candidates(list, self.shared.settings.default_port))
                .unwrap_or_default();
            if candidates.is_empty() {
                return self.undeliverable(stanza, &key);
            }

            let request = if is_verify {
                DialbackRequestState::NotRequested
            } else {
                DialbackRequestState::WantRequest
            };
            let mut conn = OutboundConnection::new(key.clone(), candidates, request, now);
            if let Some(transport) = conn.connect_next(&self.shared, now) {
                self.out_attempts.insert(transport.id(), key.clone());
            }
            self.out_connecting.register(key.clone(), conn);
        } else if !is_verify {
            if let Some(conn) = self.out_connecting.get_mut(&key) {
                conn.want_request(&self.shared);
            }
        }

        let Some(conn) = self.out_connecting.get_mut(&key) else {
            return self.undeliverable(stanza, &key);
        };
        if is_verify {
            if conn.add_verify(stanza) {
                Delivery::VerifySent
            } else {
                Delivery::VerifyQueued
            }
        } else {
            conn.enqueue(stanza, now);
            Delivery::Queued
        }
    }

    fn undeliverable(&mut self, stanza: Element, key: &RouteKey) -> Delivery {
        if wire::is_verify(&stanza) {
            tracing::warn!(route = %key, "no address for verify request");
            self.fail_verify(&stanza);
            return Delivery::VerifyFailed;
        }
        let reason = format!("No address known for {}", key.destination);
        self.shared.router.deliver_fail(stanza, &reason);
        Delivery::Bounced
    }

    /// Feeds an event of an outbound stream into the core.
    pub fn handle_outbound_transport_event(
        &mut self,
        transport: Arc<dyn Transport>,
        event: StreamEvent,
    ) {
        let id = transport.id();
        if let Some(key) = self.out_attempts.get(&id).cloned() {
            self.on_attempt_event(key, transport, event);
        } else if let Some(key) = self.out_established.get(&id).cloned() {
            self.on_established_event(key, transport, event);
        } else {
            tracing::debug!(transport = %id, ?event, "event for unknown outbound stream");
        }
    }

    fn on_attempt_event(&mut self, key: RouteKey, transport: Arc<dyn Transport>, event: StreamEvent) {
        let own_challenge = match &event {
            StreamEvent::Root(header) => header
                .id
                .as_deref()
                .is_some_and(|id| self.in_pending.contains(&ChallengeId::from(id))),
            _ => false,
        };

        let Some(conn) = self.out_connecting.get_mut(&key) else {
            self.out_attempts.remove(&transport.id());
            return;
        };

        let step = match event {
            StreamEvent::Connected => conn.on_connected(&self.shared, transport.as_ref()),
            StreamEvent::Root(header) => {
                conn.on_root(&self.shared, transport.as_ref(), &header, own_challenge)
            }
            StreamEvent::Element(el) => conn.on_element(&self.shared, transport.as_ref(), el),
            StreamEvent::Closed { error } => {
                conn.on_closed(error.as_deref());
                self.out_attempts.remove(&transport.id());
                self.advance_or_retire(&key);
                return;
            }
        };

        match step {
            Step::Continue => {}
            Step::Authorize => self.authorize_outbound(&key),
            Step::Fail => self.retire_outbound(&key),
            Step::Verify(el) => self.handle_verify_element(&transport, &el),
        }
    }

    fn on_established_event(&mut self, key: RouteKey, transport: Arc<dyn Transport>, event: StreamEvent) {
        let id = transport.id();
        match event {
            StreamEvent::Element(el) if wire::is_verify(&el) => {
                if let Some(conn) = self.out_authorized.get_mut(&key) {
                    conn.record_traffic(Instant::now());
                }
                self.handle_verify_element(&transport, &el);
            }
            StreamEvent::Element(el) => {
                if el.is("error", ns::STREAM) {
                    let error = StreamError::from_element(&el);
                    log_peer_stream_error(&key.destination, Direction::Outbound, &error);
                    transport.close();
                } else {
                    fatal(
                        transport.as_ref(),
                        StreamError::with_text(
                            StreamErrorCondition::UndefinedCondition,
                            "only dialback verification is accepted on this stream",
                        ),
                    );
                }
                self.out_established.remove(&id);
                self.out_authorized
                    .unregister_where(|k, c| *k == key && c.transport_id() == id);
            }
            StreamEvent::Closed { .. } => {
                self.out_established.remove(&id);
                self.out_authorized
                    .unregister_where(|k, c| *k == key && c.transport_id() == id);
            }
            StreamEvent::Connected | StreamEvent::Root(_) => {
                tracing::debug!(route = %key, "ignoring restart on authorized stream");
            }
        }
    }

    /// Tries the next candidate address, or gives up on the connection.
    fn advance_or_retire(&mut self, key: &RouteKey) {
        let now = Instant::now();
        if let Some(conn) = self.out_connecting.get_mut(key) {
            if conn.can_retry() {
                if let Some(transport) = conn.connect_next(&self.shared, now) {
                    self.out_attempts.insert(transport.id(), key.clone());
                    return;
                }
            }
        }
        self.retire_outbound(key);
    }

    /// Destroys a negotiating connection: queued stanzas bounce, held verify
    /// requests resolve as failed.
    pub(crate) fn retire_outbound(&mut self, key: &RouteKey) {
        let Some(conn) = self.out_connecting.unregister(key) else {
            return;
        };
        let reason = conn.bounce_reason();
        if let Some(transport) = conn.attempt() {
            self.out_attempts.remove(&transport.id());
            transport.close();
        }
        let (stanzas, verifies) = conn.into_parts();
        if !stanzas.is_empty() {
            tracing::info!(route = %key, count = stanzas.len(), %reason, "bouncing queued stanzas");
        }
        for stanza in stanzas {
            self.shared.router.deliver_fail(stanza, &reason);
        }
        for verify in verifies {
            self.fail_verify(&verify);
        }
    }

    /// Moves a connection that completed dialback or SASL into the
    /// outbound-authorized registry and flushes it: verifies first, then the
    /// queue in arrival order.
    fn authorize_outbound(&mut self, key: &RouteKey) {
        let now = Instant::now();
        let Some(conn) = self.out_connecting.get(key) else {
            return;
        };
        let Some(transport) = conn.attempt().cloned() else {
            self.retire_outbound(key);
            return;
        };
        let Some(conn) = self.out_connecting.unregister(key) else {
            return;
        };
        self.out_attempts.remove(&transport.id());

        let mechanism = if conn.state() == ConnectionState::SaslSucceeded {
            AuthMechanism::Sasl
        } else {
            AuthMechanism::Dialback
        };
        let address = conn.current_address();
        let (stanzas, verifies) = conn.into_parts();

        for verify in verifies {
            transport.send(Frame::Element(verify));
        }
        let mut entry = AuthorizedConnection::new(transport.clone(), address, now);
        let flushed = stanzas.len();
        for stanza in stanzas {
            entry.send(stanza, now);
        }

        self.out_authorized.register(key.clone(), entry);
        self.out_established.insert(transport.id(), key.clone());
        tracing::info!(route = %key, auth = mechanism.as_str(), flushed, "outbound stream authorized");
    }
}
