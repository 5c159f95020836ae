//! Inbound streams: header negotiation, STARTTLS and SASL EXTERNAL on the
//! receiving side, and the `db:result` claims that start a verification.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use s2s_types::{
    ns, AuthMechanism, AuthRequirement, ChallengeId, Direction, Element, Jid, ProtectionLevel,
    ResultKey, RouteKey, StreamError, StreamErrorCondition, StreamHeader, XmppRequirement,
};

use crate::context::{log_peer_stream_error, DialbackContext};
use crate::error::WireError;
use crate::key::generate_challenge;
use crate::policy::Handshake;
use crate::registry::AuthorizedConnection;
use crate::transport::{close_gracefully, fatal, Frame, StreamEvent, TlsRole, Transport, TransportId};
use crate::wire::{self, DialbackElement};

/// Negotiated facts of an open inbound stream.
#[derive(Debug, Clone)]
pub(crate) struct Negotiated {
    pub challenge: ChallengeId,
    /// Local domain the peer addressed.
    pub local: String,
    /// Domain the peer claims in its header, if any.
    pub peer: Option<String>,
    pub xmpp_version: u32,
}

pub(crate) enum InboundPhase {
    /// Accepted, or restarted after STARTTLS/SASL; no header seen yet.
    AwaitingRoot,
    Streaming(Negotiated),
    /// Pre-dialback peer admitted without authentication.
    Legacy {
        peer: String,
        connection: AuthorizedConnection,
    },
}

/// Per-transport state of an inbound stream.
pub(crate) struct InboundStream {
    pub transport: Arc<dyn Transport>,
    pub phase: InboundPhase,
    /// Domain proven with SASL EXTERNAL; survives the stream restart.
    pub authenticated_as: Option<String>,
    /// When the current phase began.
    pub since: Instant,
}

impl InboundStream {
    fn new(transport: Arc<dyn Transport>, now: Instant) -> Self {
        Self {
            transport,
            phase: InboundPhase::AwaitingRoot,
            authenticated_as: None,
            since: now,
        }
    }

    fn restart(&mut self, now: Instant) {
        self.phase = InboundPhase::AwaitingRoot;
        self.since = now;
    }
}

/// An inbound stream that was issued a challenge, with the `db:result`
/// claims still waiting for the authoritative server's answer.
pub(crate) struct InboundPendingConnection {
    pub transport: Arc<dyn Transport>,
    pub claimed_source: Option<String>,
    pub claimed_destination: String,
    pub xmpp_version: u32,
    pub pending_results: HashMap<ResultKey, Instant>,
    pub created: Instant,
}

impl InboundPendingConnection {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created)
    }
}

impl DialbackContext {
    /// Feeds an event of an inbound stream into the core.
    pub fn handle_inbound_transport_event(
        &mut self,
        transport: Arc<dyn Transport>,
        event: StreamEvent,
    ) {
        let now = Instant::now();
        let id = transport.id();
        match event {
            StreamEvent::Connected => {
                self.inbound
                    .entry(id)
                    .or_insert_with(|| InboundStream::new(transport.clone(), now));
            }
            StreamEvent::Root(header) => {
                self.inbound
                    .entry(id)
                    .or_insert_with(|| InboundStream::new(transport.clone(), now));
                self.on_inbound_root(&transport, &header, now);
            }
            StreamEvent::Element(el) => self.on_inbound_element(&transport, el, now),
            StreamEvent::Closed { error } => self.on_inbound_closed(id, error.as_deref()),
        }
    }

    fn on_inbound_root(&mut self, transport: &Arc<dyn Transport>, header: &StreamHeader, now: Instant) {
        let authenticated_as = self
            .inbound
            .get(&transport.id())
            .and_then(|stream| stream.authenticated_as.clone());
        let local = header
            .to
            .as_deref()
            .and_then(|to| Jid::domain_only(to).ok())
            .map(|jid| jid.domain().to_string());
        let peer = match header.from.as_deref().map(Jid::domain_only) {
            None => None,
            Some(Ok(jid)) => Some(jid.domain().to_string()),
            Some(Err(_)) => {
                let reply = StreamHeader {
                    from: local,
                    ..StreamHeader::default()
                };
                return reject(transport.as_ref(), reply, StreamErrorCondition::InvalidFrom, None);
            }
        };

        let policy = self.shared.policy.lookup(peer.as_deref().unwrap_or_default());
        let xmpp_version = match policy.xmpp {
            XmppRequirement::Disabled => 0,
            _ => header.major_version(),
        };
        let reply = StreamHeader {
            to: peer.clone(),
            from: local.clone(),
            version: (xmpp_version >= 1).then(|| "1.0".to_string()),
            dialback_namespace: (policy.auth != AuthRequirement::SaslOnly)
                .then(|| ns::DIALBACK.to_string()),
            ..StreamHeader::default()
        };

        if header.namespace != ns::SERVER
            || header
                .dialback_namespace
                .as_deref()
                .is_some_and(|db| db != ns::DIALBACK)
        {
            return reject(transport.as_ref(), reply, StreamErrorCondition::InvalidNamespace, None);
        }
        if policy.xmpp == XmppRequirement::Forced && xmpp_version == 0 {
            return reject(
                transport.as_ref(),
                reply,
                StreamErrorCondition::UnsupportedVersion,
                Some("XMPP 1.0 streams are required for this peer"),
            );
        }
        let Some(local) = local else {
            return reject(
                transport.as_ref(),
                reply,
                StreamErrorCondition::HostUnknown,
                Some("no valid 'to' attribute on the stream header"),
            );
        };

        let authenticated = authenticated_as.is_some();
        let can_starttls = !authenticated
            && xmpp_version >= 1
            && policy.tls.allows_starttls()
            && transport.starttls_available(&local);
        let can_sasl = !authenticated
            && xmpp_version >= 1
            && transport.protection_level() > ProtectionLevel::NONE
            && peer
                .as_deref()
                .is_some_and(|peer| transport.peer_certificate_matches(peer))
            && policy.auth.permits(AuthMechanism::Sasl);
        let dialback = header.declares_dialback();

        if xmpp_version == 0 && !dialback {
            return self.accept_legacy(transport, reply, peer, now);
        }
        if !dialback && !can_sasl && !can_starttls && !authenticated {
            return reject(
                transport.as_ref(),
                reply,
                StreamErrorCondition::NotAuthorized,
                Some("no authentication method is available for this stream"),
            );
        }
        if header.loopcheck.as_deref() == Some(self.shared.loop_token.as_str()) {
            tracing::warn!(%local, peer = ?peer, "inbound stream was opened by this server");
            return reject(
                transport.as_ref(),
                reply,
                StreamErrorCondition::RemoteConnectionFailed,
                Some("this server connected to itself"),
            );
        }

        let challenge = generate_challenge();
        self.in_pending.register(
            challenge.clone(),
            InboundPendingConnection {
                transport: transport.clone(),
                claimed_source: peer.clone(),
                claimed_destination: local.clone(),
                xmpp_version,
                pending_results: HashMap::new(),
                created: now,
            },
        );
        if let Some(authenticated) = &authenticated_as {
            self.in_authorized.register(
                ResultKey::new(challenge.clone(), local.clone(), authenticated.clone()),
                AuthorizedConnection::new(transport.clone(), transport.peer_ip(), now),
            );
        }

        transport.send(Frame::Header(StreamHeader {
            id: Some(challenge.to_string()),
            ..reply
        }));
        if xmpp_version >= 1 {
            transport.send(Frame::Element(wire::features(can_starttls, can_sasl)));
        }
        tracing::debug!(
            transport = %transport.id(),
            %challenge,
            %local,
            peer = ?peer,
            xmpp_version,
            "inbound stream opened"
        );

        if let Some(stream) = self.inbound.get_mut(&transport.id()) {
            stream.phase = InboundPhase::Streaming(Negotiated {
                challenge,
                local,
                peer,
                xmpp_version,
            });
            stream.since = now;
        }
    }

    fn accept_legacy(
        &mut self,
        transport: &Arc<dyn Transport>,
        reply: StreamHeader,
        peer: Option<String>,
        now: Instant,
    ) {
        if !self.shared.settings.allow_legacy {
            return reject(
                transport.as_ref(),
                reply,
                StreamErrorCondition::NotAuthorized,
                Some("Legacy Access Denied!"),
            );
        }
        let peer = peer.unwrap_or_else(|| "unknown".to_string());
        tracing::info!(%peer, transport = %transport.id(), "accepting legacy stream without authentication");
        transport.send(Frame::Header(StreamHeader {
            id: Some(generate_challenge().to_string()),
            ..reply
        }));
        if let Some(stream) = self.inbound.get_mut(&transport.id()) {
            stream.phase = InboundPhase::Legacy {
                peer,
                connection: AuthorizedConnection::new(transport.clone(), transport.peer_ip(), now),
            };
            stream.since = now;
        }
    }

    fn on_inbound_element(&mut self, transport: &Arc<dyn Transport>, el: Element, now: Instant) {
        let Some(stream) = self.inbound.get_mut(&transport.id()) else {
            tracing::debug!(transport = %transport.id(), "element for unknown inbound stream");
            return;
        };
        let negotiated = match &mut stream.phase {
            InboundPhase::Streaming(negotiated) => negotiated.clone(),
            InboundPhase::Legacy { connection, .. } => {
                connection.record_traffic(now);
                self.shared.router.deliver(el);
                return;
            }
            InboundPhase::AwaitingRoot => {
                fatal(
                    transport.as_ref(),
                    StreamError::with_text(StreamErrorCondition::NotAuthorized, "stream not open"),
                );
                return;
            }
        };

        match (el.namespace(), el.name()) {
            (ns::STREAM, "error") => {
                let error = StreamError::from_element(&el);
                let peer = negotiated.peer.as_deref().unwrap_or("unknown");
                log_peer_stream_error(peer, Direction::Inbound, &error);
                transport.close();
            }
            (ns::TLS, "starttls") => self.inbound_starttls(transport, &negotiated, now),
            (ns::SASL, "auth") => self.inbound_sasl(transport, &negotiated, &el, now),
            (ns::DIALBACK, "verify") => self.handle_verify_element(transport, &el),
            (ns::DIALBACK, "result") => self.inbound_result(transport, &negotiated, &el, now),
            _ => self.inbound_stanza(transport, &negotiated, el, now),
        }
    }

    fn inbound_starttls(&mut self, transport: &Arc<dyn Transport>, negotiated: &Negotiated, now: Instant) {
        let policy = self
            .shared
            .policy
            .lookup(negotiated.peer.as_deref().unwrap_or_default());
        let authenticated = self
            .inbound
            .get(&transport.id())
            .is_some_and(|stream| stream.authenticated_as.is_some());

        if authenticated
            || !policy.tls.allows_starttls()
            || !transport.starttls_available(&negotiated.local)
        {
            tracing::warn!(peer = ?negotiated.peer, "refusing STARTTLS request");
            transport.send(Frame::Element(wire::tls_failure()));
            close_gracefully(transport.as_ref());
            return;
        }

        transport.send(Frame::Element(wire::tls_proceed()));
        if !transport.start_tls(TlsRole::Server, &negotiated.local) {
            tracing::warn!(peer = ?negotiated.peer, "could not start TLS on inbound stream");
            transport.close();
            return;
        }
        transport.reset_stream();
        self.drop_pending(&negotiated.challenge);
        if let Some(stream) = self.inbound.get_mut(&transport.id()) {
            stream.restart(now);
        }
    }

    fn inbound_sasl(
        &mut self,
        transport: &Arc<dyn Transport>,
        negotiated: &Negotiated,
        auth: &Element,
        now: Instant,
    ) {
        let policy = self
            .shared
            .policy
            .lookup(negotiated.peer.as_deref().unwrap_or_default());
        let refuse = |condition: &str| {
            transport.send(Frame::Element(wire::sasl_failure(condition)));
            close_gracefully(transport.as_ref());
        };

        if !policy.auth.permits(AuthMechanism::Sasl) {
            transport.send(Frame::Element(wire::sasl_failure("invalid-mechanism")));
            fatal(
                transport.as_ref(),
                StreamError::with_text(
                    StreamErrorCondition::PolicyViolation,
                    "SASL is not permitted for this peer",
                ),
            );
            return;
        }
        if !auth
            .attr("mechanism")
            .is_some_and(|m| m.eq_ignore_ascii_case("EXTERNAL"))
        {
            return refuse("invalid-mechanism");
        }
        let payload = auth.text();
        if payload.trim().is_empty() || payload.trim() == "=" {
            return refuse("not-authorized");
        }
        let identity = match wire::decode_sasl_identity(&payload) {
            Ok(jid) if jid.is_server() => jid.domain().to_string(),
            Ok(_) | Err(WireError::NotADomain { .. }) | Err(WireError::MissingAttribute(_)) => {
                return refuse("invalid-authzid")
            }
            Err(WireError::Encoding) => return refuse("incorrect-encoding"),
        };
        if !transport.peer_certificate_matches(&identity) {
            tracing::warn!(%identity, "SASL EXTERNAL identity does not match the peer certificate");
            return refuse("not-authorized");
        }
        let verdict = self.shared.policy.check(&Handshake {
            peer: &identity,
            local: &negotiated.local,
            direction: Direction::Inbound,
            mechanism: AuthMechanism::Sasl,
            protection: transport.protection_level(),
            xmpp_version: negotiated.xmpp_version,
        });
        if let Err(violation) = verdict {
            transport.send(Frame::Element(wire::sasl_failure("mechanism-too-weak")));
            fatal(
                transport.as_ref(),
                StreamError::with_text(StreamErrorCondition::PolicyViolation, violation.to_string()),
            );
            return;
        }

        transport.send(Frame::Element(wire::sasl_success()));
        transport.reset_stream();
        self.drop_pending(&negotiated.challenge);
        if let Some(stream) = self.inbound.get_mut(&transport.id()) {
            stream.authenticated_as = Some(identity);
            stream.restart(now);
        }
    }

    fn inbound_result(
        &mut self,
        transport: &Arc<dyn Transport>,
        negotiated: &Negotiated,
        el: &Element,
        now: Instant,
    ) {
        let result = match DialbackElement::parse(el) {
            Ok(result) if !result.is_reply() => result,
            Ok(_) => {
                fatal(
                    transport.as_ref(),
                    StreamError::with_text(
                        StreamErrorCondition::UndefinedCondition,
                        "unexpected dialback result reply",
                    ),
                );
                return;
            }
            Err(err) => {
                fatal(
                    transport.as_ref(),
                    StreamError::with_text(err.condition(), err.to_string()),
                );
                return;
            }
        };
        let Some(pending) = self.in_pending.get_mut(&negotiated.challenge) else {
            fatal(
                transport.as_ref(),
                StreamError::with_text(
                    StreamErrorCondition::NotAuthorized,
                    "no dialback challenge is pending on this stream",
                ),
            );
            return;
        };

        pending.pending_results.insert(
            ResultKey::new(
                negotiated.challenge.clone(),
                result.to.clone(),
                result.from.clone(),
            ),
            now,
        );
        tracing::debug!(
            challenge = %negotiated.challenge,
            to = %result.to,
            from = %result.from,
            "dialback result received, asking the authoritative server"
        );

        // Ask the claimed source's authority, not the connected peer.
        let verify = wire::db_verify(&result.from, &result.to, &negotiated.challenge, &result.key);
        self.dispatch_verify(verify, RouteKey::new(result.from, result.to));
    }

    /// Sends a `db:verify` request through an existing route to the authority,
    /// or hands it to the router for address resolution.
    fn dispatch_verify(&mut self, verify: Element, route: RouteKey) {
        let known = self.out_authorized.contains(&route)
            || self.out_connecting.contains(&route)
            || self.cached_address(&route.destination).is_some();
        if known {
            let delivery = self.handle_outbound(verify, None);
            tracing::debug!(%route, ?delivery, "verify request dispatched");
        } else {
            self.shared.router.deliver(verify);
        }
    }

    fn inbound_stanza(
        &mut self,
        transport: &Arc<dyn Transport>,
        negotiated: &Negotiated,
        stanza: Element,
        now: Instant,
    ) {
        let (to, from) = match wire::stanza_domains(&stanza) {
            Ok(domains) => domains,
            Err(err) => {
                fatal(
                    transport.as_ref(),
                    StreamError::with_text(err.condition(), err.to_string()),
                );
                return;
            }
        };
        let key = ResultKey::new(negotiated.challenge.clone(), to, from);
        match self.in_authorized.get_mut(&key) {
            Some(conn) if conn.transport_id() == transport.id() => {
                conn.record_traffic(now);
                self.shared.router.deliver(stanza);
            }
            _ => {
                tracing::warn!(%key, "stanza for a domain pair not authorized on this stream");
                fatal(
                    transport.as_ref(),
                    StreamError::with_text(
                        StreamErrorCondition::InvalidFrom,
                        format!("{} is not authorized on this stream", key.source),
                    ),
                );
            }
        }
    }

    fn drop_pending(&mut self, challenge: &ChallengeId) {
        if let Some(pending) = self.in_pending.unregister(challenge) {
            for key in pending.pending_results.keys() {
                tracing::debug!(%key, "discarding unresolved dialback result");
            }
        }
    }

    fn on_inbound_closed(&mut self, id: TransportId, error: Option<&str>) {
        let Some(stream) = self.inbound.remove(&id) else {
            return;
        };
        match stream.phase {
            InboundPhase::Streaming(negotiated) => self.drop_pending(&negotiated.challenge),
            InboundPhase::Legacy { peer, connection } => {
                self.shared
                    .accounting
                    .record(connection.record(&peer, Direction::Inbound));
            }
            InboundPhase::AwaitingRoot => {}
        }
        let released = self
            .in_authorized
            .unregister_where(|_, conn| conn.transport_id() == id);
        tracing::debug!(transport = %id, error, released = released.len(), "inbound stream closed");
    }
}

/// Answers a header we refuse: our own header first, then the error.
fn reject(
    transport: &dyn Transport,
    reply: StreamHeader,
    condition: StreamErrorCondition,
    text: Option<&str>,
) {
    tracing::info!(
        transport = %transport.id(),
        peer = ?reply.to,
        %condition,
        reason = text.unwrap_or_default(),
        "rejecting inbound stream"
    );
    transport.send(Frame::Header(reply));
    let error = match text {
        Some(text) => StreamError::with_text(condition, text),
        None => StreamError::new(condition),
    };
    fatal(transport, error);
}
