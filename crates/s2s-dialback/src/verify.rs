//! The two halves of `db:verify` handling.
//!
//! *Respond*: we are the authority for a domain and a receiving server asks
//! whether a key it was shown is ours. *Resolve*: we asked an authority on
//! behalf of an inbound stream and the answer arrived; the original
//! `db:result` gets its final reply.

use std::sync::Arc;
use std::time::Instant;

use s2s_types::{
    AuthMechanism, ChallengeId, Direction, Element, ResultKey, StreamError, StreamErrorCondition,
};

use crate::context::DialbackContext;
use crate::key::derive_key;
use crate::policy::Handshake;
use crate::registry::AuthorizedConnection;
use crate::transport::{fatal, Frame, Transport};
use crate::wire::{self, DialbackElement};

impl DialbackContext {
    /// Handles a `db:verify` arriving on any stream: requests are answered,
    /// replies resolve a pending `db:result`.
    pub(crate) fn handle_verify_element(&mut self, transport: &Arc<dyn Transport>, el: &Element) {
        let verify = match DialbackElement::parse(el) {
            Ok(verify) => verify,
            Err(err) => {
                fatal(
                    transport.as_ref(),
                    StreamError::with_text(err.condition(), err.to_string()),
                );
                return;
            }
        };
        let Some(id) = verify.id.clone() else {
            fatal(
                transport.as_ref(),
                StreamError::with_text(
                    StreamErrorCondition::InvalidId,
                    "dialback verify without an id",
                ),
            );
            return;
        };

        if verify.is_reply() {
            self.resolve_verify(&id, &verify.from, &verify.to, verify.is_valid());
        } else {
            self.respond_verify(transport.as_ref(), &verify, &id);
        }
    }

    /// Answers a verify request. Works on streams that are not authorized
    /// for anything yet.
    fn respond_verify(&self, transport: &dyn Transport, verify: &DialbackElement, id: &ChallengeId) {
        let expected = derive_key(
            &self.shared.settings.secret,
            &verify.from,
            &verify.to,
            id.as_str(),
        );
        let valid = expected == verify.key;
        if valid {
            tracing::debug!(asker = %verify.from, domain = %verify.to, %id, "confirmed dialback key");
        } else {
            tracing::warn!(
                asker = %verify.from,
                domain = %verify.to,
                %id,
                "dialback key mismatch, possible spoofing attempt"
            );
        }
        transport.send(Frame::Element(wire::db_verify_reply(
            &verify.from,
            &verify.to,
            id,
            valid,
        )));
    }

    /// Settles the `db:result` that `(challenge, local, authority)` names and
    /// sends its final reply down the inbound stream it arrived on.
    pub(crate) fn resolve_verify(
        &mut self,
        challenge: &ChallengeId,
        authority: &str,
        local: &str,
        valid: bool,
    ) {
        let now = Instant::now();
        let Some(pending) = self.in_pending.get_mut(challenge) else {
            tracing::warn!(%challenge, %authority, "verify reply for an unknown stream, dropping");
            return;
        };
        let key = ResultKey::new(challenge.clone(), local, authority);
        if pending.pending_results.remove(&key).is_none() {
            tracing::warn!(%key, "verify reply without a matching dialback result, dropping");
            return;
        }
        let transport = pending.transport.clone();
        let xmpp_version = pending.xmpp_version;

        if valid {
            let verdict = self.shared.policy.check(&Handshake {
                peer: authority,
                local,
                direction: Direction::Inbound,
                mechanism: AuthMechanism::Dialback,
                protection: transport.protection_level(),
                xmpp_version,
            });
            if let Err(violation) = verdict {
                tracing::warn!(%key, %violation, "valid dialback key refused by policy");
                transport.send(Frame::Element(wire::db_result_reply(authority, local, false)));
                fatal(
                    transport.as_ref(),
                    StreamError::with_text(
                        StreamErrorCondition::PolicyViolation,
                        violation.to_string(),
                    ),
                );
                return;
            }
            self.in_authorized.register(
                key,
                AuthorizedConnection::new(transport.clone(), transport.peer_ip(), now),
            );
        } else {
            tracing::warn!(%key, "authoritative server rejected the dialback key");
        }

        transport.send(Frame::Element(wire::db_result_reply(authority, local, valid)));
    }

    /// Resolves a verify request that could never be sent as failed.
    pub(crate) fn fail_verify(&mut self, request: &Element) {
        let (Some(authority), Some(local), Some(id)) =
            (request.attr("to"), request.attr("from"), request.attr("id"))
        else {
            tracing::warn!(request = %request, "cannot fail malformed verify request");
            return;
        };
        let (authority, local) = (authority.to_string(), local.to_string());
        self.resolve_verify(&ChallengeId::from(id), &authority, &local, false);
    }
}
