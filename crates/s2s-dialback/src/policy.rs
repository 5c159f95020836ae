//! Per-peer security policy: lookup with subdomain fallback and the checks
//! applied whenever a stream becomes authorized.

use std::collections::HashMap;

use s2s_types::{AuthMechanism, Direction, PeerPolicy, ProtectionLevel};

/// Key of the default policy row.
pub const DEFAULT_POLICY_KEY: &str = "*";

/// A completed authentication, as presented to [`PolicyChecker::check`].
#[derive(Debug, Clone, Copy)]
pub struct Handshake<'a> {
    /// Remote domain.
    pub peer: &'a str,
    /// Local domain the stream is bound to.
    pub local: &'a str,
    pub direction: Direction,
    pub mechanism: AuthMechanism,
    pub protection: ProtectionLevel,
    /// Major stream version (`0` for pre-XMPP streams).
    pub xmpp_version: u32,
}

/// Why a stream was refused by policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    #[error("stream protection {achieved} is below the required level {required}")]
    InsufficientProtection {
        achieved: ProtectionLevel,
        required: ProtectionLevel,
    },

    #[error("authentication with {used} is not permitted for this peer")]
    MechanismForbidden { used: AuthMechanism },
}

/// Policy rows keyed by domain, plus the `"*"` default row.
#[derive(Debug, Clone, Default)]
pub struct PolicyChecker {
    rows: HashMap<String, PeerPolicy>,
}

impl PolicyChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the row for `domain` (`"*"` for the default).
    pub fn insert(&mut self, domain: &str, policy: PeerPolicy) {
        self.rows.insert(domain.to_lowercase(), policy);
    }

    /// Finds the row for `domain`, trying the exact name, then each parent
    /// domain (`a.b.example`, `b.example`, `example`), then the default row,
    /// then built-in defaults.
    pub fn lookup(&self, domain: &str) -> PeerPolicy {
        let domain = domain.to_lowercase();
        let mut candidate = domain.as_str();
        loop {
            if candidate.is_empty() {
                break;
            }
            if let Some(policy) = self.rows.get(candidate) {
                return *policy;
            }
            match candidate.split_once('.') {
                Some((_, parent)) => candidate = parent,
                None => break,
            }
        }
        self.rows
            .get(DEFAULT_POLICY_KEY)
            .copied()
            .unwrap_or_default()
    }

    /// Checks a completed handshake against the peer's policy.
    ///
    /// Success is logged as an established connection. On failure the caller
    /// must close the stream with a `policy-violation` stream error.
    pub fn check(&self, handshake: &Handshake<'_>) -> Result<(), PolicyViolation> {
        let policy = self.lookup(handshake.peer);
        let required = policy.tls.required_level();

        let verdict = if handshake.protection < required {
            Err(PolicyViolation::InsufficientProtection {
                achieved: handshake.protection,
                required,
            })
        } else if !policy.auth.permits(handshake.mechanism) {
            Err(PolicyViolation::MechanismForbidden {
                used: handshake.mechanism,
            })
        } else {
            Ok(())
        };

        match &verdict {
            Ok(()) => tracing::info!(
                direction = %handshake.direction,
                peer = handshake.peer,
                local = handshake.local,
                protection = %handshake.protection,
                auth = handshake.mechanism.as_str(),
                stream = if handshake.xmpp_version >= 1 { "XMPP1.0" } else { "preXMPP" },
                "s2s connection established"
            ),
            Err(violation) => tracing::warn!(
                direction = %handshake.direction,
                peer = handshake.peer,
                local = handshake.local,
                %violation,
                "s2s connection refused by policy"
            ),
        }
        verdict
    }
}
