//! Server dialback for server-to-server federation.
//!
//! Authenticates inter-server streams with the dialback challenge/response
//! scheme, optionally upgraded through STARTTLS and SASL EXTERNAL, and owns
//! the lifecycle of every inbound and outbound federation stream:
//!
//! | Concern | Module |
//! |---------|--------|
//! | Key derivation and tokens | `key` |
//! | Per-peer policy | `policy` |
//! | Registries with once-only side effects | `registry` |
//! | Outbound state machine and queueing | `outbound` |
//! | Inbound header negotiation and claims | `inbound` |
//! | `db:verify` respond/resolve | `verify` |
//! | Idle, auth and queue timeouts | `sweep` |
//!
//! Sockets, XML parsing, TLS and name resolution stay with the embedding
//! application, which implements [`Transport`], [`Connector`], [`Router`] and
//! [`AccountingSink`]. A [`DialbackContext`] never blocks; the host feeds it
//! stream events one at a time and calls [`DialbackContext::sweep`]
//! periodically.

mod address;
mod context;
mod error;
mod inbound;
mod key;
mod outbound;
mod policy;
mod registry;
mod router;
mod snapshot;
mod sweep;
mod transport;
mod verify;
mod wire;

pub use address::{parse_candidates, Candidate};
pub use context::{Collaborators, Delivery, DialbackContext, DialbackSettings};
pub use error::WireError;
pub use key::{derive_key, generate_challenge, generate_secret, loopcheck_token};
pub use outbound::{ConnectionState, DialbackRequestState, OutboundConnection};
pub use policy::{Handshake, PolicyChecker, PolicyViolation, DEFAULT_POLICY_KEY};
pub use registry::{
    AuthorizedConnection, InboundAccounting, OutboundRouting, Registry, RegistryHooks,
};
pub use router::{AccountingSink, LogAccounting, Router};
pub use snapshot::{
    FederationSnapshot, InboundConnecting, InboundEstablished, OutboundConnecting,
    OutboundEstablished,
};
pub use sweep::SweepReport;
pub use transport::{ConnectTarget, Connector, Frame, StreamEvent, TlsRole, Transport, TransportId};
