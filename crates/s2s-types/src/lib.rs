//! Shared types, error definitions, and protocol constants for the
//! server-to-server federation layer.
//!
//! This crate holds everything the dialback core, the accounting store and
//! the embedding host need to agree on: registry keys, peer policy values,
//! the minimal XML element tree handed across the transport boundary, stream
//! headers and stream errors, and accounting records.
//!
//! It performs no I/O and depends on nothing but `serde` and `thiserror`, so
//! every other crate in the workspace can depend on it without cycles.

mod element;
mod error;
mod jid;
mod keys;
pub mod ns;
mod policy;
mod record;
mod stream;

pub use element::{Element, Node};
pub use error::ParseError;
pub use jid::Jid;
pub use keys::{ChallengeId, ResultKey, RouteKey};
pub use policy::{
    AuthMechanism, AuthRequirement, Direction, PeerPolicy, ProtectionLevel, TlsRequirement,
    XmppRequirement,
};
pub use record::ConnectionRecord;
pub use stream::{ErrorSeverity, StreamError, StreamErrorCondition, StreamHeader};

/// Default TCP port for server-to-server connections.
pub const DEFAULT_S2S_PORT: u16 = 5269;
