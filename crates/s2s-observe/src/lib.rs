//! Accounting log for federation connections.
//!
//! Every authorized server-to-server connection that goes away produces one
//! [`ConnectionRecord`](s2s_types::ConnectionRecord). This crate persists
//! those records in the `connection_log` table and answers filtered queries
//! over them for the status API.
//!
//! | Column | Meaning |
//! |--------|---------|
//! | `peer_domain` | Remote domain of the connection |
//! | `direction` | `in` or `out` |
//! | `stanza_count` | Stanzas carried while authorized |
//! | `peer_ip` | Remote address, when known |
//! | `duration_secs` | Time from authorization to teardown |
//! | `closed_at` | UTC timestamp of the teardown |

mod error;
mod store;

pub use error::ObserveError;
pub use store::{query_records, record_connection, ConnectionLogEntry, RecordFilter};
