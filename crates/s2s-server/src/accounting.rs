//! SQLite-backed accounting sink.
//!
//! The dialback core reports closed connections synchronously from the
//! engine task. Records are handed to a writer task over a channel and
//! persisted on the blocking pool, so the engine never waits on SQLite.

use s2s_db::DbPool;
use s2s_dialback::AccountingSink;
use s2s_observe::record_connection;
use s2s_types::ConnectionRecord;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Accounting sink that persists every record to `connection_log`.
#[derive(Debug, Clone)]
pub struct SqliteAccounting {
    tx: mpsc::UnboundedSender<ConnectionRecord>,
}

impl SqliteAccounting {
    /// Starts the writer task. Must be called inside a Tokio runtime.
    ///
    /// The task ends once every clone of the returned sink is dropped.
    pub fn spawn(pool: DbPool) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(write_records(pool, rx));
        (Self { tx }, handle)
    }
}

impl AccountingSink for SqliteAccounting {
    fn record(&self, record: ConnectionRecord) {
        tracing::info!(
            peer = %record.peer_domain,
            direction = %record.direction,
            stanzas = record.stanza_count,
            ip = record.peer_ip.as_deref().unwrap_or("-"),
            duration_secs = record.duration.as_secs(),
            "s2s connection closed"
        );
        if self.tx.send(record).is_err() {
            tracing::warn!("accounting writer stopped, record dropped");
        }
    }
}

async fn write_records(pool: DbPool, mut rx: mpsc::UnboundedReceiver<ConnectionRecord>) {
    while let Some(record) = rx.recv().await {
        let pool = pool.clone();
        let peer = record.peer_domain.clone();

        let res = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| e.to_string())?;
            record_connection(&conn, &record).map_err(|e| e.to_string())
        })
        .await;

        match res {
            Ok(Ok(id)) => tracing::debug!(%peer, id, "accounting record stored"),
            Ok(Err(e)) => tracing::error!(%peer, "failed to store accounting record: {}", e),
            Err(e) => tracing::error!("accounting writer join error: {}", e),
        }
    }
    tracing::debug!("accounting writer finished");
}
