//! The engine task: sole owner of the [`DialbackContext`].
//!
//! The context never blocks and is not shared. Every caller goes through an
//! [`EngineHandle`], which turns calls into [`Command`]s on a bounded channel;
//! the engine applies them one at a time in arrival order.

use std::sync::Arc;

use s2s_dialback::{
    Delivery, DialbackContext, FederationSnapshot, StreamEvent, SweepReport, Transport,
};
use s2s_types::Element;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Capacity of the command channel.
const COMMAND_BUFFER: usize = 1024;

/// Errors from talking to the engine or starting the service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The engine task has exited; no further commands are accepted.
    #[error("dialback engine is not running")]
    EngineStopped,

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Database(#[from] s2s_db::DbError),

    #[error("status server error: {0}")]
    Io(#[from] std::io::Error),
}

pub enum Command {
    Outbound {
        stanza: Element,
        resolved: Option<String>,
        reply: oneshot::Sender<Delivery>,
    },
    InboundEvent {
        transport: Arc<dyn Transport>,
        event: StreamEvent,
    },
    OutboundEvent {
        transport: Arc<dyn Transport>,
        event: StreamEvent,
    },
    Sweep {
        reply: oneshot::Sender<SweepReport>,
    },
    Snapshot {
        reply: oneshot::Sender<FederationSnapshot>,
    },
}

/// Cloneable handle to the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl EngineHandle {
    /// Spawns the engine task around `context`.
    ///
    /// The task ends once every handle is dropped.
    pub fn spawn(context: DialbackContext) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let task = tokio::spawn(run_engine(context, rx));
        (Self { tx }, task)
    }

    async fn send(&self, command: Command) -> Result<(), ServiceError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| ServiceError::EngineStopped)
    }

    /// Routes a stanza to a remote domain. `resolved` is the candidate
    /// address list from name resolution, if already known.
    pub async fn outbound(
        &self,
        stanza: Element,
        resolved: Option<String>,
    ) -> Result<Delivery, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Outbound {
            stanza,
            resolved,
            reply,
        })
        .await?;
        rx.await.map_err(|_| ServiceError::EngineStopped)
    }

    /// Reports an event on an accepted (inbound) stream.
    pub async fn inbound_event(
        &self,
        transport: Arc<dyn Transport>,
        event: StreamEvent,
    ) -> Result<(), ServiceError> {
        self.send(Command::InboundEvent { transport, event }).await
    }

    /// Reports an event on a stream opened through the connector.
    pub async fn outbound_event(
        &self,
        transport: Arc<dyn Transport>,
        event: StreamEvent,
    ) -> Result<(), ServiceError> {
        self.send(Command::OutboundEvent { transport, event }).await
    }

    /// Runs one timeout sweep.
    pub async fn sweep(&self) -> Result<SweepReport, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Sweep { reply }).await?;
        rx.await.map_err(|_| ServiceError::EngineStopped)
    }

    pub async fn snapshot(&self) -> Result<FederationSnapshot, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        rx.await.map_err(|_| ServiceError::EngineStopped)
    }
}

async fn run_engine(mut context: DialbackContext, mut rx: mpsc::Receiver<Command>) {
    tracing::info!("dialback engine started");

    while let Some(command) = rx.recv().await {
        match command {
            Command::Outbound {
                stanza,
                resolved,
                reply,
            } => {
                let delivery = context.handle_outbound(stanza, resolved.as_deref());
                // The caller may have given up waiting; the stanza is handled either way.
                let _ = reply.send(delivery);
            }
            Command::InboundEvent { transport, event } => {
                context.handle_inbound_transport_event(transport, event);
            }
            Command::OutboundEvent { transport, event } => {
                context.handle_outbound_transport_event(transport, event);
            }
            Command::Sweep { reply } => {
                let _ = reply.send(context.sweep());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(context.snapshot());
            }
        }
    }

    tracing::info!("dialback engine stopped");
}
