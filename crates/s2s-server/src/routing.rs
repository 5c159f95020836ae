//! Channel-backed [`Router`] for the embedding stream layer.
//!
//! The dialback core calls its router synchronously from the engine task.
//! [`ChannelRouter`] turns each call into a [`RouterEvent`] on an unbounded
//! channel; the local stanza router consumes them at its own pace and feeds
//! anything that needs the engine again (such as `db:verify` requests that
//! needed address resolution) back through the
//! [`EngineHandle`](crate::service::EngineHandle).

use s2s_dialback::Router;
use s2s_types::Element;
use tokio::sync::mpsc;

/// One call made by the core into the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// Deliver locally (or resolve and hand back to the engine).
    Deliver(Element),
    /// Return to the sender with a reason.
    Bounce { stanza: Element, reason: String },
    RouteUp(String),
    RouteDown(String),
}

#[derive(Debug, Clone)]
pub struct ChannelRouter {
    tx: mpsc::UnboundedSender<RouterEvent>,
}

impl ChannelRouter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RouterEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: RouterEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("router channel closed, event dropped");
        }
    }
}

impl Router for ChannelRouter {
    fn deliver(&self, stanza: Element) {
        self.emit(RouterEvent::Deliver(stanza));
    }

    fn deliver_fail(&self, stanza: Element, reason: &str) {
        self.emit(RouterEvent::Bounce {
            stanza,
            reason: reason.to_string(),
        });
    }

    fn register_route(&self, domain: &str) {
        self.emit(RouterEvent::RouteUp(domain.to_string()));
    }

    fn unregister_route(&self, domain: &str) {
        self.emit(RouterEvent::RouteDown(domain.to_string()));
    }
}
