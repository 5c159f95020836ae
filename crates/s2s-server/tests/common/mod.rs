//! Fake stream layer shared by the host integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use s2s_dialback::{ConnectTarget, Connector, Frame, TlsRole, Transport, TransportId};
use s2s_server::Config;
use s2s_types::{ns, Element, ProtectionLevel, StreamHeader};

pub struct FakeTransport {
    id: TransportId,
    frames: Mutex<Vec<Frame>>,
    closed: AtomicBool,
}

impl FakeTransport {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id: TransportId(id),
            frames: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().expect("should lock frames").clone()
    }

    pub fn headers(&self) -> Vec<StreamHeader> {
        self.frames()
            .into_iter()
            .filter_map(|f| match f {
                Frame::Header(h) => Some(h),
                _ => None,
            })
            .collect()
    }

    pub fn elements(&self) -> Vec<Element> {
        self.frames()
            .into_iter()
            .filter_map(|f| match f {
                Frame::Element(el) => Some(el),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Transport for FakeTransport {
    fn id(&self) -> TransportId {
        self.id
    }

    fn send(&self, frame: Frame) {
        self.frames.lock().expect("should lock frames").push(frame);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn reset_stream(&self) {}

    fn starttls_available(&self, _local_domain: &str) -> bool {
        false
    }

    fn start_tls(&self, _role: TlsRole, _local_domain: &str) -> bool {
        false
    }

    fn protection_level(&self) -> ProtectionLevel {
        ProtectionLevel::NONE
    }

    fn peer_certificate_matches(&self, _domain: &str) -> bool {
        false
    }

    fn peer_ip(&self) -> Option<String> {
        Some("198.51.100.7".to_string())
    }
}

#[derive(Default)]
pub struct FakeConnector {
    next_id: AtomicU64,
    targets: Mutex<Vec<ConnectTarget>>,
    transports: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeConnector {
    pub fn targets(&self) -> Vec<ConnectTarget> {
        self.targets.lock().expect("should lock targets").clone()
    }

    pub fn last(&self) -> Arc<FakeTransport> {
        self.transports
            .lock()
            .expect("should lock transports")
            .last()
            .cloned()
            .expect("should have connected")
    }
}

impl Connector for FakeConnector {
    fn connect(&self, target: &ConnectTarget) -> Arc<dyn Transport> {
        let id = 100 + self.next_id.fetch_add(1, Ordering::SeqCst);
        let transport = FakeTransport::new(id);
        self.targets
            .lock()
            .expect("should lock targets")
            .push(target.clone());
        self.transports
            .lock()
            .expect("should lock transports")
            .push(transport.clone());
        transport
    }
}

pub fn as_dyn(transport: &Arc<FakeTransport>) -> Arc<dyn Transport> {
    transport.clone()
}

pub fn message(to: &str, from: &str) -> Element {
    Element::new("message", ns::SERVER)
        .with_attr("to", to)
        .with_attr("from", from)
        .with_child(Element::new("body", ns::SERVER).with_text("hello"))
}

pub fn peer_header(to: &str, from: &str, id: Option<&str>) -> StreamHeader {
    StreamHeader {
        to: Some(to.to_string()),
        from: Some(from.to_string()),
        id: id.map(str::to_string),
        version: Some("1.0".to_string()),
        dialback_namespace: Some(ns::DIALBACK.to_string()),
        ..StreamHeader::default()
    }
}

/// An empty feature set: no STARTTLS, no SASL.
pub fn no_features() -> Element {
    Element::new("features", ns::STREAM)
}

pub fn db_result_reply(to: &str, from: &str, valid: bool) -> Element {
    Element::new("result", ns::DIALBACK)
        .with_attr("to", to)
        .with_attr("from", from)
        .with_attr("type", if valid { "valid" } else { "invalid" })
}

/// Default config with a fixed secret and the database inside `dir`.
pub fn test_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.dialback.secret = Some("s3cr3t".to_string());
    config.database.path = dir
        .path()
        .join("s2s.db")
        .to_str()
        .expect("utf-8 path")
        .to_string();
    config
}
