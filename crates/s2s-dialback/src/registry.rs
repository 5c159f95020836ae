//! Connection registries.
//!
//! A [`Registry`] owns its entries exclusively. Side effects that must fire
//! exactly once per register/unregister pair (router notifications,
//! accounting) live in [`RegistryHooks`] and run only when an entry is
//! actually added or removed, so `unregister` is idempotent.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use s2s_types::{ConnectionRecord, Direction, Element, ResultKey, RouteKey};

use crate::router::{AccountingSink, Router};
use crate::transport::{Frame, Transport, TransportId};

/// Side effects attached to a registry.
pub trait RegistryHooks<K, V> {
    fn registered(&mut self, _key: &K, _entry: &V) {}
    fn unregistered(&mut self, _key: &K, _entry: &V) {}
}

impl<K, V> RegistryHooks<K, V> for () {}

/// A keyed table of entries with registration hooks.
pub struct Registry<K, V, H = ()> {
    entries: HashMap<K, V>,
    hooks: H,
}

impl<K, V, H> Registry<K, V, H>
where
    K: Eq + Hash + Clone,
    H: RegistryHooks<K, V>,
{
    pub fn new(hooks: H) -> Self {
        Self {
            entries: HashMap::new(),
            hooks,
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts `entry`. A previous entry under the same key is unregistered
    /// first (its hooks fire) and returned.
    pub fn register(&mut self, key: K, entry: V) -> Option<V> {
        let previous = self.unregister(&key);
        self.hooks.registered(&key, &entry);
        self.entries.insert(key, entry);
        previous
    }

    /// Removes and returns the entry. Returns `None`, with no side effects,
    /// if nothing is registered under `key`.
    pub fn unregister(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.hooks.unregistered(key, &entry);
        Some(entry)
    }

    /// Unregisters every entry matching `predicate`.
    pub fn unregister_where(&mut self, mut predicate: impl FnMut(&K, &V) -> bool) -> Vec<(K, V)> {
        let keys: Vec<K> = self
            .entries
            .iter()
            .filter(|(k, v)| predicate(k, v))
            .map(|(k, _)| k.clone())
            .collect();
        keys.into_iter()
            .filter_map(|key| self.unregister(&key).map(|entry| (key, entry)))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&K, &mut V)> {
        self.entries.iter_mut()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }
}

/// A stream authorized for one domain pair.
pub struct AuthorizedConnection {
    transport: Arc<dyn Transport>,
    peer_ip: Option<String>,
    stanza_count: u64,
    established: Instant,
    last_used: Instant,
}

impl AuthorizedConnection {
    pub fn new(transport: Arc<dyn Transport>, peer_ip: Option<String>, now: Instant) -> Self {
        Self {
            transport,
            peer_ip,
            stanza_count: 0,
            established: now,
            last_used: now,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn transport_id(&self) -> TransportId {
        self.transport.id()
    }

    pub fn peer_ip(&self) -> Option<&str> {
        self.peer_ip.as_deref()
    }

    pub fn stanza_count(&self) -> u64 {
        self.stanza_count
    }

    /// Writes a stanza and counts it.
    pub fn send(&mut self, stanza: Element, now: Instant) {
        self.transport.send(Frame::Element(stanza));
        self.record_traffic(now);
    }

    /// Counts a stanza carried in either direction.
    pub fn record_traffic(&mut self, now: Instant) {
        self.stanza_count += 1;
        self.last_used = now;
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.established)
    }

    pub(crate) fn record(&self, peer_domain: &str, direction: Direction) -> ConnectionRecord {
        ConnectionRecord {
            peer_domain: peer_domain.to_string(),
            direction,
            stanza_count: self.stanza_count,
            peer_ip: self.peer_ip.clone(),
            duration: self.age(Instant::now()),
        }
    }
}

impl fmt::Debug for AuthorizedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedConnection")
            .field("transport", &self.transport.id())
            .field("peer_ip", &self.peer_ip)
            .field("stanza_count", &self.stanza_count)
            .finish()
    }
}

/// Hooks of the outbound-authorized registry: route ownership, the
/// resolved-address cache and accounting.
pub struct OutboundRouting {
    router: Arc<dyn Router>,
    accounting: Arc<dyn AccountingSink>,
    ip_cache: HashMap<String, String>,
}

impl OutboundRouting {
    pub fn new(router: Arc<dyn Router>, accounting: Arc<dyn AccountingSink>) -> Self {
        Self {
            router,
            accounting,
            ip_cache: HashMap::new(),
        }
    }

    /// Address of the last authorized connection to `domain`.
    pub fn cached_ip(&self, domain: &str) -> Option<&str> {
        self.ip_cache.get(domain).map(String::as_str)
    }
}

impl RegistryHooks<RouteKey, AuthorizedConnection> for OutboundRouting {
    fn registered(&mut self, key: &RouteKey, entry: &AuthorizedConnection) {
        if let Some(ip) = entry.peer_ip() {
            self.ip_cache
                .insert(key.destination.clone(), ip.to_string());
        }
        self.router.register_route(&key.destination);
    }

    fn unregistered(&mut self, key: &RouteKey, entry: &AuthorizedConnection) {
        self.router.unregister_route(&key.destination);
        self.accounting
            .record(entry.record(&key.destination, Direction::Outbound));
    }
}

/// Hooks of the inbound-authorized registry: accounting only.
pub struct InboundAccounting {
    accounting: Arc<dyn AccountingSink>,
}

impl InboundAccounting {
    pub fn new(accounting: Arc<dyn AccountingSink>) -> Self {
        Self { accounting }
    }
}

impl RegistryHooks<ResultKey, AuthorizedConnection> for InboundAccounting {
    fn unregistered(&mut self, key: &ResultKey, entry: &AuthorizedConnection) {
        self.accounting
            .record(entry.record(&key.source, Direction::Inbound));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counting {
        registered: usize,
        unregistered: usize,
    }

    impl RegistryHooks<&'static str, u32> for Counting {
        fn registered(&mut self, _key: &&'static str, _entry: &u32) {
            self.registered += 1;
        }

        fn unregistered(&mut self, _key: &&'static str, _entry: &u32) {
            self.unregistered += 1;
        }
    }

    #[test]
    fn unregister_is_idempotent() {
        let mut registry = Registry::new(Counting::default());
        registry.register("a", 1);
        assert_eq!(registry.unregister(&"a"), Some(1));
        assert_eq!(registry.unregister(&"a"), None);
        assert_eq!(registry.hooks().registered, 1);
        assert_eq!(registry.hooks().unregistered, 1);
    }

    #[test]
    fn replacing_fires_unregister_for_previous() {
        let mut registry = Registry::new(Counting::default());
        registry.register("a", 1);
        assert_eq!(registry.register("a", 2), Some(1));
        assert_eq!(registry.get(&"a"), Some(&2));
        assert_eq!(registry.hooks().registered, 2);
        assert_eq!(registry.hooks().unregistered, 1);
    }

    #[test]
    fn unregister_where_removes_matching_only() {
        let mut registry = Registry::new(Counting::default());
        registry.register("a", 1);
        registry.register("b", 2);
        registry.register("c", 3);
        let mut removed = registry.unregister_where(|_, v| *v % 2 == 1);
        removed.sort();
        assert_eq!(removed, vec![("a", 1), ("c", 3)]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.hooks().unregistered, 2);
    }
}
