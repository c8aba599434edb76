use crate::discovery::Endpoint;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// External collaborator (spec §1, §6): picks one endpoint from a live set
/// and tracks in-flight connections per endpoint. The retry engine
/// increments strictly before use and decrements after, on every path
/// including errors (spec §4.7 "Ordering guarantees").
#[async_trait]
pub trait EndpointSelector: Send + Sync {
    async fn select(&self, endpoints: &[Endpoint]) -> Option<Endpoint>;
    fn increment_connections(&self, endpoint: &Endpoint);
    fn decrement_connections(&self, endpoint: &Endpoint);
}

/// Round-robin `EndpointSelector`: a modular counter over the healthy
/// endpoint list, unweighted since `Endpoint` carries no weight field.
pub struct RoundRobinSelector {
    counter: AtomicUsize,
    in_flight: DashMap<String, AtomicUsize>,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
            in_flight: DashMap::new(),
        }
    }

    pub fn in_flight_count(&self, endpoint: &Endpoint) -> usize {
        self.in_flight
            .get(&endpoint.key())
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EndpointSelector for RoundRobinSelector {
    async fn select(&self, endpoints: &[Endpoint]) -> Option<Endpoint> {
        if endpoints.is_empty() {
            return None;
        }
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(endpoints[count % endpoints.len()].clone())
    }

    fn increment_connections(&self, endpoint: &Endpoint) {
        self.in_flight
            .entry(endpoint.key())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn decrement_connections(&self, endpoint: &Endpoint) {
        if let Some(counter) = self.in_flight.get(&endpoint.key()) {
            counter.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

/// RAII guard that decrements an endpoint's in-flight counter on drop,
/// regardless of which return path is taken.
pub struct ConnectionGuard<'a> {
    selector: &'a dyn EndpointSelector,
    endpoint: Endpoint,
}

impl<'a> ConnectionGuard<'a> {
    pub fn new(selector: &'a dyn EndpointSelector, endpoint: Endpoint) -> Self {
        selector.increment_connections(&endpoint);
        Self { selector, endpoint }
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.selector.decrement_connections(&self.endpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Endpoint;

    fn ep(name: &str) -> Endpoint {
        Endpoint::new(
            name,
            url::Url::parse(&format!("http://{name}:8080")).unwrap(),
            false,
        )
    }

    #[tokio::test]
    async fn test_round_robin_rotates() {
        let sel = RoundRobinSelector::new();
        let endpoints = vec![ep("a"), ep("b")];
        let first = sel.select(&endpoints).await.unwrap();
        let second = sel.select(&endpoints).await.unwrap();
        assert_ne!(first.name, second.name);
    }

    #[tokio::test]
    async fn test_select_empty_returns_none() {
        let sel = RoundRobinSelector::new();
        assert!(sel.select(&[]).await.is_none());
    }

    #[tokio::test]
    async fn test_connection_guard_decrements_on_drop() {
        let sel = RoundRobinSelector::new();
        let endpoint = ep("a");
        {
            let _guard = ConnectionGuard::new(&sel, endpoint.clone());
            assert_eq!(sel.in_flight_count(&endpoint), 1);
        }
        assert_eq!(sel.in_flight_count(&endpoint), 0);
    }
}
