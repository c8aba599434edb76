use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Health status of an endpoint (spec §3 "Endpoint").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStatus {
    Healthy,
    Offline,
    Unknown,
}

/// Upper bound on the health-check backoff multiplier (spec §3, §4.5).
pub const MAX_BACKOFF_MULT: u32 = 12;
/// Upper bound on the health-check backoff interval (spec §3, §4.5).
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Backend family tag, used only to pick a `MetricsExtractor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Ollama,
    LlamaCpp,
    LmStudio,
    VLlm,
    OpenAiCompatible,
    Unknown,
}

/// Per-endpoint health bookkeeping (spec §3). Owned by the discovery
/// subsystem — the proxy core only ever reads a snapshot and submits
/// *proposed* updates via `DiscoveryService::update_endpoint_status`; it
/// never mutates an `Endpoint` in place (spec §5 "Shared resources").
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    pub status: EndpointStatus,
    pub consecutive_failures: u32,
    pub backoff_multiplier: u32,
    pub check_interval: Duration,
    pub last_checked: Option<Instant>,
    pub next_check_time: Option<Instant>,
}

impl Default for EndpointHealth {
    fn default() -> Self {
        Self {
            status: EndpointStatus::Unknown,
            consecutive_failures: 0,
            backoff_multiplier: 1,
            check_interval: Duration::from_secs(5),
            last_checked: None,
            next_check_time: None,
        }
    }
}

impl EndpointHealth {
    /// Invariant from spec §3/§8: an offline endpoint's next check must be
    /// strictly in the future relative to its last check, and the backoff
    /// multiplier never exceeds `MAX_BACKOFF_MULT`.
    pub fn invariant_holds(&self) -> bool {
        if self.backoff_multiplier > MAX_BACKOFF_MULT {
            return false;
        }
        if self.status == EndpointStatus::Offline {
            match (self.last_checked, self.next_check_time) {
                (Some(last), Some(next)) => next > last,
                _ => false,
            }
        } else {
            true
        }
    }
}

/// A configured upstream backend (spec §3 "Endpoint").
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub name: Arc<str>,
    pub base_url: url::Url,
    pub backend_type: BackendType,
    pub preserve_path: bool,
    pub health: EndpointHealth,
}

impl Endpoint {
    pub fn new(name: impl Into<Arc<str>>, base_url: url::Url, preserve_path: bool) -> Self {
        Self {
            name: name.into(),
            base_url,
            backend_type: BackendType::Unknown,
            preserve_path,
            health: EndpointHealth::default(),
        }
    }

    /// Stable identity used as the alias-map key and as the in-flight
    /// connection counter key — the endpoint's base URL string.
    pub fn key(&self) -> String {
        self.base_url.to_string()
    }
}

/// External collaborator (spec §1, §6): lists healthy endpoints and accepts
/// status-update proposals. Implemented here with a minimal in-memory
/// default (`StaticDiscoveryService`) so the crate runs standalone; real
/// deployments plug in their own health-checking discovery.
#[async_trait]
pub trait DiscoveryService: Send + Sync {
    async fn healthy_endpoints(&self) -> Vec<Endpoint>;

    /// Propose a status update for `endpoint` (by name). The core never
    /// mutates `Endpoint` records in place — it submits a full copy with
    /// the fields it wants changed.
    async fn update_endpoint_status(&self, endpoint: Endpoint);
}

/// In-memory `DiscoveryService` backed by a concurrent map: endpoints are
/// upserted/removed without holding a global lock.
pub struct StaticDiscoveryService {
    endpoints: dashmap::DashMap<String, Endpoint>,
}

impl StaticDiscoveryService {
    pub fn new() -> Self {
        Self {
            endpoints: dashmap::DashMap::new(),
        }
    }

    pub fn from_endpoints(endpoints: Vec<Endpoint>) -> Self {
        let map = dashmap::DashMap::new();
        for ep in endpoints {
            map.insert(ep.name.to_string(), ep);
        }
        Self { endpoints: map }
    }

    pub fn upsert(&self, endpoint: Endpoint) {
        self.endpoints.insert(endpoint.name.to_string(), endpoint);
    }

    pub fn remove(&self, name: &str) -> bool {
        self.endpoints.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl Default for StaticDiscoveryService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiscoveryService for StaticDiscoveryService {
    async fn healthy_endpoints(&self) -> Vec<Endpoint> {
        self.endpoints
            .iter()
            .filter(|e| e.value().health.status != EndpointStatus::Offline)
            .map(|e| e.value().clone())
            .collect()
    }

    async fn update_endpoint_status(&self, endpoint: Endpoint) {
        tracing::debug!(
            endpoint = %endpoint.name,
            status = ?endpoint.health.status,
            consecutive_failures = endpoint.health.consecutive_failures,
            "discovery: endpoint status updated"
        );
        self.endpoints.insert(endpoint.name.to_string(), endpoint);
    }
}

/// Alias maps are context-supplied (spec §1, §4.3): keyed by the selected
/// endpoint's URL string, valued by the backend-native model name.
pub type AliasMap = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_health(now: Instant) -> EndpointHealth {
        EndpointHealth {
            status: EndpointStatus::Offline,
            consecutive_failures: 1,
            backoff_multiplier: 2,
            check_interval: Duration::from_secs(5),
            last_checked: Some(now),
            next_check_time: Some(now + Duration::from_secs(5)),
        }
    }

    #[test]
    fn test_invariant_holds_for_well_formed_offline_endpoint() {
        let now = Instant::now();
        assert!(offline_health(now).invariant_holds());
    }

    #[test]
    fn test_invariant_violated_when_next_check_not_after_last() {
        let now = Instant::now();
        let mut h = offline_health(now);
        h.next_check_time = Some(now);
        assert!(!h.invariant_holds());
    }

    #[test]
    fn test_invariant_violated_when_multiplier_exceeds_max() {
        let now = Instant::now();
        let mut h = offline_health(now);
        h.backoff_multiplier = MAX_BACKOFF_MULT + 1;
        assert!(!h.invariant_holds());
    }

    #[tokio::test]
    async fn test_static_discovery_filters_offline() {
        let svc = StaticDiscoveryService::new();
        let mut ep = Endpoint::new(
            "a",
            url::Url::parse("http://127.0.0.1:11434").unwrap(),
            false,
        );
        svc.upsert(ep.clone());
        assert_eq!(svc.healthy_endpoints().await.len(), 1);

        ep.health.status = EndpointStatus::Offline;
        svc.update_endpoint_status(ep).await;
        assert_eq!(svc.healthy_endpoints().await.len(), 0);
    }
}
