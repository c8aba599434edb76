use crate::discovery::Endpoint;
use async_trait::async_trait;
use std::time::Duration;

/// External collaborator (spec §1, §6): an observability sink notified once
/// per completed request. Implementations typically forward into a metrics
/// backend; the proxy core never blocks meaningfully on this call.
#[async_trait]
pub trait StatsCollector: Send + Sync {
    async fn record_request(
        &self,
        endpoint: &Endpoint,
        status: u16,
        duration: Duration,
        bytes: u64,
    );
}

/// `StatsCollector` that forwards into `tracing` — useful as a default and
/// in tests where no real sink is wired up.
pub struct TracingStatsCollector;

#[async_trait]
impl StatsCollector for TracingStatsCollector {
    async fn record_request(
        &self,
        endpoint: &Endpoint,
        status: u16,
        duration: Duration,
        bytes: u64,
    ) {
        tracing::info!(
            endpoint = %endpoint.name,
            status,
            duration_ms = duration.as_millis() as u64,
            bytes,
            "request completed"
        );
    }
}
