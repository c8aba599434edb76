use crate::metrics_extractor::ProviderMetrics;
use std::time::{Instant, SystemTime};

/// Routing-decision breadcrumb, attached to a `RequestStats` once an
/// endpoint has been selected.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub endpoint_name: String,
    pub attempt: u32,
    pub reason: Option<String>,
}

/// Per-phase timing counters, all in milliseconds (spec §3 "RequestStats").
#[derive(Debug, Clone, Default)]
pub struct PhaseTimings {
    pub selection_ms: u64,
    pub header_processing_ms: u64,
    pub request_processing_ms: u64,
    pub backend_response_ms: u64,
    pub first_data_ms: u64,
    pub streaming_ms: u64,
    pub latency_ms: u64,
}

/// Per-request statistics, owned by the caller and mutated by the proxy
/// core across the lifetime of one request (spec §3 "RequestStats").
#[derive(Debug, Clone)]
pub struct RequestStats {
    pub request_id: String,
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
    pub endpoint_name: Option<String>,
    pub target_url: Option<String>,
    pub model: Option<String>,
    pub timings: PhaseTimings,
    pub total_bytes: u64,
    pub routing_decision: Option<RoutingDecision>,
    pub provider_metrics: Option<ProviderMetrics>,

    #[doc(hidden)]
    started_at: Instant,
}

impl RequestStats {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            start_time: SystemTime::now(),
            end_time: None,
            endpoint_name: None,
            target_url: None,
            model: None,
            timings: PhaseTimings::default(),
            total_bytes: 0,
            routing_decision: None,
            provider_metrics: None,
            started_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    pub fn finish(&mut self) {
        self.end_time = Some(SystemTime::now());
        self.timings.latency_ms = self.elapsed().as_millis() as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_sets_latency_and_end_time() {
        let mut stats = RequestStats::new("req-1");
        assert!(stats.end_time.is_none());
        stats.finish();
        assert!(stats.end_time.is_some());
    }
}
