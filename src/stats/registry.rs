use std::sync::atomic::{AtomicU64, Ordering};

/// Process-global proxy counters (spec §3 "ProxyStats"). All updates are
/// lock-free; average latency is derived on read, never stored.
#[derive(Debug, Default)]
pub struct ProxyStats {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    total_latency_ms: AtomicU64,
    min_latency_ms: AtomicU64,
    max_latency_ms: AtomicU64,
}

/// Point-in-time snapshot of `ProxyStats`, safe to hand to an admin endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProxyStatsSnapshot {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, latency_ms: u64) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.successful.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency_ms);
    }

    pub fn record_failure(&self, latency_ms: u64) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency_ms);
    }

    fn record_latency(&self, latency_ms: u64) {
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);

        let mut current_min = self.min_latency_ms.load(Ordering::Relaxed);
        while current_min == 0 || latency_ms < current_min {
            match self.min_latency_ms.compare_exchange_weak(
                current_min,
                latency_ms,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current_min = observed,
            }
        }

        let mut current_max = self.max_latency_ms.load(Ordering::Relaxed);
        while latency_ms > current_max {
            match self.max_latency_ms.compare_exchange_weak(
                current_max,
                latency_ms,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current_max = observed,
            }
        }
    }

    pub fn snapshot(&self) -> ProxyStatsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);

        ProxyStatsSnapshot {
            total,
            successful,
            failed,
            avg_latency_ms: if successful > 0 {
                total_latency as f64 / successful as f64
            } else {
                0.0
            },
            min_latency_ms: self.min_latency_ms.load(Ordering::Relaxed),
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
        }
    }
}
