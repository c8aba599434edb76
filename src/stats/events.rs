use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Metadata carried by a `ProxyEvent` (spec §3 "ProxyEvent").
#[derive(Debug, Clone, Default)]
pub struct EventMetadata {
    pub bytes_sent: Option<u64>,
    pub status_code: Option<u16>,
    pub model: Option<String>,
    pub bytes_after_disconnect: Option<u64>,
    pub counter: Option<u64>,
}

/// Proxy lifecycle event kind (spec §3 "ProxyEvent").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyEventKind {
    Success,
    Error,
    CircuitBreakerOpen,
    ClientDisconnected,
}

impl ProxyEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyEventKind::Success => "proxy.success",
            ProxyEventKind::Error => "proxy.error",
            ProxyEventKind::CircuitBreakerOpen => "circuit_breaker.open",
            ProxyEventKind::ClientDisconnected => "client.disconnected",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxyEvent {
    pub kind: ProxyEventKind,
    pub timestamp: std::time::SystemTime,
    pub request_id: String,
    pub endpoint_name: Option<String>,
    pub duration: Duration,
    pub error: Option<String>,
    pub metadata: EventMetadata,
}

/// Non-blocking publish-subscribe bus for proxy lifecycle events. Built on
/// `tokio::sync::broadcast`, whose send is already non-blocking and whose
/// bounded ring drops the oldest entry for a lagging subscriber rather than
/// stalling the publisher.
pub struct EventBus {
    sender: broadcast::Sender<Arc<ProxyEvent>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ProxyEvent>> {
        self.sender.subscribe()
    }

    /// Publish one event. Never blocks: with zero subscribers this is a
    /// no-op. `broadcast::Sender::send` only errors once every receiver has
    /// dropped, which `receiver_count` above already covers — a lagging
    /// subscriber instead silently loses its oldest unread event to a full
    /// ring, surfaced only as `RecvError::Lagged` on that receiver's next
    /// `recv`, never as a `send` error. Detect that case here, before the
    /// send, by checking whether the ring is already at capacity.
    pub fn publish(&self, event: ProxyEvent) {
        if self.sender.receiver_count() == 0 {
            return;
        }
        if self.sender.len() >= self.capacity {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new(4);
        bus.publish(ProxyEvent {
            kind: ProxyEventKind::Success,
            timestamp: std::time::SystemTime::now(),
            request_id: "r1".into(),
            endpoint_name: None,
            duration: Duration::from_millis(10),
            error: None,
            metadata: EventMetadata::default(),
        });
        assert_eq!(bus.dropped_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.publish(ProxyEvent {
            kind: ProxyEventKind::Success,
            timestamp: std::time::SystemTime::now(),
            request_id: "r1".into(),
            endpoint_name: Some("ep1".into()),
            duration: Duration::from_millis(5),
            error: None,
            metadata: EventMetadata::default(),
        });
        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, ProxyEventKind::Success);
        assert_eq!(received.request_id, "r1");
    }

    fn event(id: &str) -> ProxyEvent {
        ProxyEvent {
            kind: ProxyEventKind::Success,
            timestamp: std::time::SystemTime::now(),
            request_id: id.into(),
            endpoint_name: None,
            duration: Duration::from_millis(1),
            error: None,
            metadata: EventMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_lagging_subscriber_counts_as_dropped() {
        let bus = EventBus::new(2);
        let _rx = bus.subscribe();
        // Never read from _rx: the 3rd publish overflows the 2-slot ring
        // and evicts the oldest unread event, which a `send`-only check
        // would miss entirely.
        bus.publish(event("r1"));
        bus.publish(event("r2"));
        bus.publish(event("r3"));
        assert_eq!(bus.dropped_count(), 1);
    }
}
