use crate::discovery::{DiscoveryService, Endpoint};
use crate::error::{ErrorContext, OllaError};
use crate::selector::{ConnectionGuard, EndpointSelector};
use crate::upstream::backoff::next_backoff;
use std::future::Future;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Execute `attempt_fn` against endpoints from `endpoints` in the order the
/// selector returns them, failing over on connection-class errors only
/// (spec §4.7). Delivers the request to at most one endpoint successfully.
pub async fn execute_with_retry<F, Fut>(
    mut endpoints: Vec<Endpoint>,
    selector: &dyn EndpointSelector,
    discovery: &dyn DiscoveryService,
    cancel: &CancellationToken,
    request_id: &str,
    mut attempt_fn: F,
) -> Result<(), OllaError>
where
    F: FnMut(Endpoint) -> Fut,
    Fut: Future<Output = Result<(), OllaError>>,
{
    if endpoints.is_empty() {
        return Err(OllaError::NoHealthyEndpoints);
    }

    let mut attempts = 0usize;
    let mut last_err: Option<OllaError> = None;
    let initial_len = endpoints.len();

    while attempts < initial_len && !endpoints.is_empty() {
        if cancel.is_cancelled() {
            return Err(OllaError::ClientCanceled(
                ErrorContext::new(request_id, "", "").with_cause("canceled before attempt"),
            ));
        }

        let endpoint = match selector.select(&endpoints).await {
            Some(e) => e,
            None => break,
        };

        attempts += 1;
        let result = {
            let _guard = ConnectionGuard::new(selector, endpoint.clone());
            attempt_fn(endpoint.clone()).await
        };

        match result {
            Ok(()) => return Ok(()),
            Err(err) if err.is_connection_class() => {
                let cause = err.to_string();
                metrics::counter!(
                    "olla_retry_attempts_total",
                    "endpoint" => endpoint.name.to_string(),
                )
                .increment(1);
                metrics::counter!(
                    "olla_circuit_events_total",
                    "endpoint" => endpoint.name.to_string(),
                    "state" => "offline",
                )
                .increment(1);
                mark_endpoint_offline(discovery, &endpoint).await;
                endpoints.retain(|e| e.key() != endpoint.key());
                last_err = Some(err);
                tracing::warn!(
                    request_id,
                    endpoint = %endpoint.name,
                    cause,
                    "retry: connection-class error, trying next endpoint"
                );
            }
            Err(err) => return Err(err),
        }
    }

    let cause = last_err
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no attempts made".to_string());

    let message = if endpoints.is_empty() {
        format!("all endpoints failed with connection errors: {cause}")
    } else {
        format!("max attempts ({attempts}) reached: {cause}")
    };

    Err(OllaError::AllEndpointsFailed(
        ErrorContext::new(request_id, "", "").with_cause(message),
    ))
}

/// Propose the endpoint as offline to the discovery service, applying one
/// backoff step (spec §4.5, §4.7 rule 6). The core never mutates the
/// endpoint record in place — it submits a fresh copy.
async fn mark_endpoint_offline(discovery: &dyn DiscoveryService, endpoint: &Endpoint) {
    let mut updated = endpoint.clone();
    let now = Instant::now();
    next_backoff(&mut updated.health, now);

    if let Some(next_check) = updated.health.next_check_time {
        metrics::gauge!(
            "olla_endpoint_backoff_seconds",
            "endpoint" => endpoint.name.to_string(),
        )
        .set(next_check.saturating_duration_since(now).as_secs_f64());
    }

    discovery.update_endpoint_status(updated).await;
}

/// Connection-class recognition (spec §4.7): case-insensitive substring
/// match against the transport-error vocabulary a dial/read/write failure
/// is likely to surface as.
pub fn is_connection_class_message(msg: &str) -> bool {
    const NEEDLES: &[&str] = &[
        "connection refused",
        "connection reset",
        "no such host",
        "network is unreachable",
        "no route to host",
        "connection timed out",
        "i/o timeout",
        "dial tcp",
        "connectex:",
    ];
    let lower = msg.to_ascii_lowercase();
    NEEDLES.iter().any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticDiscoveryService;
    use crate::selector::RoundRobinSelector;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use url::Url;

    fn ep(name: &str) -> Endpoint {
        Endpoint::new(name, Url::parse(&format!("http://{name}")).unwrap(), false)
    }

    #[tokio::test]
    async fn test_seed_scenario_4_retry_failover() {
        let endpoints = vec![ep("e1"), ep("e2")];
        let selector = RoundRobinSelector::new();
        let discovery = StaticDiscoveryService::from_endpoints(endpoints.clone());
        let cancel = CancellationToken::new();
        let calls: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));

        let calls_clone = calls.clone();
        let result = execute_with_retry(
            endpoints,
            &selector,
            &discovery,
            &cancel,
            "req-4",
            move |endpoint| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    if endpoint.name.as_ref() == "e1" {
                        Err(OllaError::ConnectionError(
                            ErrorContext::new("req-4", "GET", "/")
                                .with_cause("dial tcp 127.0.0.1:9999: connect: connection refused"),
                        ))
                    } else {
                        Ok(())
                    }
                }
            },
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::Relaxed), 2);

        let e1 = discovery
            .healthy_endpoints()
            .await
            .into_iter()
            .find(|e| e.name.as_ref() == "e1");
        assert!(e1.is_none(), "e1 should now be offline/excluded from healthy set");
    }

    #[tokio::test]
    async fn test_non_connection_error_returns_immediately() {
        let endpoints = vec![ep("e1"), ep("e2")];
        let selector = RoundRobinSelector::new();
        let discovery = StaticDiscoveryService::from_endpoints(endpoints.clone());
        let cancel = CancellationToken::new();

        let result = execute_with_retry(
            endpoints,
            &selector,
            &discovery,
            &cancel,
            "req-x",
            |_endpoint| async { Err(OllaError::BadRequest(ErrorContext::new("req-x", "GET", "/"))) },
        )
        .await;

        assert!(matches!(result, Err(OllaError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_all_endpoints_failed_when_every_attempt_is_connection_class() {
        let endpoints = vec![ep("e1"), ep("e2")];
        let selector = RoundRobinSelector::new();
        let discovery = StaticDiscoveryService::from_endpoints(endpoints.clone());
        let cancel = CancellationToken::new();

        let result = execute_with_retry(
            endpoints,
            &selector,
            &discovery,
            &cancel,
            "req-y",
            |_endpoint| async {
                Err(OllaError::ConnectionError(
                    ErrorContext::new("req-y", "GET", "/").with_cause("connection refused"),
                ))
            },
        )
        .await;

        assert!(matches!(result, Err(OllaError::AllEndpointsFailed(_))));
    }

    #[test]
    fn test_is_connection_class_message_matches_known_substrings() {
        assert!(is_connection_class_message(
            "dial tcp 127.0.0.1:9999: connect: connection refused"
        ));
        assert!(!is_connection_class_message("bad request body"));
    }
}
