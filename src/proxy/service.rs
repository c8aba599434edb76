use crate::config::Configuration;
use crate::discovery::{AliasMap, DiscoveryService, Endpoint};
use crate::error::{ErrorContext, OllaError};
use crate::metrics_extractor::MetricsExtractor;
use crate::proxy::alias::rewrite_model_alias;
use crate::proxy::buffer_pool::BufferPool;
use crate::proxy::classify::{classify_error, ClassifyContext, RawError};
use crate::proxy::context::{error_response, full_body, BoxBody};
use crate::proxy::headers::{
    apply_response_headers, is_trusted_peer, transform_request_headers, ResponseHeaderContext,
};
use crate::proxy::retry::execute_with_retry;
use crate::proxy::stream_engine::{run_streaming_engine, ChunkSource, ChunkWriter, StreamOutcome};
use crate::proxy::stream_mode::is_streaming_mode;
use crate::proxy::url::build_upstream_url;
use crate::selector::EndpointSelector;
use crate::stats::{EventBus, EventMetadata, ProxyEvent, ProxyEventKind, ProxyStats};
use crate::stats_collector::StatsCollector;
use crate::upstream::UpstreamClient;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::FutureExt;
use http::header::CONTENT_TYPE;
use http::StatusCode;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::{Request, Response};
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Everything the request-handling path needs, assembled once at startup
/// and cheaply cloned into each connection task (spec §4.9, §1).
#[derive(Clone)]
pub struct ProxyService {
    pub config: Arc<ArcSwap<Configuration>>,
    pub discovery: Arc<dyn DiscoveryService>,
    pub selector: Arc<dyn EndpointSelector>,
    pub client: UpstreamClient,
    pub stats: Arc<ProxyStats>,
    pub events: Arc<EventBus>,
    pub stats_collector: Arc<dyn StatsCollector>,
    pub metrics_extractor: Arc<dyn MetricsExtractor>,
    pub alias_map: Option<Arc<AliasMap>>,
    pub buffer_pool: Arc<BufferPool>,
}

impl ProxyService {
    /// Entry point wired into the hyper connection loop (spec §4.9 step 2:
    /// the panic boundary). A panic while handling a request is caught here
    /// and turned into a 500 rather than taking down the connection task.
    pub async fn handle(
        &self,
        req: Request<Incoming>,
        peer_addr: SocketAddr,
    ) -> Result<Response<BoxBody>, hyper::Error> {
        let request_id = new_request_id();
        let start = Instant::now();
        metrics::gauge!("olla_proxy_requests_in_flight").increment(1.0);

        let outcome = AssertUnwindSafe(self.handle_inner(req, peer_addr, request_id.clone(), start))
            .catch_unwind()
            .await;

        let response = match outcome {
            Ok(Ok(response)) => {
                self.record_completion(response.status().as_u16(), start.elapsed());
                response
            }
            Ok(Err(err)) => {
                self.record_failure(start.elapsed());
                self.record_completion(status_for(&err).as_u16(), start.elapsed());
                self.events.publish(ProxyEvent {
                    kind: ProxyEventKind::Error,
                    timestamp: std::time::SystemTime::now(),
                    request_id: request_id.clone(),
                    endpoint_name: err.context().and_then(|c| c.endpoint.clone()),
                    duration: start.elapsed(),
                    error: Some(err.to_string()),
                    metadata: EventMetadata::default(),
                });
                self.error_to_response(&err)
            }
            Err(_panic) => {
                let ctx = ErrorContext::new(request_id.clone(), "", "")
                    .with_cause("internal panic while handling request")
                    .with_elapsed(start.elapsed());
                self.record_failure(start.elapsed());
                self.record_completion(500, start.elapsed());
                self.events.publish(ProxyEvent {
                    kind: ProxyEventKind::Error,
                    timestamp: std::time::SystemTime::now(),
                    request_id,
                    endpoint_name: None,
                    duration: start.elapsed(),
                    error: Some("internal panic".to_string()),
                    metadata: EventMetadata::default(),
                });
                self.error_to_response(&OllaError::InternalPanic(ctx))
            }
        };

        metrics::gauge!("olla_proxy_requests_in_flight").decrement(1.0);
        Ok(response)
    }

    /// Spec §4.9 steps 3-6: fetch healthy endpoints, then retry across them
    /// with one attempt closure per endpoint. The closure returns as soon as
    /// upstream response headers are obtained — from that point the status
    /// is committed and `execute_with_retry` will not try another endpoint,
    /// even though the body keeps streaming in a detached task afterwards.
    async fn handle_inner(
        &self,
        req: Request<Incoming>,
        peer_addr: SocketAddr,
        request_id: String,
        start: Instant,
    ) -> Result<Response<BoxBody>, OllaError> {
        let cfg = self.config.load_full();

        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let raw_query = req.uri().query().map(str::to_string);
        let original_host = req
            .headers()
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let base_headers = req.headers().clone();

        let body_bytes = req
            .into_body()
            .collect()
            .await
            .map_err(|e| {
                OllaError::BadRequest(
                    ErrorContext::new(request_id.as_str(), method.as_str(), path.as_str())
                        .with_cause(format!("failed reading request body: {e}")),
                )
            })?
            .to_bytes();

        let trusted_nets: Vec<ipnet::IpNet> = cfg
            .trusted_proxies
            .iter()
            .filter_map(|c| c.parse().ok())
            .collect();
        let trusted_peer = is_trusted_peer(peer_addr.ip(), &trusted_nets);

        let endpoints = self.discovery.healthy_endpoints().await;
        if endpoints.is_empty() {
            return Err(OllaError::NoHealthyEndpoints);
        }

        let response_timeout = cfg.response_timeout();
        let cancel = CancellationToken::new();
        let response_slot: Arc<Mutex<Option<Response<BoxBody>>>> = Arc::new(Mutex::new(None));

        execute_with_retry(
            endpoints,
            self.selector.as_ref(),
            self.discovery.as_ref(),
            &cancel,
            &request_id,
            |endpoint: Endpoint| {
                let response_slot = response_slot.clone();
                let method = method.clone();
                let path = path.clone();
                let raw_query = raw_query.clone();
                let original_host = original_host.clone();
                let mut headers = base_headers.clone();
                let body = body_bytes.clone();
                let cfg = cfg.clone();
                let request_id = request_id.clone();
                async move {
                    let response = self
                        .attempt(
                            endpoint,
                            method,
                            &path,
                            raw_query.as_deref(),
                            &mut headers,
                            body,
                            original_host.as_deref(),
                            peer_addr,
                            trusted_peer,
                            &cfg,
                            response_timeout,
                            &request_id,
                            start,
                        )
                        .await?;
                    *response_slot.lock().await = Some(response);
                    Ok(())
                }
            },
        )
        .await?;

        response_slot.lock().await.take().ok_or_else(|| {
            OllaError::AllEndpointsFailed(
                ErrorContext::new(request_id.as_str(), method.as_str(), path.as_str())
                    .with_cause("retry engine reported success with no committed response"),
            )
        })
    }

    /// One attempt against a single endpoint (spec §4.9 step 4): build the
    /// upstream URL, transform headers, rewrite the alias, perform the
    /// round-trip, then hand back the client-facing response immediately
    /// while streaming the body in a detached task (spec §4.9 step 6).
    #[allow(clippy::too_many_arguments)]
    async fn attempt(
        &self,
        endpoint: Endpoint,
        method: http::Method,
        path: &str,
        raw_query: Option<&str>,
        headers: &mut http::HeaderMap,
        body: Bytes,
        original_host: Option<&str>,
        peer_addr: SocketAddr,
        trusted_peer: bool,
        cfg: &Configuration,
        response_timeout: Option<Duration>,
        request_id: &str,
        start: Instant,
    ) -> Result<Response<BoxBody>, OllaError> {
        let target_url = build_upstream_url(path, raw_query, &cfg.proxy_prefix, &endpoint, request_id)?;

        transform_request_headers(
            headers,
            peer_addr,
            trusted_peer,
            original_host,
            &cfg.proxied_by_name,
            false,
        );

        let outgoing_body = match rewrite_model_alias(&body, self.alias_map.as_deref(), &endpoint.key()) {
            Some(rewritten) => {
                headers.insert(
                    http::header::CONTENT_LENGTH,
                    http::HeaderValue::from_str(&rewritten.len().to_string()).unwrap(),
                );
                Bytes::from(rewritten)
            }
            None => body,
        };
        let model = extract_model_field(&outgoing_body);
        let context_stream_flag = extract_stream_flag(&outgoing_body);

        let mut upstream_req = Request::builder()
            .method(method)
            .uri(target_url.as_str())
            .body(full_body(outgoing_body))
            .map_err(|e| {
                OllaError::BadRequest(
                    ErrorContext::new(request_id, "", path)
                        .with_cause(format!("failed building upstream request: {e}")),
                )
            })?;
        *upstream_req.headers_mut() = headers.clone();

        let round_trip_start = Instant::now();
        let send = self.client.request(upstream_req);
        let result = match response_timeout {
            Some(timeout) => tokio::time::timeout(timeout, send).await.map_err(|_| {
                OllaError::UpstreamTimeout(
                    ErrorContext::new(request_id, "", path)
                        .with_endpoint(endpoint.name.to_string())
                        .with_cause(classify_error(
                            &RawError::DeadlineExceeded,
                            round_trip_start.elapsed(),
                            ClassifyContext::Backend,
                            Some(timeout),
                        ))
                        .with_elapsed(round_trip_start.elapsed()),
                )
            }),
            None => Ok(send.await),
        };

        let upstream_response = match result {
            Ok(Ok(resp)) => resp,
            Ok(Err(hyper_err)) => {
                let message = classify_error(
                    &RawError::Opaque(hyper_err.to_string()),
                    round_trip_start.elapsed(),
                    ClassifyContext::Backend,
                    response_timeout,
                );
                return Err(OllaError::ConnectionError(
                    ErrorContext::new(request_id, "", path)
                        .with_endpoint(endpoint.name.to_string())
                        .with_cause(message)
                        .with_elapsed(round_trip_start.elapsed()),
                ));
            }
            Err(timeout_err) => return Err(timeout_err),
        };

        let (mut parts, incoming_body) = upstream_response.into_parts();
        let status = parts.status.as_u16();
        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let is_streaming = is_streaming_mode(cfg.profile, content_type.as_deref(), context_stream_flag);

        let response_ctx = ResponseHeaderContext {
            request_id: request_id.to_string(),
            response_time_ms: start.elapsed().as_millis() as u64,
            endpoint_name: endpoint.name.to_string(),
            backend_type: format!("{:?}", endpoint.backend_type),
            model,
            routing_strategy: Some("round_robin".to_string()),
            routing_decision: None,
            routing_reason: None,
            served_by: cfg.proxied_by_name.clone(),
        };
        apply_response_headers(&mut parts.headers, &response_ctx);

        let (tx, rx) = mpsc::channel::<Bytes>(32);
        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok::<_, hyper::Error>(Frame::data(chunk)), rx))
        });
        let body: BoxBody = StreamBody::new(stream).boxed();
        let response = Response::from_parts(parts, body);

        self.spawn_streaming_task(
            incoming_body,
            tx,
            endpoint,
            cfg.read_timeout(),
            response_timeout,
            is_streaming,
            content_type,
            request_id.to_string(),
            start,
            status,
        );

        Ok(response)
    }

    /// Drives the streaming engine to completion off the request-handling
    /// path (spec §4.9 step 5-6): the response headers are already on the
    /// wire, so failures here can only be logged.
    #[allow(clippy::too_many_arguments)]
    fn spawn_streaming_task(
        &self,
        incoming_body: Incoming,
        tx: mpsc::Sender<Bytes>,
        endpoint: Endpoint,
        read_timeout: Duration,
        response_timeout: Option<Duration>,
        is_streaming: bool,
        content_type: Option<String>,
        request_id: String,
        start: Instant,
        status: u16,
    ) {
        let service = self.clone();
        tokio::spawn(async move {
            let client_cancel = CancellationToken::new();
            let upstream_cancel = CancellationToken::new();
            let _deadline_guard = response_timeout.map(|d| {
                let token = upstream_cancel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(d).await;
                    token.cancel();
                })
            });

            let source = IncomingChunkSource { body: incoming_body };
            let writer = ChannelChunkWriter { tx };

            let (state, outcome) = run_streaming_engine(
                source,
                writer,
                client_cancel,
                upstream_cancel,
                read_timeout,
                is_streaming,
                content_type,
                &request_id,
                &service.buffer_pool,
            )
            .await;

            let duration = start.elapsed();
            let provider_metrics = if endpoint.backend_type != crate::discovery::BackendType::Unknown {
                service
                    .metrics_extractor
                    .extract_from_chunk(&state.tail_bytes(), endpoint.backend_type)
                    .await
            } else {
                None
            };

            metrics::counter!("olla_stream_bytes_total").increment(state.total_bytes);
            if state.client_disconnected {
                metrics::counter!("olla_stream_disconnects_total").increment(1);
            }

            match outcome {
                StreamOutcome::Eof | StreamOutcome::Cancelled => {
                    service.stats.record_success(duration.as_millis() as u64);
                    service
                        .stats_collector
                        .record_request(&endpoint, status, duration, state.total_bytes)
                        .await;
                    let kind = if matches!(outcome, StreamOutcome::Cancelled) && state.client_disconnected {
                        ProxyEventKind::ClientDisconnected
                    } else {
                        ProxyEventKind::Success
                    };
                    service.events.publish(ProxyEvent {
                        kind,
                        timestamp: std::time::SystemTime::now(),
                        request_id,
                        endpoint_name: Some(endpoint.name.to_string()),
                        duration,
                        error: None,
                        metadata: EventMetadata {
                            bytes_sent: Some(state.total_bytes),
                            status_code: Some(status),
                            model: provider_metrics.as_ref().and_then(|m| m.model.clone()),
                            bytes_after_disconnect: Some(state.bytes_after_disconnect),
                            counter: None,
                        },
                    });
                }
                StreamOutcome::TimedOut | StreamOutcome::Failed(_) => {
                    service.stats.record_failure(duration.as_millis() as u64);
                    let message = match &outcome {
                        StreamOutcome::Failed(err) => err.to_string(),
                        _ => "stream watchdog timed out".to_string(),
                    };
                    service.events.publish(ProxyEvent {
                        kind: ProxyEventKind::Error,
                        timestamp: std::time::SystemTime::now(),
                        request_id,
                        endpoint_name: Some(endpoint.name.to_string()),
                        duration,
                        error: Some(message),
                        metadata: EventMetadata {
                            bytes_sent: Some(state.total_bytes),
                            status_code: Some(status),
                            model: None,
                            bytes_after_disconnect: None,
                            counter: None,
                        },
                    });
                }
            }
        });
    }

    fn error_to_response(&self, err: &OllaError) -> Response<BoxBody> {
        let status = status_for(err);
        let message = err
            .context()
            .map(|c| c.cause.clone())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| err.to_string());
        error_response(status, &message)
    }

    fn record_failure(&self, elapsed: Duration) {
        self.stats.record_failure(elapsed.as_millis() as u64);
    }

    fn record_completion(&self, status: u16, elapsed: Duration) {
        let mut buf = itoa::Buffer::new();
        let status_str = buf.format(status);
        metrics::counter!(
            "olla_proxy_requests_total",
            "status_code" => status_str.to_owned(),
        )
        .increment(1);
        metrics::histogram!("olla_proxy_request_duration_seconds").record(elapsed.as_secs_f64());
    }
}

fn status_for(err: &OllaError) -> StatusCode {
    match err {
        OllaError::NoHealthyEndpoints => StatusCode::SERVICE_UNAVAILABLE,
        OllaError::EndpointSelectionFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
        OllaError::BadRequest(_) => StatusCode::BAD_REQUEST,
        OllaError::ConnectionError(_) => StatusCode::BAD_GATEWAY,
        OllaError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        OllaError::ClientCanceled(_) => StatusCode::from_u16(499).unwrap(),
        OllaError::StreamStalled(_) => StatusCode::GATEWAY_TIMEOUT,
        OllaError::StreamAborted(_) => StatusCode::BAD_GATEWAY,
        OllaError::InternalPanic(_) => StatusCode::INTERNAL_SERVER_ERROR,
        OllaError::AllEndpointsFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn new_request_id() -> String {
    format!("req-{:016x}", rand::random::<u64>())
}

/// Best-effort extraction of the (possibly rewritten) `model` field for the
/// `X-Olla-Model` response header. Returns `None` rather than failing the
/// request when the body is not a JSON object.
fn extract_model_field(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.get("model")?.as_str().map(str::to_string)
}

/// Reads the request body's own `"stream"` field, the context-carried flag
/// the streaming mode detector consults in `Auto` profile once content-type
/// classification falls through (spec §4.4).
fn extract_stream_flag(body: &[u8]) -> Option<bool> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.get("stream")?.as_bool()
}

/// Adapts an upstream `Incoming` body into the streaming engine's pull
/// interface (spec §4.8).
struct IncomingChunkSource {
    body: Incoming,
}

#[async_trait]
impl ChunkSource for IncomingChunkSource {
    async fn read_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
        loop {
            match self.body.frame().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(std::io::Error::other(e)),
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) if !data.is_empty() => return Ok(Some(data)),
                    Ok(_) => continue,
                    Err(_trailers) => continue,
                },
            }
        }
    }
}

/// Adapts a bounded channel into the streaming engine's push interface; the
/// other end is pulled lazily by the hyper response body returned to the
/// client, so writes here apply backpressure from the real client socket.
struct ChannelChunkWriter {
    tx: mpsc::Sender<Bytes>,
}

#[async_trait]
impl ChunkWriter for ChannelChunkWriter {
    async fn write_chunk(&mut self, data: Bytes) -> std::io::Result<()> {
        self.tx
            .send(data)
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "client gone"))
    }

    async fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
