use super::GatewayState;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn handle_admin(
    req: Request<Incoming>,
    state: GatewayState,
) -> Result<Response<BoxBody>, hyper::Error> {
    match req.uri().path() {
        "/health" | "/healthz" => Ok(Response::builder()
            .status(200)
            .header("content-type", "application/json")
            .body(full_body(r#"{"status":"ok"}"#))
            .unwrap()),

        "/ready" | "/readyz" => {
            let snapshot = state.proxy.stats.snapshot();
            Ok(Response::builder()
                .status(200)
                .header("content-type", "application/json")
                .body(full_body(format!(
                    r#"{{"status":"ready","total_requests":{}}}"#,
                    snapshot.total,
                )))
                .unwrap())
        }

        "/stats" => {
            let snapshot = state.proxy.stats.snapshot();
            let body = serde_json::json!({
                "total": snapshot.total,
                "successful": snapshot.successful,
                "failed": snapshot.failed,
                "avg_latency_ms": snapshot.avg_latency_ms,
                "min_latency_ms": snapshot.min_latency_ms,
                "max_latency_ms": snapshot.max_latency_ms,
                "events_dropped": state.proxy.events.dropped_count(),
            });
            Ok(Response::builder()
                .status(200)
                .header("content-type", "application/json")
                .body(full_body(body.to_string()))
                .unwrap())
        }

        "/metrics" => {
            let body = state.metrics.render();
            Ok(Response::builder()
                .status(200)
                .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
                .body(full_body(body))
                .unwrap())
        }

        _ => Ok(Response::builder()
            .status(404)
            .body(full_body(r#"{"error":"not found"}"#))
            .unwrap()),
    }
}
