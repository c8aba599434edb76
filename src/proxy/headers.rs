use http::{HeaderMap, HeaderName, HeaderValue};
use ipnet::IpNet;
use std::net::{IpAddr, SocketAddr};

/// RFC-7230 hop-by-hop headers, stripped before forwarding in either
/// direction (spec §4.2).
fn hop_by_hop_headers() -> &'static [HeaderName] {
    use http::header::{CONNECTION, TRANSFER_ENCODING};
    static HEADERS: std::sync::OnceLock<Vec<HeaderName>> = std::sync::OnceLock::new();
    HEADERS.get_or_init(|| {
        vec![
            CONNECTION,
            HeaderName::from_static("keep-alive"),
            HeaderName::from_static("proxy-authenticate"),
            HeaderName::from_static("proxy-authorization"),
            HeaderName::from_static("te"),
            HeaderName::from_static("trailer"),
            TRANSFER_ENCODING,
            HeaderName::from_static("upgrade"),
        ]
    })
}

/// Security-sensitive headers, never forwarded upstream (spec §4.2).
fn sensitive_headers() -> &'static [HeaderName] {
    use http::header::{AUTHORIZATION, COOKIE};
    static HEADERS: std::sync::OnceLock<Vec<HeaderName>> = std::sync::OnceLock::new();
    HEADERS.get_or_init(|| {
        vec![
            AUTHORIZATION,
            COOKIE,
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static("x-auth-token"),
            HeaderName::from_static("proxy-authorization"),
        ]
    })
}

fn remove_headers(headers: &mut HeaderMap, set: &[HeaderName]) {
    for h in set {
        headers.remove(h);
    }
}

/// `true` when `peer` falls inside one of the configured trusted-proxy
/// CIDR ranges — gates whether forwarding headers on an inbound request
/// are honoured (spec §4.2 "Trust model").
pub fn is_trusted_peer(peer: IpAddr, trusted: &[IpNet]) -> bool {
    trusted.iter().any(|net| net.contains(&peer))
}

/// Derive the client IP to report upstream (spec §4.2): prefer the
/// left-most entry of a trusted `X-Forwarded-For`, then `X-Real-IP`, then
/// the peer address itself.
pub fn derive_client_ip(headers: &HeaderMap, peer: SocketAddr, trusted: bool) -> IpAddr {
    if trusted {
        if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            if let Some(first) = xff.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return ip;
                }
            }
        }
        if let Some(xri) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
            if let Ok(ip) = xri.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }
    peer.ip()
}

/// Transform request headers in place before forwarding upstream (spec
/// §4.2). `tls_terminated` is whether TLS terminates at this hop (used to
/// pick the `X-Forwarded-Proto` default per the fixed asymmetry in spec §9).
pub fn transform_request_headers(
    headers: &mut HeaderMap,
    peer: SocketAddr,
    trusted_peer: bool,
    original_host: Option<&str>,
    proxied_by: &str,
    tls_terminated: bool,
) {
    remove_headers(headers, hop_by_hop_headers());
    remove_headers(headers, sensitive_headers());

    if !trusted_peer {
        headers.remove("x-forwarded-for");
        headers.remove("x-real-ip");
    }

    let client_ip = derive_client_ip(headers, peer, trusted_peer).to_string();

    if let Some(existing) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
    {
        let combined = format!("{existing}, {client_ip}");
        if let Ok(v) = HeaderValue::from_str(&combined) {
            headers.insert(HeaderName::from_static("x-forwarded-for"), v);
        }
    } else if let Ok(v) = HeaderValue::from_str(&client_ip) {
        headers.insert(HeaderName::from_static("x-forwarded-for"), v);
    }

    if let Ok(v) = HeaderValue::from_str(&client_ip) {
        headers.insert(HeaderName::from_static("x-real-ip"), v);
    }

    if !headers.contains_key("x-forwarded-proto") {
        let proto = if tls_terminated { "https" } else { "http" };
        headers.insert(
            HeaderName::from_static("x-forwarded-proto"),
            HeaderValue::from_static(proto),
        );
    }

    if !headers.contains_key("x-forwarded-host") {
        if let Some(host) = original_host {
            if let Ok(v) = HeaderValue::from_str(host) {
                headers.insert(HeaderName::from_static("x-forwarded-host"), v);
            }
        }
    }

    let via_value = format!("{proxied_by}/{}", env!("CARGO_PKG_VERSION"));
    append_via(headers, &via_value);

    if let Ok(v) = HeaderValue::from_str(&format!("{proxied_by}/{}", env!("CARGO_PKG_VERSION"))) {
        headers.insert(HeaderName::from_static("x-proxied-by"), v);
    }
}

fn append_via(headers: &mut HeaderMap, this_hop: &str) {
    let entry = format!("1.1 {this_hop}");
    let combined = match headers.get(http::header::VIA).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {entry}"),
        None => entry,
    };
    if let Ok(v) = HeaderValue::from_str(&combined) {
        headers.insert(http::header::VIA, v);
    }
}

/// Response-side metadata injected back to the client (spec §4.2, §6).
#[derive(Debug, Clone, Default)]
pub struct ResponseHeaderContext {
    pub request_id: String,
    pub response_time_ms: u64,
    pub endpoint_name: String,
    pub backend_type: String,
    pub model: Option<String>,
    pub routing_strategy: Option<String>,
    pub routing_decision: Option<String>,
    pub routing_reason: Option<String>,
    pub served_by: String,
}

pub fn apply_response_headers(headers: &mut HeaderMap, ctx: &ResponseHeaderContext) {
    remove_headers(headers, hop_by_hop_headers());

    if let Ok(v) = HeaderValue::from_str(&ctx.served_by) {
        headers.insert(HeaderName::from_static("x-served-by"), v);
    }
    append_via(headers, &ctx.served_by);
    if let Ok(v) = HeaderValue::from_str(&ctx.request_id) {
        headers.insert(HeaderName::from_static("x-olla-request-id"), v);
    }
    if let Ok(v) = HeaderValue::from_str(&format!("{}ms", ctx.response_time_ms)) {
        headers.insert(HeaderName::from_static("x-olla-response-time"), v);
    }
    if let Ok(v) = HeaderValue::from_str(&ctx.endpoint_name) {
        headers.insert(HeaderName::from_static("x-olla-endpoint"), v);
    }
    if let Ok(v) = HeaderValue::from_str(&ctx.backend_type) {
        headers.insert(HeaderName::from_static("x-olla-backend-type"), v);
    }
    if let Some(model) = &ctx.model {
        if let Ok(v) = HeaderValue::from_str(model) {
            headers.insert(HeaderName::from_static("x-olla-model"), v);
        }
    }
    if let Some(strategy) = &ctx.routing_strategy {
        if let Ok(v) = HeaderValue::from_str(strategy) {
            headers.insert(HeaderName::from_static("x-olla-routing-strategy"), v);
        }
    }
    if let Some(decision) = &ctx.routing_decision {
        if let Ok(v) = HeaderValue::from_str(decision) {
            headers.insert(HeaderName::from_static("x-olla-routing-decision"), v);
        }
    }
    if let Some(reason) = &ctx.routing_reason {
        if let Ok(v) = HeaderValue::from_str(reason) {
            headers.insert(HeaderName::from_static("x-olla-routing-reason"), v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_hop_and_sensitive_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_static("secret"));
        headers.insert(http::header::CONNECTION, HeaderValue::from_static("close"));
        headers.insert(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_static("k"),
        );
        transform_request_headers(
            &mut headers,
            "127.0.0.1:1234".parse().unwrap(),
            true,
            Some("example.com"),
            "olla",
            false,
        );
        assert!(!headers.contains_key(http::header::AUTHORIZATION));
        assert!(!headers.contains_key(http::header::CONNECTION));
        assert!(!headers.contains_key("x-api-key"));
    }

    #[test]
    fn test_untrusted_peer_forwarding_headers_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-forwarded-for"),
            HeaderValue::from_static("203.0.113.5"),
        );
        transform_request_headers(
            &mut headers,
            "10.0.0.1:1234".parse().unwrap(),
            false,
            None,
            "olla",
            false,
        );
        let xff = headers.get("x-forwarded-for").unwrap().to_str().unwrap();
        assert_eq!(xff, "10.0.0.1");
    }

    #[test]
    fn test_forwarded_proto_defaults_to_https_when_tls_terminates_here() {
        let mut headers = HeaderMap::new();
        transform_request_headers(
            &mut headers,
            "127.0.0.1:1234".parse().unwrap(),
            true,
            None,
            "olla",
            true,
        );
        assert_eq!(headers.get("x-forwarded-proto").unwrap(), "https");
    }

    #[test]
    fn test_forwarded_proto_defaults_to_http_without_tls() {
        let mut headers = HeaderMap::new();
        transform_request_headers(
            &mut headers,
            "127.0.0.1:1234".parse().unwrap(),
            true,
            None,
            "olla",
            false,
        );
        assert_eq!(headers.get("x-forwarded-proto").unwrap(), "http");
    }

    #[test]
    fn test_via_appends_to_existing_value() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::VIA, HeaderValue::from_static("1.1 upstream-proxy"));
        transform_request_headers(
            &mut headers,
            "127.0.0.1:1234".parse().unwrap(),
            true,
            None,
            "olla",
            false,
        );
        let via = headers.get(http::header::VIA).unwrap().to_str().unwrap();
        assert!(via.starts_with("1.1 upstream-proxy, 1.1 olla/"));
    }

    #[test]
    fn test_is_trusted_peer_matches_cidr() {
        let net: IpNet = "10.0.0.0/8".parse().unwrap();
        assert!(is_trusted_peer("10.1.2.3".parse().unwrap(), &[net]));
        assert!(!is_trusted_peer("192.168.1.1".parse().unwrap(), &[net]));
    }
}
