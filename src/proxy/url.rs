use crate::discovery::Endpoint;
use crate::error::{ErrorContext, OllaError};
use percent_encoding::percent_decode_str;
use url::Url;

/// Build the upstream URL for one proxied request (spec §4.1).
///
/// `request_path` and `raw_query` come straight off the incoming request;
/// `proxy_prefix` is stripped before the remainder is joined against (or
/// resolved relative to) the endpoint's base URL, depending on
/// `endpoint.preserve_path`.
pub fn build_upstream_url(
    request_path: &str,
    raw_query: Option<&str>,
    proxy_prefix: &str,
    endpoint: &Endpoint,
    request_id: &str,
) -> Result<Url, OllaError> {
    let stripped = request_path.strip_prefix(proxy_prefix).unwrap_or(request_path);
    let t = if stripped.is_empty() { "/" } else { stripped };
    let decoded = percent_decode_str(t).decode_utf8_lossy().into_owned();

    let ep_path = endpoint.base_url.path();
    let ep_is_root = ep_path.is_empty() || ep_path == "/";

    let mut url = if endpoint.preserve_path && !ep_is_root {
        // Clean t on its own, rooted at '/', before prepending Ep — any
        // `..` segments resolve (and clamp at root) inside t first, so
        // they can never pop past Ep's own path segments once joined
        // (spec §4.1 step 2).
        let cleaned_t = clean_path(&decoded);
        let joined = format!("{}{}", ep_path.trim_end_matches('/'), cleaned_t);
        let mut u = endpoint.base_url.clone();
        u.set_path(&clean_path(&joined));
        u
    } else {
        let has_dot_segment = decoded.split('/').any(|seg| seg == "." || seg == "..");
        if has_dot_segment {
            let cleaned = clean_path(&decoded);
            if ep_is_root {
                let mut u = endpoint.base_url.clone();
                u.set_path(&cleaned);
                u
            } else {
                endpoint.base_url.join(&cleaned).map_err(|e| {
                    OllaError::BadRequest(
                        ErrorContext::new(request_id, "", request_path)
                            .with_cause(format!("failed to resolve upstream url: {e}")),
                    )
                })?
            }
        } else if ep_is_root {
            // Verbatim: repeated slashes in `t` are intentionally retained
            // here (spec §4.1 step 3, §9 open question — do not "fix").
            let mut u = endpoint.base_url.clone();
            u.set_path(&decoded);
            u
        } else {
            endpoint.base_url.join(&decoded).map_err(|e| {
                OllaError::BadRequest(
                    ErrorContext::new(request_id, "", request_path)
                        .with_cause(format!("failed to resolve upstream url: {e}")),
                )
            })?
        }
    };

    url.set_query(raw_query);
    url.set_fragment(None);
    Ok(url)
}

/// Go `path.Clean`-style normalisation: rooted, collapses repeated
/// slashes, resolves `.` and `..` segments without escaping above `/`.
fn clean_path(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            s => stack.push(s),
        }
    }
    format!("/{}", stack.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Endpoint;

    fn endpoint(base: &str, preserve_path: bool) -> Endpoint {
        Endpoint::new("test", Url::parse(base).unwrap(), preserve_path)
    }

    #[test]
    fn test_seed_scenario_1_preserve_path_join() {
        let ep = endpoint("http://api.example.com/v1/api", true);
        let url = build_upstream_url(
            "/olla/proxy/chat/completions",
            Some("filter=gpt&limit=10"),
            "/olla/proxy",
            &ep,
            "req-1",
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "http://api.example.com/v1/api/chat/completions?filter=gpt&limit=10"
        );
    }

    #[test]
    fn test_seed_scenario_2_replace_path_traversal_guard() {
        let ep = endpoint("http://api.example.com/api/v1", false);
        let url = build_upstream_url(
            "/olla/proxy/../../../etc/passwd",
            None,
            "/olla/proxy",
            &ep,
            "req-2",
        )
        .unwrap();
        assert_eq!(url.path(), "/etc/passwd");
    }

    #[test]
    fn test_replace_path_root_endpoint_retains_double_slashes() {
        let ep = endpoint("http://api.example.com", false);
        let url = build_upstream_url("/olla//double//slash", None, "/olla", &ep, "req-3").unwrap();
        assert_eq!(url.path(), "//double//slash");
    }

    #[test]
    fn test_preserve_path_leading_slash_never_escapes_endpoint_path() {
        let ep = endpoint("http://api.example.com/base", true);
        let url = build_upstream_url("/olla/../../x", None, "/olla", &ep, "req-4").unwrap();
        assert!(url.path().starts_with("/base"));
    }

    #[test]
    fn test_percent_encoded_space_is_decoded() {
        let ep = endpoint("http://api.example.com", false);
        let url = build_upstream_url("/olla/a%20b", None, "/olla", &ep, "req-5").unwrap();
        assert_eq!(url.path(), "/a b");
    }
}
