pub mod backoff;
pub mod client;

pub use backoff::next_backoff;
pub use client::{build_upstream_http_client, UpstreamClient};
