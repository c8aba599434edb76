use std::fmt;
use std::time::Duration;

/// Errors surfaced across the proxy's public API (spec §7).
///
/// `ConnectionError` is the only variant recovered locally by the retry
/// engine (`proxy::retry`) — every other variant propagates to the caller.
/// Each variant carries whatever subset of request context was known at
/// the point of failure; fields are `Option` where they may be unknown
/// (e.g. no endpoint had been selected yet).
#[derive(Debug)]
#[allow(dead_code)]
pub enum OllaError {
    NoHealthyEndpoints,
    EndpointSelectionFailed(ErrorContext),
    BadRequest(ErrorContext),
    ConnectionError(ErrorContext),
    UpstreamTimeout(ErrorContext),
    ClientCanceled(ErrorContext),
    StreamStalled(ErrorContext),
    StreamAborted(ErrorContext),
    InternalPanic(ErrorContext),
    AllEndpointsFailed(ErrorContext),
}

/// Shared context carried by every non-trivial error variant.
#[derive(Debug, Default, Clone)]
pub struct ErrorContext {
    pub request_id: String,
    pub endpoint: Option<String>,
    pub method: String,
    pub path: String,
    pub upstream_status: Option<u16>,
    pub elapsed: Option<Duration>,
    pub bytes_transferred: u64,
    pub cause: String,
}

impl ErrorContext {
    pub fn new(request_id: impl Into<String>, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = cause.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.upstream_status = Some(status);
        self
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes_transferred = bytes;
        self
    }
}

impl fmt::Display for OllaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OllaError::NoHealthyEndpoints => write!(f, "no healthy endpoints available"),
            OllaError::EndpointSelectionFailed(ctx) => {
                write!(f, "endpoint selection failed: {}", ctx.cause)
            }
            OllaError::BadRequest(ctx) => write!(f, "bad request: {}", ctx.cause),
            OllaError::ConnectionError(ctx) => write!(f, "connection error: {}", ctx.cause),
            OllaError::UpstreamTimeout(ctx) => write!(f, "upstream timeout: {}", ctx.cause),
            OllaError::ClientCanceled(ctx) => write!(f, "client canceled: {}", ctx.cause),
            OllaError::StreamStalled(ctx) => write!(f, "stream stalled: {}", ctx.cause),
            OllaError::StreamAborted(ctx) => write!(f, "stream aborted: {}", ctx.cause),
            OllaError::InternalPanic(ctx) => write!(f, "internal panic: {}", ctx.cause),
            OllaError::AllEndpointsFailed(ctx) => {
                write!(f, "all endpoints failed: {}", ctx.cause)
            }
        }
    }
}

impl std::error::Error for OllaError {}

impl OllaError {
    /// `true` for the single variant the retry engine is allowed to
    /// recover from locally (spec §7 propagation policy).
    pub fn is_connection_class(&self) -> bool {
        matches!(self, OllaError::ConnectionError(_))
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            OllaError::NoHealthyEndpoints => None,
            OllaError::EndpointSelectionFailed(c)
            | OllaError::BadRequest(c)
            | OllaError::ConnectionError(c)
            | OllaError::UpstreamTimeout(c)
            | OllaError::ClientCanceled(c)
            | OllaError::StreamStalled(c)
            | OllaError::StreamAborted(c)
            | OllaError::InternalPanic(c)
            | OllaError::AllEndpointsFailed(c) => Some(c),
        }
    }
}
