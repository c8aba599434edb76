use std::time::Duration;

/// Which phase an error occurred in, used to pick between otherwise
/// identical messages (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyContext {
    Backend,
    Streaming,
    None,
}

/// The shape of the underlying failure being classified. Built from
/// whatever the I/O layer actually returned — a typed signal where one
/// exists, an opaque message string otherwise (mirrors the mix of typed
/// errors and raw strings a transport library surfaces in practice).
#[derive(Debug, Clone)]
pub enum RawError {
    ContextCanceled,
    DeadlineExceeded,
    StreamEof,
    NetworkTimeout,
    Dial { addr: Option<String> },
    Read { addr: Option<String> },
    Write { addr: Option<String> },
    ConnRefused,
    ConnReset,
    Opaque(String),
}

/// Classify an error into one of a small, stable catalogue of user-facing
/// messages (spec §4.6). All messages embed the elapsed duration to one
/// decimal second.
pub fn classify_error(
    err: &RawError,
    duration: Duration,
    context: ClassifyContext,
    response_timeout: Option<Duration>,
) -> String {
    let secs = duration.as_secs_f64();

    match err {
        RawError::ContextCanceled => {
            return if (25.0..=35.0).contains(&secs) {
                format!("likely client timeout after {secs:.1}s")
            } else if secs < 2.0 {
                format!("client disconnected immediately after {secs:.1}s")
            } else if secs < 10.0 {
                format!("client disconnected early after {secs:.1}s")
            } else {
                format!("client disconnected during processing after {secs:.1}s")
            };
        }
        RawError::DeadlineExceeded => {
            return match response_timeout {
                Some(t) => format!(
                    "request exceeded response timeout of {:.1}s after {secs:.1}s",
                    t.as_secs_f64()
                ),
                None => format!("request timed out after {secs:.1}s"),
            };
        }
        RawError::StreamEof => {
            return match context {
                ClassifyContext::Streaming if secs < 5.0 => {
                    format!("response ended prematurely after {secs:.1}s")
                }
                ClassifyContext::Streaming => {
                    format!("response stream ended unexpectedly after {secs:.1}s")
                }
                _ => format!("AI backend ended communication unexpectedly after {secs:.1}s"),
            };
        }
        RawError::NetworkTimeout => {
            return format!("network timeout after {secs:.1}s");
        }
        RawError::Dial { addr } => {
            return match addr {
                Some(a) => format!("failed to connect to backend at {a} after {secs:.1}s"),
                None => format!("failed to connect to backend after {secs:.1}s"),
            };
        }
        RawError::Read { addr } => {
            return match addr {
                Some(a) => format!("failed reading response from {a} after {secs:.1}s"),
                None => format!("failed reading response after {secs:.1}s"),
            };
        }
        RawError::Write { addr } => {
            return match addr {
                Some(a) => format!("failed sending request to {a} after {secs:.1}s"),
                None => format!("failed sending request after {secs:.1}s"),
            };
        }
        RawError::ConnRefused => {
            return format!("AI backend appears to be down after {secs:.1}s");
        }
        RawError::ConnReset => {
            return format!("AI backend connection reset, likely overloaded, after {secs:.1}s");
        }
        RawError::Opaque(msg) => {
            let lower = msg.to_ascii_lowercase();
            if lower.contains("connection refused") {
                return format!("AI backend appears to be down after {secs:.1}s");
            }
            if lower.contains("connection reset") {
                return format!("AI backend connection reset, likely overloaded, after {secs:.1}s");
            }
            if lower.contains("no such host") {
                return format!("AI backend host could not be resolved after {secs:.1}s");
            }
            if lower.contains("tls handshake timeout") {
                return format!("TLS handshake with AI backend timed out after {secs:.1}s");
            }
            if lower.contains("certificate") {
                return format!("AI backend certificate validation failed after {secs:.1}s");
            }
            format!("request failed after {secs:.1}s: {msg}")
        }
    }
}
