use crate::config::StreamProfile;

const STREAMING_CONTENT_TYPES: &[&str] = &[
    "text/event-stream",
    "application/x-ndjson",
    "application/stream+json",
    "application/json-seq",
    "text/plain; charset=utf-8",
];

const BINARY_PREFIXES: &[&str] = &[
    "image/",
    "video/",
    "audio/",
    "application/pdf",
    "application/zip",
    "application/gzip",
    "application/x-tar",
    "application/x-rar",
    "application/x-7z",
    "font/",
    "model/",
];

const OFFICE_TYPES: &[&str] = &[
    "application/msword",
    "application/vnd.ms-excel",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
];

/// Decide whether a response should be streamed to the client (spec §4.4).
///
/// `context_stream_flag` mirrors the original's context-keyed `"stream"`
/// value, honoured only in `Auto` mode once content-type classification
/// falls through — deliberately kept as specified (spec §9 open question).
pub fn is_streaming_mode(
    profile: StreamProfile,
    content_type: Option<&str>,
    context_stream_flag: Option<bool>,
) -> bool {
    match profile {
        StreamProfile::Buffered | StreamProfile::Standard => return false,
        StreamProfile::Streaming => return true,
        StreamProfile::Auto => {}
    }

    let lower = content_type.unwrap_or("").to_ascii_lowercase();

    if STREAMING_CONTENT_TYPES.iter().any(|ct| lower.contains(ct)) {
        return true;
    }

    if context_stream_flag == Some(true) {
        return true;
    }

    if BINARY_PREFIXES.iter().any(|p| lower.starts_with(p)) || OFFICE_TYPES.contains(&lower.as_str())
    {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_profile_never_streams() {
        assert!(!is_streaming_mode(
            StreamProfile::Buffered,
            Some("text/event-stream"),
            Some(true)
        ));
    }

    #[test]
    fn test_explicit_streaming_profile_always_streams() {
        assert!(is_streaming_mode(StreamProfile::Streaming, Some("image/png"), None));
    }

    #[test]
    fn test_auto_detects_event_stream() {
        assert!(is_streaming_mode(
            StreamProfile::Auto,
            Some("text/event-stream"),
            None
        ));
    }

    #[test]
    fn test_auto_binary_prefix_is_not_streamed() {
        assert!(!is_streaming_mode(StreamProfile::Auto, Some("image/png"), None));
    }

    #[test]
    fn test_auto_context_flag_overrides_binary_classification() {
        // Matches the original's documented inconsistency: a context-level
        // stream=true short-circuits before the binary-prefix check.
        assert!(is_streaming_mode(StreamProfile::Auto, Some("image/png"), Some(true)));
    }

    #[test]
    fn test_auto_unknown_content_type_defaults_to_streaming() {
        assert!(is_streaming_mode(StreamProfile::Auto, Some("application/json"), None));
    }

    #[test]
    fn test_auto_no_content_type_defaults_to_streaming() {
        assert!(is_streaming_mode(StreamProfile::Auto, None, None));
    }
}
