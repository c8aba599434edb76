use crate::discovery::BackendType;
use async_trait::async_trait;

/// Token/latency metrics parsed out of a provider's streaming response body
/// (spec §6 "Collaborator interfaces"). Every field is best-effort: a given
/// backend's wire format may not report all of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderMetrics {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub model: Option<String>,
}

/// External collaborator (spec §1, §6): parses a chunk of upstream body
/// bytes into provider metrics, when the backend type is known. The proxy
/// core calls this on the captured tail of the stream, never on every
/// individual read.
#[async_trait]
pub trait MetricsExtractor: Send + Sync {
    async fn extract_from_chunk(
        &self,
        chunk: &[u8],
        backend_type: BackendType,
    ) -> Option<ProviderMetrics>;
}

/// Default `MetricsExtractor` that never recognises a payload — used when no
/// provider-specific parser is configured.
pub struct NoopMetricsExtractor;

#[async_trait]
impl MetricsExtractor for NoopMetricsExtractor {
    async fn extract_from_chunk(
        &self,
        _chunk: &[u8],
        _backend_type: BackendType,
    ) -> Option<ProviderMetrics> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_extractor_never_matches() {
        let extractor = NoopMetricsExtractor;
        let result = extractor
            .extract_from_chunk(b"{\"usage\":{}}", BackendType::Ollama)
            .await;
        assert!(result.is_none());
    }
}
