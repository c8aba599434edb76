use crate::error::{ErrorContext, OllaError};
use crate::proxy::buffer_pool::BufferPool;
use crate::proxy::classify::{classify_error, ClassifyContext, RawError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Max bytes kept of the most recent chunk(s), for provider-metrics
/// extraction off the tail of the stream (spec §3 "StreamState").
const TAIL_BUFFER_CAP: usize = 8 * 1024;
/// Once draining after a client disconnect exceeds this many bytes, stop
/// (spec §4.8 step 5, §4.8 "Client-disconnect tolerance").
const CLIENT_DISCONNECT_BYTES_THRESHOLD: u64 = 1024;
/// A client disconnect observed within this long of the last read is still
/// eligible for brief draining (spec §4.8 "Client-disconnect tolerance").
const CLIENT_DISCONNECT_TIME_THRESHOLD: Duration = Duration::from_secs(5);
/// Grace window after cancellation for an in-flight read to still land
/// (spec §4.8 step 4).
const CANCEL_GRACE: Duration = Duration::from_secs(1);

/// Source of upstream body chunks. One auxiliary task per outstanding read
/// owns the source across an `.await` so the main task can watchdog
/// cancellation and the per-read deadline simultaneously (spec §5).
#[async_trait]
pub trait ChunkSource: Send {
    /// `Ok(None)` signals EOF.
    async fn read_chunk(&mut self) -> std::io::Result<Option<Bytes>>;
}

/// Sink the engine writes relayed bytes to.
#[async_trait]
pub trait ChunkWriter: Send {
    async fn write_chunk(&mut self, data: Bytes) -> std::io::Result<()>;
    async fn flush(&mut self) -> std::io::Result<()>;
}

/// Per-streaming-call state (spec §3 "StreamState"). Created on entry to
/// the engine, dropped on return.
#[derive(Debug, Clone)]
pub struct StreamState {
    pub total_bytes: u64,
    pub read_count: u64,
    pub bytes_after_disconnect: u64,
    pub last_read_time: Instant,
    pub last_chunk: VecDeque<u8>,
    pub client_disconnected: bool,
    pub is_streaming: bool,
    pub content_type: Option<String>,
}

impl StreamState {
    pub fn new(is_streaming: bool, content_type: Option<String>) -> Self {
        Self {
            total_bytes: 0,
            read_count: 0,
            bytes_after_disconnect: 0,
            last_read_time: Instant::now(),
            last_chunk: VecDeque::with_capacity(TAIL_BUFFER_CAP),
            client_disconnected: false,
            is_streaming,
            content_type,
        }
    }

    fn push_tail(&mut self, data: &[u8]) {
        for &b in data {
            if self.last_chunk.len() == TAIL_BUFFER_CAP {
                self.last_chunk.pop_front();
            }
            self.last_chunk.push_back(b);
        }
    }

    pub fn tail_bytes(&self) -> Vec<u8> {
        self.last_chunk.iter().copied().collect()
    }

    /// Whether a client disconnect observed right now is still within the
    /// short-reconnect tolerance window (spec §4.8).
    fn within_disconnect_tolerance(&self) -> bool {
        self.total_bytes > CLIENT_DISCONNECT_BYTES_THRESHOLD
            && self.last_read_time.elapsed() < CLIENT_DISCONNECT_TIME_THRESHOLD
    }
}

/// Terminal outcome of a streaming call (spec §4.8 states).
#[derive(Debug)]
pub enum StreamOutcome {
    Eof,
    Cancelled,
    TimedOut,
    Failed(OllaError),
}

/// Drive one streaming call to completion (spec §4.8).
///
/// `client_cancel` and `upstream_cancel` are watched together — either
/// firing ends the call (spec §5 "Cancellation semantics"); client
/// cancellation is reported as `Cancelled`, never classified as a proxy
/// error unless it arrives before any byte has been written.
pub async fn run_streaming_engine<S>(
    mut source: S,
    mut writer: impl ChunkWriter,
    client_cancel: CancellationToken,
    upstream_cancel: CancellationToken,
    read_timeout: Duration,
    is_streaming: bool,
    content_type: Option<String>,
    request_id: &str,
    buffer_pool: &Arc<BufferPool>,
) -> (StreamState, StreamOutcome)
where
    S: ChunkSource + 'static,
{
    let mut state = StreamState::new(is_streaming, content_type);
    let mut pooled = buffer_pool.acquire();
    let mut source = Some(source);

    loop {
        let (tx, mut rx) = oneshot::channel::<(std::io::Result<Option<Bytes>>, S)>();
        let mut owned_source = source.take().expect("source is always returned before the next iteration");
        tokio::spawn(async move {
            let result = owned_source.read_chunk().await;
            let _ = tx.send((result, owned_source));
        });

        let outcome = tokio::select! {
            biased;

            _ = client_cancel.cancelled() => Branch::Cancelled,
            _ = upstream_cancel.cancelled() => Branch::Cancelled,
            _ = tokio::time::sleep(read_timeout) => Branch::TimedOut,
            recv = &mut rx => Branch::Completed(recv),
        };

        match outcome {
            Branch::TimedOut => {
                let secs = read_timeout.as_secs_f64();
                tracing::warn!(request_id, secs, "streaming: read watchdog fired");
                return (
                    state,
                    StreamOutcome::Failed(OllaError::StreamStalled(
                        ErrorContext::new(request_id, "", "")
                            .with_cause(format!(
                                "AI backend stopped responding — no data received for {secs:.1}s"
                            ))
                            .with_bytes(state.total_bytes),
                    )),
                );
            }
            Branch::Cancelled => {
                // Grace period: give an in-flight read a brief chance to
                // land so its bytes are still relayed before we give up.
                // The auxiliary task keeps running regardless and will
                // exit on its own once the read resolves (spec §5, §9).
                if let Ok(Ok((Ok(Some(chunk)), returned_source))) =
                    tokio::time::timeout(CANCEL_GRACE, &mut rx).await
                {
                    source = Some(returned_source);
                    if !chunk.is_empty() && !state.client_disconnected {
                        state.push_tail(&chunk);
                        let relayed = pooled.relay(chunk.clone());
                        if writer.write_chunk(relayed).await.is_ok() {
                            state.total_bytes += chunk.len() as u64;
                        }
                    }
                }
                return (state, StreamOutcome::Cancelled);
            }
            Branch::Completed(recv) => match recv {
                Ok((Ok(Some(chunk)), returned_source)) => {
                    source = Some(returned_source);
                    state.read_count += 1;
                    state.last_read_time = Instant::now();

                    if !chunk.is_empty() {
                        state.push_tail(&chunk);

                        if !state.client_disconnected {
                            let relayed = pooled.relay(chunk.clone());
                            if let Err(e) = writer.write_chunk(relayed).await {
                                tracing::debug!(request_id, error = %e, "streaming: client write failed, marking disconnected");
                                state.client_disconnected = true;
                            } else {
                                state.total_bytes += chunk.len() as u64;
                                if state.is_streaming {
                                    let _ = writer.flush().await;
                                }
                            }
                        } else {
                            state.bytes_after_disconnect += chunk.len() as u64;
                            if state.bytes_after_disconnect > CLIENT_DISCONNECT_BYTES_THRESHOLD {
                                return (state, StreamOutcome::Cancelled);
                            }
                        }
                    }
                }
                Ok((Ok(None), returned_source)) => {
                    source = Some(returned_source);
                    return (state, StreamOutcome::Eof);
                }
                Ok((Err(io_err), returned_source)) => {
                    source = Some(returned_source);
                    let context = if state.is_streaming {
                        ClassifyContext::Streaming
                    } else {
                        ClassifyContext::Backend
                    };
                    let message = classify_error(
                        &RawError::Opaque(io_err.to_string()),
                        state.last_read_time.elapsed(),
                        context,
                        None,
                    );
                    return (
                        state,
                        StreamOutcome::Failed(OllaError::StreamAborted(
                            ErrorContext::new(request_id, "", "")
                                .with_cause(message)
                                .with_bytes(state.total_bytes),
                        )),
                    );
                }
                Err(_recv_error) => {
                    // Auxiliary task dropped its sender without sending —
                    // treat as an aborted stream rather than hanging.
                    return (
                        state,
                        StreamOutcome::Failed(OllaError::StreamAborted(
                            ErrorContext::new(request_id, "", "")
                                .with_cause("read task terminated without a result")
                                .with_bytes(state.total_bytes),
                        )),
                    );
                }
            },
        }

        if state.client_disconnected && !state.within_disconnect_tolerance() {
            return (state, StreamOutcome::Cancelled);
        }
    }
}

enum Branch<T> {
    Cancelled,
    TimedOut,
    Completed(T),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct VecSource {
        chunks: VecDeque<Bytes>,
    }

    #[async_trait]
    impl ChunkSource for VecSource {
        async fn read_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
            Ok(self.chunks.pop_front())
        }
    }

    struct CountingWriter {
        written: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChunkWriter for CountingWriter {
        async fn write_chunk(&mut self, data: Bytes) -> std::io::Result<()> {
            self.written.fetch_add(data.len(), Ordering::Relaxed);
            Ok(())
        }

        async fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_eof_after_chunks_delivered() {
        let source = VecSource {
            chunks: VecDeque::from(vec![Bytes::from_static(b"hello"), Bytes::from_static(b"world")]),
        };
        let written = Arc::new(AtomicUsize::new(0));
        let writer = CountingWriter { written: written.clone() };

        let (state, outcome) = run_streaming_engine(
            source,
            writer,
            CancellationToken::new(),
            CancellationToken::new(),
            Duration::from_secs(5),
            true,
            Some("text/event-stream".into()),
            "req-eof",
            &BufferPool::new(8 * 1024),
        )
        .await;

        assert!(matches!(outcome, StreamOutcome::Eof));
        assert_eq!(state.total_bytes, 10);
        assert_eq!(written.load(Ordering::Relaxed), 10);
    }

    #[tokio::test]
    async fn test_seed_scenario_6_read_watchdog_stalls() {
        struct StallingSource;
        #[async_trait]
        impl ChunkSource for StallingSource {
            async fn read_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(Some(Bytes::from_static(b"late")))
            }
        }

        let written = Arc::new(AtomicUsize::new(0));
        let writer = CountingWriter { written: written.clone() };

        let (state, outcome) = run_streaming_engine(
            StallingSource,
            writer,
            CancellationToken::new(),
            CancellationToken::new(),
            Duration::from_millis(100),
            true,
            None,
            "req-stall",
            &BufferPool::new(8 * 1024),
        )
        .await;

        assert!(matches!(outcome, StreamOutcome::Failed(OllaError::StreamStalled(_))));
        assert_eq!(state.total_bytes, 0);
    }

    #[tokio::test]
    async fn test_client_cancellation_returns_cancelled() {
        let token = CancellationToken::new();
        token.cancel();

        struct NeverSource;
        #[async_trait]
        impl ChunkSource for NeverSource {
            async fn read_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
                std::future::pending().await
            }
        }

        let written = Arc::new(AtomicUsize::new(0));
        let writer = CountingWriter { written };

        let (_state, outcome) = run_streaming_engine(
            NeverSource,
            writer,
            token,
            CancellationToken::new(),
            Duration::from_secs(5),
            true,
            None,
            "req-cancel",
            &BufferPool::new(8 * 1024),
        )
        .await;

        assert!(matches!(outcome, StreamOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_seed_scenario_5_client_disconnect_tolerance() {
        // 2 KiB delivered, then the client write starts failing while the
        // upstream keeps producing 256-byte chunks; the engine should drain
        // up to CLIENT_DISCONNECT_BYTES_THRESHOLD more bytes before giving up.
        const CHUNK: usize = 256;
        let mut chunks = VecDeque::new();
        for _ in 0..(2048 / CHUNK) {
            chunks.push_back(Bytes::from(vec![b'a'; CHUNK]));
        }
        for _ in 0..16 {
            chunks.push_back(Bytes::from(vec![b'b'; CHUNK]));
        }
        let source = VecSource { chunks };

        struct DisconnectingWriter {
            delivered: usize,
            fail_after: usize,
        }

        #[async_trait]
        impl ChunkWriter for DisconnectingWriter {
            async fn write_chunk(&mut self, data: Bytes) -> std::io::Result<()> {
                if self.delivered >= self.fail_after {
                    return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "client gone"));
                }
                self.delivered += data.len();
                Ok(())
            }

            async fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let writer = DisconnectingWriter { delivered: 0, fail_after: 2048 };

        let (state, outcome) = run_streaming_engine(
            source,
            writer,
            CancellationToken::new(),
            CancellationToken::new(),
            Duration::from_secs(5),
            true,
            Some("text/event-stream".into()),
            "req-5",
            &BufferPool::new(8 * 1024),
        )
        .await;

        assert!(matches!(outcome, StreamOutcome::Cancelled));
        assert!(state.total_bytes >= 2048, "total_bytes={}", state.total_bytes);
        assert!(
            state.total_bytes <= 2048 + CLIENT_DISCONNECT_BYTES_THRESHOLD + CHUNK as u64,
            "total_bytes={}",
            state.total_bytes
        );
        assert!(state.client_disconnected);
    }

    #[test]
    fn test_tail_buffer_stays_bounded() {
        let mut state = StreamState::new(true, None);
        let chunk = vec![0u8; TAIL_BUFFER_CAP + 100];
        state.push_tail(&chunk);
        assert_eq!(state.last_chunk.len(), TAIL_BUFFER_CAP);
    }
}
