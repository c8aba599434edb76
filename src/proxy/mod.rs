pub mod alias;
pub mod buffer_pool;
pub mod classify;
pub mod context;
pub mod headers;
pub mod retry;
pub mod service;
pub mod stream_engine;
pub mod stream_mode;
pub mod url;

pub use buffer_pool::BufferPool;
pub use context::BoxBody;
pub use service::ProxyService;
