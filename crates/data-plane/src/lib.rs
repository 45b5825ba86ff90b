pub mod backend;
pub mod interceptor;
pub mod kvcache;
pub mod types;
pub mod warmup;

pub use backend::{BackendClient, CompletionError};
pub use interceptor::ChatInterceptor;
pub use kvcache::{cache_filename, KvCacheClient, KvCacheError};
pub use types::{BodyStream, ProxyRequest, ProxyResponse, ResponseBody};
pub use warmup::{WarmupError, WarmupHandle, WarmupScheduler};

use thiserror::Error;

/// Failures surfaced by the chat interception path. The server maps these
/// onto HTTP status codes: bad request -> 400, template -> 500,
/// unavailable -> 502.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("template processing failed: {0}")]
    Template(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}
