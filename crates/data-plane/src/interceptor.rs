use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use control_plane::admission::{AdmissionController, UserQueryGuard};
use control_plane::backend_state::BackendState;
use control_plane::metrics::Metrics;
use control_plane::template::TemplateWatcher;

use crate::backend::BackendClient;
use crate::kvcache::{cache_filename, KvCacheClient, KvCacheError};
use crate::types::{BodyStream, ProxyRequest, ProxyResponse, ResponseBody};
use crate::ProxyError;

/// Intercepts `POST /v1/chat/completions`: detects a template prefix in
/// the last user message, injects the expanded template, reconciles the
/// backend's KV cache, and forwards the request with the response body
/// streamed through untouched.
pub struct ChatInterceptor {
    admission: Arc<AdmissionController>,
    backend_state: Arc<BackendState>,
    watcher: Arc<TemplateWatcher>,
    kvcache: Arc<KvCacheClient>,
    backend: Arc<BackendClient>,
    metrics: Arc<Metrics>,
    /// Configured prefixes in lexicographic order; detection is
    /// first-match-wins over this order.
    prefixes: Vec<String>,
}

impl ChatInterceptor {
    pub fn new(
        admission: Arc<AdmissionController>,
        backend_state: Arc<BackendState>,
        watcher: Arc<TemplateWatcher>,
        kvcache: Arc<KvCacheClient>,
        backend: Arc<BackendClient>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let prefixes = watcher.prefixes();
        Self {
            admission,
            backend_state,
            watcher,
            kvcache,
            backend,
            metrics,
            prefixes,
        }
    }

    /// Runs the full interception pipeline for one chat-completion
    /// request. The returned response streams the backend body; the user
    /// slot is held until that stream is drained or dropped.
    pub async fn handle(&self, req: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let request_id = Uuid::new_v4().to_string();

        // Taking the user slot comes before any backend interaction; it
        // atomically cancels an in-flight warmup.
        let guard = UserQueryGuard::acquire(&self.admission);

        let mut body: Value = serde_json::from_slice(&req.body)
            .map_err(|err| ProxyError::BadRequest(format!("invalid JSON body: {err}")))?;
        let messages = body
            .get_mut("messages")
            .and_then(|messages| messages.as_array_mut())
            .ok_or_else(|| ProxyError::BadRequest("request must include a messages array".to_string()))?;

        let mut prefix = String::new();
        if let Some(message) = messages
            .iter_mut()
            .rev()
            .find(|message| message.get("role").and_then(Value::as_str) == Some("user"))
        {
            let content = match message.get("content") {
                Some(Value::String(content)) => content.clone(),
                _ => {
                    return Err(ProxyError::BadRequest(
                        "user message content must be a string".to_string(),
                    ))
                }
            };
            for candidate in &self.prefixes {
                let with_space = format!("{candidate} ");
                if let Some(rest) = content.strip_prefix(&with_space) {
                    let expanded = self
                        .watcher
                        .process(candidate, rest)
                        .map_err(|err| ProxyError::Template(err.to_string()))?;
                    info!(
                        request_id = %request_id,
                        prefix = %candidate,
                        bytes = expanded.len(),
                        "template injected"
                    );
                    message["content"] = Value::String(expanded);
                    prefix = candidate.clone();
                    break;
                }
            }
        }

        // Reconcile the backend's resident snapshot before forwarding:
        // save the outgoing template, restore the incoming one. Either
        // operation failing leaves the backend to recompute from scratch,
        // so the request proceeds.
        if self.backend_state.should_save(&prefix) {
            let last = self.backend_state.last_prefix();
            if let Err(err) = self.kvcache.save(&last, &cache_filename(&last)).await {
                warn!(prefix = %last, error = %err, "kv cache save failed");
            }
        }
        if self.backend_state.should_restore(&prefix) {
            match self.kvcache.restore(&prefix, &cache_filename(&prefix)).await {
                Ok(()) => {}
                Err(KvCacheError::NotFound) => {
                    debug!(prefix = %prefix, "no snapshot to restore yet");
                }
                Err(err) => {
                    warn!(prefix = %prefix, error = %err, "kv cache restore failed");
                }
            }
        }

        let serialized = serde_json::to_vec(&body)
            .map_err(|err| ProxyError::Internal(format!("failed to serialize request: {err}")))?;

        let response = match self.backend.forward(&req, serialized).await {
            Ok(response) => response,
            Err(err) => {
                self.metrics.record_request(&req.path, 502);
                return Err(err);
            }
        };

        // The backend has accepted the request; record the new resident
        // prefix before the first body byte reaches the client.
        self.backend_state.update(&prefix);
        self.metrics.record_request(&req.path, response.status);
        debug!(request_id = %request_id, status = response.status, "backend responded");

        Ok(attach_guard(response, guard))
    }
}

/// Moves the admission guard into the response body so `release_user`
/// fires when streaming completes or the client goes away, not when the
/// handler returns.
fn attach_guard(mut response: ProxyResponse, guard: UserQueryGuard) -> ProxyResponse {
    response.body = match response.body {
        ResponseBody::Stream(inner) => ResponseBody::Stream(Box::pin(GuardedStream {
            inner,
            _guard: guard,
        })),
        // A buffered body is already fully read from the backend; the
        // slot can be released immediately.
        body => body,
    };
    response
}

struct GuardedStream {
    inner: BodyStream,
    _guard: UserQueryGuard,
}

impl Stream for GuardedStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}
