use std::collections::HashMap;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::{ProxyRequest, ProxyResponse, ResponseBody};
use crate::ProxyError;

/// Warmup traffic gets a generous fixed timeout; a cold prompt can take a
/// while to prefill. User requests are not timed out by the proxy at all.
const WARMUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Failure modes of a warmup completion request. Cancellation is
/// control flow, not an operator-visible error.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request cancelled")]
    Cancelled,
    #[error("completion request failed: {0}")]
    Request(String),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
}

/// HTTP client for the inference backend: streamed forwarding for proxied
/// requests and cancellable minimal completions for warmups.
pub struct BackendClient {
    base_url: String,
    client: reqwest::Client,
    warmup_client: reqwest::Client,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Self {
        let warmup_client = reqwest::Client::builder()
            .timeout(WARMUP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            warmup_client,
        }
    }

    /// Forwards a request to the backend, preserving method, query string
    /// and headers, and returns the response with a streamed body. The
    /// body is never buffered here; server-sent events pass through
    /// chunk by chunk.
    pub async fn forward(
        &self,
        req: &ProxyRequest,
        body: Vec<u8>,
    ) -> Result<ProxyResponse, ProxyError> {
        let method = Method::from_bytes(req.method.as_bytes())
            .map_err(|err| ProxyError::BadRequest(err.to_string()))?;
        let mut url = format!("{}{}", self.base_url, req.path);
        if let Some(query) = &req.query {
            url.push('?');
            url.push_str(query);
        }

        let mut headers = HeaderMap::new();
        for (key, value) in &req.headers {
            // Host and Content-Length belong to the rewritten request;
            // hop-by-hop headers never cross the proxy.
            if key.eq_ignore_ascii_case("host")
                || key.eq_ignore_ascii_case("content-length")
                || is_hop_header(key)
            {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }

        debug!(method = %req.method, url = %url, "forwarding to backend");
        let response = self
            .client
            .request(method, &url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|err| ProxyError::Unavailable(err.to_string()))?;

        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let stream = response.bytes_stream().map(|item| {
            item.map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
        });
        Ok(ProxyResponse {
            status,
            headers,
            body: ResponseBody::Stream(Box::pin(stream)),
        })
    }

    /// Issues a chat-completion request and discards the response body.
    /// The request aborts as soon as `cancel` fires, including while the
    /// backend is still prefilling.
    pub async fn completion(
        &self,
        body: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<(), CompletionError> {
        let request = self
            .warmup_client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(CompletionError::Cancelled),
            result = request.send() => {
                result.map_err(|err| CompletionError::Request(err.to_string()))?
            }
        };

        let status = response.status();
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(CompletionError::Cancelled),
            text = response.text() => text.unwrap_or_default(),
        };
        if !status.is_success() {
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (name, value) in headers {
        if is_hop_header(name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            out.insert(name.as_str().to_lowercase(), value.to_string());
        }
    }
    out
}

fn is_hop_header(name: &str) -> bool {
    const HOP_HEADERS: [&str; 7] = [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "transfer-encoding",
        "upgrade",
    ];
    HOP_HEADERS
        .iter()
        .any(|header| name.eq_ignore_ascii_case(header))
}
