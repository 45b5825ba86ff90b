use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Response};
use axum::routing::post;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use data_plane::{ProxyRequest, ProxyResponse, ResponseBody};

use crate::error::AppError;
use crate::state::ProxyState;

pub fn proxy_router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .fallback(passthrough)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The intercepted inference path: template injection, cache
/// reconciliation, admission, then a streamed forward.
async fn chat_completions(
    State(state): State<Arc<ProxyState>>,
    req: Request,
) -> Result<Response<Body>, AppError> {
    let request = into_proxy_request(req).await?;
    let response = state.interceptor.handle(request).await?;
    into_http_response(response)
}

/// Generic reverse proxy for every other path. Status and headers are
/// inspected for logging and metrics; the body streams through unread.
async fn passthrough(
    State(state): State<Arc<ProxyState>>,
    req: Request,
) -> Result<Response<Body>, AppError> {
    let request = into_proxy_request(req).await?;
    debug!(method = %request.method, path = %request.path, "proxying");
    let body = request.body.clone();
    let response = match state.backend.forward(&request, body).await {
        Ok(response) => response,
        Err(err) => {
            state.metrics.record_request(&request.path, 502);
            return Err(AppError::from(err));
        }
    };
    state.metrics.record_request(&request.path, response.status);
    info!(status = response.status, path = %request.path, "backend responded");
    into_http_response(response)
}

pub async fn into_proxy_request(req: Request) -> Result<ProxyRequest, AppError> {
    let (parts, body) = req.into_parts();
    let method = parts.method.to_string();
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().map(str::to_string);
    let headers = convert_headers(&parts.headers);
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|err| AppError::bad_request(err.to_string()))?;
    Ok(ProxyRequest {
        method,
        path,
        query,
        headers,
        body: body.to_vec(),
    })
}

fn convert_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.insert(name.as_str().to_lowercase(), value.to_string());
        }
    }
    map
}

pub fn into_http_response(response: ProxyResponse) -> Result<Response<Body>, AppError> {
    let mut builder = Response::builder().status(response.status);
    for (key, value) in response.headers {
        if let (Ok(name), Ok(value)) = (
            key.parse::<header::HeaderName>(),
            HeaderValue::from_str(&value),
        ) {
            builder = builder.header(name, value);
        }
    }
    let body = match response.body {
        ResponseBody::Bytes(bytes) => Body::from(bytes),
        ResponseBody::Stream(stream) => Body::from_stream(stream),
    };
    builder
        .body(body)
        .map_err(|err| AppError::internal(err.to_string()))
}
