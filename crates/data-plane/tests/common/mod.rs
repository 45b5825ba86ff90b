#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;

/// One request observed by the mock backend, in arrival order.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub path: String,
    pub query: Option<String>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("json body")
    }

    /// Short label for ordering assertions: "save", "restore", "chat".
    pub fn label(&self) -> &'static str {
        match self.path.as_str() {
            "/slots/0" => {
                if self.query.as_deref() == Some("action=restore") {
                    "restore"
                } else {
                    "save"
                }
            }
            "/v1/chat/completions" => "chat",
            _ => "other",
        }
    }
}

/// How the mock answers `/v1/chat/completions`.
#[derive(Clone)]
pub enum ChatReply {
    Json { status: StatusCode, body: String },
    Delayed { status: StatusCode, body: String, delay: Duration },
    Sse { events: Vec<String>, gap: Duration },
}

#[derive(Clone)]
pub struct MockBehavior {
    pub restore_status: StatusCode,
    pub save_status: StatusCode,
    pub chat: ChatReply,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            restore_status: StatusCode::OK,
            save_status: StatusCode::OK,
            chat: ChatReply::Json {
                status: StatusCode::OK,
                body: r#"{"choices":[{"message":{"role":"assistant","content":"ok"}}]}"#.to_string(),
            },
        }
    }
}

struct MockState {
    behavior: MockBehavior,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

pub struct MockBackend {
    pub url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockBackend {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.requests().iter().map(RecordedRequest::label).collect()
    }
}

/// Spawns a recording backend on an ephemeral port.
pub async fn spawn_backend(behavior: MockBehavior) -> MockBackend {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = Arc::new(MockState {
        behavior,
        requests: requests.clone(),
    });
    let app = Router::new().fallback(respond).with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock backend");
    let addr = listener.local_addr().expect("mock addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    MockBackend {
        url: format!("http://{addr}"),
        requests,
    }
}

async fn respond(State(state): State<Arc<MockState>>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let body = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .unwrap_or_default()
        .to_vec();
    state.requests.lock().push(RecordedRequest {
        path: path.clone(),
        query: query.clone(),
        body,
    });

    match path.as_str() {
        "/slots/0" => {
            if query.as_deref() == Some("action=restore") {
                (state.behavior.restore_status, "").into_response()
            } else {
                (state.behavior.save_status, "").into_response()
            }
        }
        "/v1/chat/completions" => match state.behavior.chat.clone() {
            ChatReply::Json { status, body } => (status, body).into_response(),
            ChatReply::Delayed {
                status,
                body,
                delay,
            } => {
                tokio::time::sleep(delay).await;
                (status, body).into_response()
            }
            ChatReply::Sse { events, gap } => {
                let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(1);
                tokio::spawn(async move {
                    for event in events {
                        if tx.send(Ok(Bytes::from(event))).await.is_err() {
                            break;
                        }
                        tokio::time::sleep(gap).await;
                    }
                });
                Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "text/event-stream")
                    .body(Body::from_stream(ReceiverStream::new(rx)))
                    .expect("sse response")
            }
        },
        _ => (StatusCode::NOT_FOUND, "").into_response(),
    }
}
