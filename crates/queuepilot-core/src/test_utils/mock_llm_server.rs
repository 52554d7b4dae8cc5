// src/test_utils/mock_llm_server.rs
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// One scripted reply: HTTP status plus JSON body.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: u16,
    pub body: Value,
}

impl MockReply {
    /// A successful chat completion whose first choice carries `content`.
    pub fn content(content: Option<&str>) -> Self {
        Self {
            status: 200,
            body: json!({
                "id": "chatcmpl-mock",
                "object": "chat.completion",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": content},
                    "finish_reason": "stop"
                }],
                "usage": {
                    "prompt_tokens": 42,
                    "completion_tokens": 7,
                    "total_tokens": 49,
                    "prompt_tokens_details": {"cached_tokens": 16}
                }
            }),
        }
    }

    /// An OpenAI-style error response.
    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({
                "error": {"message": message, "type": "server_error", "code": null}
            }),
        }
    }

    pub fn raw(status: u16, body: Value) -> Self {
        Self { status, body }
    }
}

#[derive(Clone)]
struct MockServerState {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    requests: Arc<Mutex<Vec<Value>>>,
    authorizations: Arc<Mutex<Vec<Option<String>>>>,
}

async fn chat_completions_handler(
    State(state): State<MockServerState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    log::debug!("Mock LLM server received request: {}", payload);
    state.requests.lock().unwrap().push(payload);
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.authorizations.lock().unwrap().push(authorization);

    match state.replies.lock().unwrap().pop_front() {
        Some(reply) => {
            let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(reply.body))
        }
        None => {
            log::error!("Mock LLM server ran out of responses!");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": {"message": "no scripted reply left"}})),
            )
        }
    }
}

pub struct MockLLMServer {
    addr: SocketAddr,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
    recorded_requests: Arc<Mutex<Vec<Value>>>,
    recorded_authorizations: Arc<Mutex<Vec<Option<String>>>>,
}

impl MockLLMServer {
    pub async fn start(replies: Vec<MockReply>) -> Self {
        let state = MockServerState {
            replies: Arc::new(Mutex::new(VecDeque::from(replies))),
            requests: Arc::new(Mutex::new(Vec::new())),
            authorizations: Arc::new(Mutex::new(Vec::new())),
        };
        let recorded_requests = state.requests.clone();
        let recorded_authorizations = state.authorizations.clone();

        let app = Router::new()
            .route("/v1/chat/completions", post(chat_completions_handler))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap_or_else(|e| {
            panic!("Failed to bind mock server to 127.0.0.1:0. Error: {}", e);
        });
        let addr = listener.local_addr().unwrap();
        log::info!("Mock LLM server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap_or_else(|e| {
                    log::error!("Mock LLM server error: {}", e);
                });
        });

        MockLLMServer {
            addr,
            shutdown_tx,
            recorded_requests,
            recorded_authorizations,
        }
    }

    /// Base URL to configure the client with, including `/v1`.
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    pub fn requests(&self) -> Vec<Value> {
        self.recorded_requests.lock().unwrap().clone()
    }

    /// `Authorization` header of each request, in arrival order.
    pub fn authorization_headers(&self) -> Vec<Option<String>> {
        self.recorded_authorizations.lock().unwrap().clone()
    }

    pub async fn shutdown(self) {
        if self.shutdown_tx.send(()).is_err() {
            log::warn!("Mock LLM server shutdown signal already sent or receiver dropped.");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    }
}
