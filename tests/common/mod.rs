//! Shared test utilities for integration tests.

use std::sync::Arc;
use std::time::Duration;

use a2a_server_core::builders::AgentCardBuilder;
use a2a_server_core::error::{A2AError, A2AResult};
use a2a_server_core::server::{
    a2a_router_with_options, Chunk, ChunkStream, ConversationBackend, ConversationOpener,
    DefaultRequestHandler, InMemoryTaskStore, SendOutcome, ServerOptions, TaskStore,
};
use a2a_server_core::types::Part;
use async_trait::async_trait;
use futures::stream;
use tokio_util::sync::CancellationToken;

/// A conversation backend that echoes back the sent text, both as a unary
/// reply and (split into a couple of chunks) as a stream.
pub struct EchoBackend;

#[async_trait]
impl ConversationBackend for EchoBackend {
    async fn send(&self, text: String, _cancellation: CancellationToken) -> A2AResult<SendOutcome> {
        Ok(SendOutcome::text(format!("Echo: {text}")))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn stream(&self, text: String, _cancellation: CancellationToken) -> A2AResult<ChunkStream> {
        Ok(Box::pin(stream::iter(vec![
            Chunk::Text(format!("Echo: {text}")),
            Chunk::Done,
        ])))
    }
}

/// A backend that sleeps for a configurable delay before echoing, so tests
/// can observe a task still `working` and exercise `tasks/cancel` on it.
pub struct SlowEchoBackend {
    pub delay: Duration,
}

#[async_trait]
impl ConversationBackend for SlowEchoBackend {
    async fn send(&self, text: String, cancellation: CancellationToken) -> A2AResult<SendOutcome> {
        tokio::select! {
            _ = cancellation.cancelled() => Err(A2AError::internal_error("canceled")),
            _ = tokio::time::sleep(self.delay) => {
                Ok(SendOutcome {
                    parts: vec![Part::text(format!("Processed: {text}"))],
                    pending_tools: false,
                })
            }
        }
    }
}

/// A backend that always fails.
pub struct FailingBackend;

#[async_trait]
impl ConversationBackend for FailingBackend {
    async fn send(&self, _text: String, _cancellation: CancellationToken) -> A2AResult<SendOutcome> {
        Err(A2AError::internal_error("Agent intentionally failed"))
    }
}

/// Build a default agent card for testing.
pub fn test_agent_card(url: &str) -> a2a_server_core::types::AgentCard {
    AgentCardBuilder::new("Test Echo Agent", "An echo agent for testing", "0.1.0")
        .with_jsonrpc_interface(url)
        .with_streaming(true)
        .with_skill(
            "echo",
            "Echo",
            "Echoes back messages",
            vec!["test".to_string()],
        )
        .build()
}

/// Start a test server on a random port. Returns the base URL and a handle to shut it down.
pub async fn start_test_server(
    backend: Arc<dyn ConversationBackend>,
) -> (String, tokio::task::JoinHandle<()>) {
    start_test_server_with_store(backend, Arc::new(InMemoryTaskStore::new())).await
}

/// Start a test server on a random port with a specific task store.
pub async fn start_test_server_with_store(
    backend: Arc<dyn ConversationBackend>,
    store: Arc<dyn TaskStore>,
) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{}", addr);

    let opener: ConversationOpener = Arc::new(move |_context_id: &str| Ok(Arc::clone(&backend)));
    let handler = Arc::new(DefaultRequestHandler::new(
        store,
        ServerOptions::default(),
        opener,
    ));
    let agent_card = test_agent_card(&format!("{}/a2a", base_url));
    let app = a2a_router_with_options(handler, agent_card, ServerOptions::default());

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Brief wait for the server to start accepting connections.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    (base_url, handle)
}

/// Helper to build a JSON-RPC request body.
pub fn jsonrpc_request(
    id: serde_json::Value,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

/// Helper to build a message/send request body, blocking until completion.
pub fn message_send_request(id: i64, text: &str) -> serde_json::Value {
    jsonrpc_request(
        serde_json::json!(id),
        "message/send",
        serde_json::json!({
            "message": {
                "messageId": format!("test-msg-{}", id),
                "role": "user",
                "parts": [{"kind": "text", "text": text}]
            },
            "configuration": { "blocking": true }
        }),
    )
}

/// Helper to build a message/send request with context_id and task_id.
pub fn message_send_with_context(
    id: i64,
    text: &str,
    context_id: &str,
    task_id: Option<&str>,
) -> serde_json::Value {
    let mut message = serde_json::json!({
        "messageId": format!("test-msg-{}", id),
        "role": "user",
        "parts": [{"kind": "text", "text": text}],
        "contextId": context_id
    });
    if let Some(tid) = task_id {
        message["taskId"] = serde_json::json!(tid);
    }
    jsonrpc_request(
        serde_json::json!(id),
        "message/send",
        serde_json::json!({ "message": message, "configuration": { "blocking": true } }),
    )
}
