//! Echo Agent — a minimal A2A server whose conversation backend echoes
//! messages back, with both unary and streaming turns.
//!
//! Run with:
//! ```sh
//! cargo run --example echo_agent
//! ```
//!
//! Then test with curl:
//! ```sh
//! # Check agent card
//! curl http://localhost:3000/.well-known/agent.json | jq
//!
//! # Send a message
//! curl -X POST http://localhost:3000/a2a \
//!   -H "Content-Type: application/json" \
//!   -d '{
//!     "jsonrpc": "2.0",
//!     "id": 1,
//!     "method": "message/send",
//!     "params": {
//!       "message": {
//!         "messageId": "m1",
//!         "role": "user",
//!         "parts": [{"kind": "text", "text": "Hello, agent!"}]
//!       }
//!     }
//!   }'
//! ```

use std::sync::Arc;

use a2a_server_core::builders::ServerBuilder;
use a2a_server_core::error::A2AResult;
use a2a_server_core::server::{Chunk, ChunkStream, ConversationBackend, SendOutcome};
use async_trait::async_trait;
use futures::stream;
use tokio_util::sync::CancellationToken;

/// A conversation backend that echoes back whatever it is sent, splitting
/// the echoed reply into a couple of chunks when streamed.
struct EchoBackend;

#[async_trait]
impl ConversationBackend for EchoBackend {
    async fn send(&self, text: String, _cancellation: CancellationToken) -> A2AResult<SendOutcome> {
        Ok(SendOutcome::text(format!("Echo: {text}")))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn stream(&self, text: String, _cancellation: CancellationToken) -> A2AResult<ChunkStream> {
        let chunks = vec![
            Chunk::Text(format!("Echo: {text}")),
            Chunk::Done,
        ];
        Ok(Box::pin(stream::iter(chunks)))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let app = ServerBuilder::new(|_context_id| Ok(Arc::new(EchoBackend) as Arc<dyn ConversationBackend>))
        .with_agent_card(|builder| {
            builder
                .with_jsonrpc_interface("http://localhost:3000/a2a")
                .with_streaming(true)
                .with_skill(
                    "echo",
                    "Echo",
                    "Echoes back any text message you send",
                    vec!["echo".to_string(), "test".to_string()],
                )
        })
        .with_cors(true)
        .build();

    let addr = "0.0.0.0:3000";
    println!("Echo Agent listening on http://{addr}");
    println!("  Agent card: http://{addr}/.well-known/agent.json");
    println!("  A2A endpoint: http://{addr}/a2a");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
